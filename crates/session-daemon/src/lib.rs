//! Session daemon.
//!
//! Periodically verifies the provider session, refreshes it ahead of expiry,
//! backs off on failures and sweeps stale storage keys. Consumers observe it
//! through listeners and the bounded event history.

mod cleanup;
mod daemon;
mod events;

pub use cleanup::sweep as sweep_stale_keys;
pub use daemon::SessionDaemon;
pub use events::{DaemonEvent, DaemonEventPayload, DaemonStatus, ExpireReason, ListenerId};
