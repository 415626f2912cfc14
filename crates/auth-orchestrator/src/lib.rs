//! Auth orchestrator for the LMS session core.
//!
//! Owns the published authentication state and drives it from three
//! sources: the persistent session cache at startup, the identity provider's
//! push channel, and the session daemon's events. Also hosts the lifecycle
//! state machine and the inspection surface used by the CLI.

pub mod auth_fsm;
mod inspector;
mod orchestrator;

pub use auth_fsm::{AuthLifecycle, AuthState};
pub use inspector::{
    AuthView, InspectionReport, PingReport, SessionInspector, SessionView, StorageEntry,
};
pub use orchestrator::{AuthOrchestrator, AuthSnapshot, OrchestratorDeps};
