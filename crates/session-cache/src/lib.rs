//! Persistent session cache.
//!
//! Two tiers: an in-memory shadow with a short TTL for repeated lookups, and
//! the durable key-value store with a long TTL that survives restarts.
//! Memory is always a cache of durable storage, never the reverse. No public
//! operation fails; storage problems are logged and degrade to a miss or to
//! "no update".

mod cache;
mod entry;

pub use cache::PersistentSessionCache;
pub use entry::{AuxiliaryData, AuxiliaryRecord, CachedEntry};
