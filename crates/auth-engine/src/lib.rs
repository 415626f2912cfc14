//! Authentication collaborators for the LMS session core.
//!
//! This crate provides:
//! - Session, user, role and push-event types
//! - The `IdentityProvider`, `UserDirectory` and `AuditLog` contracts
//! - A Supabase-backed implementation of all three
//! - OAuth redirect parsing and PKCE helpers
//! - Scriptable doubles behind the `test-support` feature

mod error;
mod oauth;
mod provider;
mod supabase_client;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use error::{AuthError, AuthResult};
pub use oauth::{OAuthCallbackParams, PkcePair};
pub use provider::{
    AuditLog, AuthEventHub, AuthSubscription, IdentityProvider, TracingAuditLog, UserDirectory,
};
pub use supabase_client::SupabaseAuthClient;
pub use types::{
    AuditEntry, AuthChangeEvent, AuthStateChange, AuthUser, Role, Session, SubjectIdentity,
};
