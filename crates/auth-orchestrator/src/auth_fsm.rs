//! Authentication lifecycle as an explicit state machine.
//!
//! ```text
//! Initializing ── CacheHit ──────────────► Revalidating
//! Initializing ── SessionEstablished ────► SignedIn
//! Initializing ── SessionLost ───────────► SignedOut
//! Revalidating ── ServerVerified ────────► SignedIn
//! Revalidating ── ServerRejected ────────► SignedOut
//! *            ── OAuthCallbackStarted ──► ProcessingOAuth ── OAuthFailed ──► SignedOut
//! SignedIn     ── RefreshRequested ──────► Refreshing ── RefreshSucceeded ──► SignedIn
//! *            ── SignOutRequested ──────► SigningOut ── SignOutComplete ───► SignedOut
//! ```
//!
//! Pushed provider events may land in any state, so the orchestrator treats
//! an impossible transition as a no-op rather than an error.

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(Initializing)

    Initializing => {
        CacheHit => Revalidating,
        SessionEstablished => SignedIn,
        SessionLost => SignedOut,
        OAuthCallbackStarted => ProcessingOAuth,
        SignOutRequested => SigningOut
    },
    Revalidating => {
        ServerVerified => SignedIn,
        RevalidationInconclusive => SignedIn,
        ServerRejected => SignedOut,
        SessionEstablished => SignedIn,
        SessionLost => SignedOut,
        RefreshRequested => Refreshing,
        OAuthCallbackStarted => ProcessingOAuth,
        SignOutRequested => SigningOut
    },
    ProcessingOAuth => {
        SessionEstablished => SignedIn,
        OAuthFailed => SignedOut,
        SessionLost => SignedOut,
        SignOutRequested => SigningOut
    },
    SignedIn => {
        SessionEstablished => SignedIn,
        RefreshRequested => Refreshing,
        SessionLost => SignedOut,
        OAuthCallbackStarted => ProcessingOAuth,
        SignOutRequested => SigningOut
    },
    Refreshing => {
        RefreshSucceeded => SignedIn,
        RefreshFailed => SignedOut,
        SessionEstablished => SignedIn,
        SessionLost => SignedOut,
        SignOutRequested => SigningOut
    },
    SigningOut => {
        SignOutComplete => SignedOut
    },
    SignedOut => {
        SessionEstablished => SignedIn,
        SessionLost => SignedOut,
        RefreshRequested => Refreshing,
        OAuthCallbackStarted => ProcessingOAuth,
        SignOutRequested => SigningOut
    }
}

pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Lifecycle state as exposed in snapshots and inspection reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Initializing,
    /// Serving a cached identity while the provider confirms it.
    Revalidating,
    #[serde(rename = "processing_oauth")]
    ProcessingOAuth,
    SignedIn,
    Refreshing,
    SigningOut,
    SignedOut,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            AuthState::Revalidating | AuthState::SignedIn | AuthState::Refreshing
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::Initializing
                | AuthState::Revalidating
                | AuthState::ProcessingOAuth
                | AuthState::Refreshing
                | AuthState::SigningOut
        )
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::Initializing => AuthState::Initializing,
            AuthMachineState::Revalidating => AuthState::Revalidating,
            AuthMachineState::ProcessingOAuth => AuthState::ProcessingOAuth,
            AuthMachineState::SignedIn => AuthState::SignedIn,
            AuthMachineState::Refreshing => AuthState::Refreshing,
            AuthMachineState::SigningOut => AuthState::SigningOut,
            AuthMachineState::SignedOut => AuthState::SignedOut,
        }
    }
}

/// Wrapper that ignores impossible transitions instead of failing.
#[derive(Debug)]
pub struct AuthLifecycle {
    machine: AuthMachine,
}

impl Default for AuthLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthLifecycle {
    pub fn new() -> Self {
        Self {
            machine: AuthMachine::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        AuthState::from(self.machine.state())
    }

    /// Apply `input`. Returns true when the state changed.
    pub fn apply(&mut self, input: &AuthMachineInput) -> bool {
        let old_state = self.state();
        if self.machine.consume(input).is_err() {
            debug!(
                input = ?input,
                state = ?old_state,
                "Ignoring impossible auth transition"
            );
            return false;
        }

        let new_state = self.state();
        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Auth state transition"
            );
        }
        old_state != new_state
    }
}
