//! Collaborator contracts consumed by the session core.
//!
//! The identity provider owns the authoritative session, the user directory
//! owns the role row, and the audit log receives best-effort entries. Each is
//! a trait so the orchestrator and daemon can run against the Supabase client
//! in production and against scripted doubles in tests.

use crate::oauth::OAuthCallbackParams;
use crate::types::{AuditEntry, AuthChangeEvent, AuthStateChange, AuthUser, Role, Session};
use crate::AuthResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::info;

/// Remote identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, verified or refreshed as the provider sees fit.
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    /// Exchange the refresh token of `current` for a new session.
    async fn refresh_session(&self, current: &Session) -> AuthResult<Session>;

    /// Revoke the session remotely and drop it locally.
    async fn sign_out(&self) -> AuthResult<()>;

    /// Attach to the provider's push channel. The first message is always an
    /// `InitialSession` snapshot.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// Let the provider consume OAuth redirect parameters.
    async fn absorb_oauth_callback(&self, _params: &OAuthCallbackParams) -> AuthResult<()> {
        Ok(())
    }
}

/// Row store holding the application role per user.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_role(&self, user_id: &str, session: &Session) -> AuthResult<Option<Role>>;

    async fn create_user(&self, user: &AuthUser, session: &Session) -> AuthResult<()>;
}

/// Sink for audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> AuthResult<()>;
}

/// Audit log that only writes to the tracing stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(&self, entry: AuditEntry) -> AuthResult<()> {
        info!(
            action = %entry.action,
            user_id = ?entry.user_id,
            timestamp = entry.timestamp,
            "audit"
        );
        Ok(())
    }
}

/// Fan-out of provider push events to any number of subscribers.
#[derive(Debug, Default)]
pub struct AuthEventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthStateChange>>>,
}

impl AuthEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and deliver `InitialSession` to it immediately.
    pub fn subscribe(&self, initial: Option<Session>) -> AuthSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(AuthStateChange {
            event: AuthChangeEvent::InitialSession,
            session: initial,
        });
        self.subscribers.lock().push(tx);
        AuthSubscription { rx }
    }

    /// Deliver an event to every live subscriber, pruning detached ones.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let change = AuthStateChange { event, session };
        self.subscribers
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

/// Receiving end of a push subscription. Dropping it detaches.
#[derive(Debug)]
pub struct AuthSubscription {
    rx: mpsc::UnboundedReceiver<AuthStateChange>,
}

impl AuthSubscription {
    pub async fn recv(&mut self) -> Option<AuthStateChange> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AuthStateChange> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}
