//! Scriptable doubles for the provider, directory and audit log.
//!
//! Compiled for this crate's tests and, behind the `test-support` feature,
//! for downstream crates' tests.

use crate::oauth::OAuthCallbackParams;
use crate::provider::{AuditLog, AuthEventHub, AuthSubscription, IdentityProvider, UserDirectory};
use crate::types::{AuditEntry, AuthChangeEvent, AuthUser, Role, Session, SubjectIdentity};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use session_config_and_utils::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Build a session for `user_id` expiring at `expires_at` (unix seconds).
pub fn session_for(user_id: &str, expires_at: i64) -> Session {
    Session {
        access_token: format!("access-{}", user_id),
        refresh_token: Some(format!("refresh-{}", user_id)),
        token_type: "bearer".to_string(),
        expires_at,
        user: SubjectIdentity {
            id: user_id.to_string(),
            email: Some(format!("{}@lms.dev", user_id)),
        },
    }
}

/// A provider call, in the order it was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCall {
    GetSession,
    RefreshSession,
    SignOut,
    AbsorbOAuthCallback,
}

/// How `get_session` answers once the scripted queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetSessionMode {
    /// Return the stored session.
    Stored,
    /// Fail with a transient error.
    Fail,
    /// Never resolve.
    Hang,
    /// Capture the stored session, then answer with it after the delay.
    Delayed(Duration),
}

/// How `refresh_session` answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Issue a new session one hour past the clock.
    Rotate,
    /// Reject the refresh token.
    Reject,
    /// Fail with a transient error.
    Fail,
}

struct MockState {
    session: Option<Session>,
    get_mode: GetSessionMode,
    scripted: VecDeque<Option<Session>>,
    refresh_mode: RefreshMode,
    refresh_counter: u32,
    sign_out_fails: bool,
    sign_out_delay: Option<Duration>,
    absorb_error: Option<String>,
    calls: Vec<MockCall>,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// In-memory identity provider with scripted answers and a call log.
pub struct MockIdentityProvider {
    clock: Arc<dyn Clock>,
    state: Mutex<MockState>,
    events: AuthEventHub,
    sign_out_hook: Mutex<Option<Hook>>,
}

impl MockIdentityProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(MockState {
                session: None,
                get_mode: GetSessionMode::Stored,
                scripted: VecDeque::new(),
                refresh_mode: RefreshMode::Rotate,
                refresh_counter: 0,
                sign_out_fails: false,
                sign_out_delay: None,
                absorb_error: None,
                calls: Vec::new(),
            }),
            events: AuthEventHub::new(),
            sign_out_hook: Mutex::new(None),
        }
    }

    pub fn with_session(self, session: Session) -> Self {
        self.set_session(Some(session));
        self
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.state.lock().session = session;
    }

    pub fn session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    pub fn set_get_session_mode(&self, mode: GetSessionMode) {
        self.state.lock().get_mode = mode;
    }

    /// Queue answers for the next `get_session` calls, consumed in order
    /// before the mode applies.
    pub fn script_get_session(&self, answers: impl IntoIterator<Item = Option<Session>>) {
        self.state.lock().scripted.extend(answers);
    }

    pub fn set_refresh_mode(&self, mode: RefreshMode) {
        self.state.lock().refresh_mode = mode;
    }

    pub fn set_sign_out_fails(&self, fails: bool) {
        self.state.lock().sign_out_fails = fails;
    }

    /// Hold `sign_out` open for `delay` after the local session is dropped.
    pub fn set_sign_out_delay(&self, delay: Option<Duration>) {
        self.state.lock().sign_out_delay = delay;
    }

    pub fn set_absorb_error(&self, error: Option<&str>) {
        self.state.lock().absorb_error = error.map(String::from);
    }

    /// Run `hook` at the start of every `sign_out` call, before the
    /// `SignedOut` push.
    pub fn on_sign_out(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.sign_out_hook.lock() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, call: MockCall) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Push an event to subscribers, as the real provider would.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        self.events.emit(event, session);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let (answer, delay) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::GetSession);
            match state.scripted.pop_front() {
                Some(scripted) => (Some(Ok(scripted)), None),
                None => match state.get_mode {
                    GetSessionMode::Stored => (Some(Ok(state.session.clone())), None),
                    GetSessionMode::Fail => (Some(Err(AuthError::NetworkUnavailable)), None),
                    GetSessionMode::Hang => (None, None),
                    GetSessionMode::Delayed(delay) => {
                        (Some(Ok(state.session.clone())), Some(delay))
                    }
                },
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match answer {
            Some(answer) => answer,
            None => std::future::pending().await,
        }
    }

    async fn refresh_session(&self, current: &Session) -> AuthResult<Session> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::RefreshSession);
        match state.refresh_mode {
            RefreshMode::Rotate => {
                state.refresh_counter += 1;
                let n = state.refresh_counter;
                let session = Session {
                    access_token: format!("access-{}-r{}", current.user.id, n),
                    refresh_token: Some(format!("refresh-{}-r{}", current.user.id, n)),
                    token_type: current.token_type.clone(),
                    expires_at: self.clock.now_secs() + 3600,
                    user: current.user.clone(),
                };
                state.session = Some(session.clone());
                Ok(session)
            }
            RefreshMode::Reject => {
                state.session = None;
                Err(AuthError::RefreshTokenRejected("invalid_grant".to_string()))
            }
            RefreshMode::Fail => Err(AuthError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            }),
        }
    }

    async fn sign_out(&self) -> AuthResult<()> {
        if let Some(hook) = self.sign_out_hook.lock().as_ref() {
            hook();
        }
        let (fails, delay) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::SignOut);
            state.session = None;
            (state.sign_out_fails, state.sign_out_delay)
        };
        self.events.emit(AuthChangeEvent::SignedOut, None);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(AuthError::NetworkUnavailable);
        }
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.events.subscribe(self.session())
    }

    async fn absorb_oauth_callback(&self, params: &OAuthCallbackParams) -> AuthResult<()> {
        self.record(MockCall::AbsorbOAuthCallback);
        if let Some(err) = params.into_error() {
            return Err(err);
        }
        match self.state.lock().absorb_error.clone() {
            Some(message) => Err(AuthError::OAuth(message)),
            None => Ok(()),
        }
    }
}

/// In-memory user directory.
#[derive(Default)]
pub struct MockUserDirectory {
    roles: Mutex<HashMap<String, Role>>,
    created: Mutex<Vec<AuthUser>>,
    fail_lookups: Mutex<bool>,
    lookups: Mutex<usize>,
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(self, user_id: &str, role: Role) -> Self {
        self.set_role(user_id, role);
        self
    }

    pub fn set_role(&self, user_id: &str, role: Role) {
        self.roles.lock().insert(user_id.to_string(), role);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        *self.fail_lookups.lock() = fail;
    }

    pub fn created(&self) -> Vec<AuthUser> {
        self.created.lock().clone()
    }

    pub fn lookup_count(&self) -> usize {
        *self.lookups.lock()
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn fetch_role(&self, user_id: &str, _session: &Session) -> AuthResult<Option<Role>> {
        *self.lookups.lock() += 1;
        if *self.fail_lookups.lock() {
            return Err(AuthError::Status {
                status: 500,
                message: "row store unavailable".to_string(),
            });
        }
        Ok(self.roles.lock().get(user_id).copied())
    }

    async fn create_user(&self, user: &AuthUser, _session: &Session) -> AuthResult<()> {
        self.roles.lock().insert(user.id.clone(), user.role);
        self.created.lock().push(user.clone());
        Ok(())
    }
}

/// Audit log that keeps entries in memory.
#[derive(Default)]
pub struct MockAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MockAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditLog for MockAuditLog {
    async fn record(&self, entry: AuditEntry) -> AuthResult<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_config_and_utils::ManualClock;

    fn provider() -> MockIdentityProvider {
        MockIdentityProvider::new(Arc::new(ManualClock::new(10_000_000)))
    }

    #[tokio::test]
    async fn test_scripted_answers_precede_mode() {
        let provider = provider().with_session(session_for("u1", 20_000));
        provider.script_get_session([None]);

        assert!(provider.get_session().await.unwrap().is_none());
        assert_eq!(
            provider.get_session().await.unwrap().unwrap().user.id,
            "u1"
        );
        assert_eq!(provider.call_count(MockCall::GetSession), 2);
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let provider = provider();
        let current = session_for("u1", 10);
        let refreshed = provider.refresh_session(&current).await.unwrap();

        assert_ne!(refreshed.access_token, current.access_token);
        assert_eq!(refreshed.expires_at, 10_000 + 3600);
        assert_eq!(provider.session(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_refresh_reject_and_fail() {
        let provider = provider();
        provider.set_refresh_mode(RefreshMode::Reject);
        let err = provider.refresh_session(&session_for("u1", 10)).await.unwrap_err();
        assert!(err.is_refresh_token_rejected());

        provider.set_refresh_mode(RefreshMode::Fail);
        let err = provider.refresh_session(&session_for("u1", 10)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_sign_out_hook_runs_first() {
        let provider = Arc::new(provider().with_session(session_for("u1", 20_000)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_hook = seen.clone();
        let provider_hook = Arc::downgrade(&provider);
        provider.on_sign_out(move || {
            if let Some(p) = provider_hook.upgrade() {
                seen_hook.lock().push(p.session().is_some());
            }
        });

        provider.set_sign_out_fails(true);
        assert!(provider.sign_out().await.is_err());
        assert_eq!(*seen.lock(), vec![true]);
        assert!(provider.session().is_none());
    }

    #[tokio::test]
    async fn test_directory_create_then_fetch() {
        let directory = MockUserDirectory::new();
        let session = session_for("u1", 1);
        assert_eq!(directory.fetch_role("u1", &session).await.unwrap(), None);

        let user = AuthUser::from_session(&session, Role::Student);
        directory.create_user(&user, &session).await.unwrap();
        assert_eq!(
            directory.fetch_role("u1", &session).await.unwrap(),
            Some(Role::Student)
        );
        assert_eq!(directory.created(), vec![user]);
        assert_eq!(directory.lookup_count(), 2);
    }
}
