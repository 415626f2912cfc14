use crate::auth_fsm::{AuthLifecycle, AuthMachineInput, AuthState};
use auth_engine::{
    AuditEntry, AuditLog, AuthChangeEvent, AuthError, AuthResult, AuthStateChange, AuthUser,
    IdentityProvider, OAuthCallbackParams, Role, Session, UserDirectory,
};
use parking_lot::Mutex;
use session_cache::PersistentSessionCache;
use session_config_and_utils::{Clock, SessionTimings};
use session_daemon::{DaemonEvent, DaemonEventPayload, DaemonStatus, ListenerId, SessionDaemon};
use session_storage::{KeyValueStore, StorageKeys};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators the orchestrator coordinates.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub provider: Arc<dyn IdentityProvider>,
    pub directory: Arc<dyn UserDirectory>,
    pub audit: Arc<dyn AuditLog>,
    pub cache: Arc<PersistentSessionCache>,
    pub daemon: SessionDaemon,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

/// What consumers observe: the resolved identity plus lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub user: Option<AuthUser>,
    pub session: Option<Session>,
    pub loading: bool,
    pub state: AuthState,
}

impl AuthSnapshot {
    fn initial() -> Self {
        Self {
            user: None,
            session: None,
            loading: true,
            state: AuthState::Initializing,
        }
    }
}

struct Resolved {
    user: Option<AuthUser>,
    session: Option<Session>,
    loading: bool,
}

struct Inner {
    deps: OrchestratorDeps,
    timings: SessionTimings,
    /// Authoritative current state; the watch channel only notifies.
    resolved: Mutex<Resolved>,
    fsm: Mutex<AuthLifecycle>,
    snapshot_tx: watch::Sender<AuthSnapshot>,
    initialized_tx: watch::Sender<bool>,
    startup_started: AtomicBool,
    oauth_processing: AtomicBool,
    /// Bumped by `sign_out`; pending resolutions from an older epoch are dropped.
    sign_out_epoch: AtomicU64,
    daemon_listener: Mutex<Option<ListenerId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Coordinates the cache, the daemon and the identity provider into one
/// published authentication state.
///
/// `start()` serves a cached identity synchronously when one exists and
/// confirms it with the provider in the background; otherwise it resolves
/// from the provider with a fallback timer bounding the loading phase. After
/// that the orchestrator follows provider push events and daemon events.
/// All operations log and degrade instead of failing, except
/// [`AuthOrchestrator::handle_oauth_callback`].
#[derive(Clone)]
pub struct AuthOrchestrator {
    inner: Arc<Inner>,
}

impl AuthOrchestrator {
    pub fn new(deps: OrchestratorDeps, timings: SessionTimings) -> Self {
        let (snapshot_tx, _) = watch::channel(AuthSnapshot::initial());
        let (initialized_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                deps,
                timings,
                resolved: Mutex::new(Resolved {
                    user: None,
                    session: None,
                    loading: true,
                }),
                fsm: Mutex::new(AuthLifecycle::new()),
                snapshot_tx,
                initialized_tx,
                startup_started: AtomicBool::new(false),
                oauth_processing: AtomicBool::new(false),
                sign_out_epoch: AtomicU64::new(0),
                daemon_listener: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run the startup protocol once. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.oauth_processing.load(Ordering::SeqCst) {
            debug!("OAuth callback in progress, skipping startup");
            return;
        }
        if inner.is_initialized() || inner.startup_started.swap(true, Ordering::SeqCst) {
            debug!("Startup already ran");
            return;
        }

        match inner.deps.cache.get_session() {
            Some(entry) => {
                let cached_user = entry.user;
                info!(user_id = %cached_user.id, "Restored session from cache");
                inner.transition(&AuthMachineInput::CacheHit);
                inner.publish(Some(cached_user.clone()), Some(entry.session), false);
                inner.ensure_daemon();
                inner.mark_initialized();

                let weak = Arc::downgrade(inner);
                inner.track(tokio::spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.revalidate(cached_user).await;
                    }
                }));
            }
            None => {
                let weak = Arc::downgrade(inner);
                let epoch = inner.epoch();
                inner.track(tokio::spawn(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.resolve_from_provider(epoch).await;
                    }
                }));
                inner.spawn_fallback_timer();
            }
        }

        inner.attach_push_subscription();
    }

    /// Resolve once startup, an OAuth callback or a push sign-in completed.
    pub async fn wait_until_initialized(&self) {
        let mut rx = self.inner.initialized_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Refresh with the current session. Returns the new session on success.
    pub async fn refresh_session(&self) -> Option<Session> {
        let inner = &self.inner;
        let Some(current) = inner.current_session() else {
            info!("No session to refresh");
            inner.transition(&AuthMachineInput::SessionLost);
            inner.publish(None, None, false);
            inner.deps.cache.clear_session();
            return None;
        };

        inner.transition(&AuthMachineInput::RefreshRequested);
        match inner.deps.provider.refresh_session(&current).await {
            Ok(session) => {
                let role = inner.known_role();
                let user = AuthUser::from_session(&session, role);
                inner.transition(&AuthMachineInput::RefreshSucceeded);
                inner.publish(Some(user.clone()), Some(session.clone()), false);
                inner.deps.cache.save_session(&session, &user, None);
                info!(expires_at = session.expires_at, "Session refreshed on request");
                Some(session)
            }
            Err(err) => {
                warn!(error = %err, "Manual refresh failed, signing out locally");
                inner.transition(&AuthMachineInput::RefreshFailed);
                inner.publish(None, None, false);
                inner.deps.cache.clear_session();
                None
            }
        }
    }

    /// Sign out locally and at the provider. Never fails.
    pub async fn sign_out(&self) {
        let inner = &self.inner;
        let previous = inner.current_user();

        inner.deps.daemon.stop();
        inner.sign_out_epoch.fetch_add(1, Ordering::SeqCst);
        inner.transition(&AuthMachineInput::SignOutRequested);
        inner.publish(None, None, true);
        inner.deps.cache.clear_session();
        inner.mark_initialized();

        if let Err(err) = inner.deps.provider.sign_out().await {
            warn!(error = %err, "Provider sign-out failed, local state already cleared");
        }
        inner.record_audit("logout", previous.as_ref(), serde_json::Value::Null);

        inner.transition(&AuthMachineInput::SignOutComplete);
        inner.set_loading(false);
        info!("Signed out");
    }

    /// Complete an OAuth redirect.
    ///
    /// Fails with [`AuthError::NotOAuthCallback`] without contacting the
    /// provider when the URL carries no OAuth parameters and no flow marker
    /// is recorded.
    pub async fn handle_oauth_callback(&self, url: &str) -> AuthResult<AuthUser> {
        let inner = &self.inner;
        let params = OAuthCallbackParams::from_url(url).unwrap_or_default();
        let marker = inner.deps.store.has(StorageKeys::OAUTH_FLOW).unwrap_or(false);
        if !params.has_oauth_params() && !marker {
            return Err(AuthError::NotOAuthCallback);
        }

        let _guard = ProcessingGuard::enter(&inner.oauth_processing)?;
        inner.transition(&AuthMachineInput::OAuthCallbackStarted);
        inner.set_loading(true);

        match inner.complete_oauth(&params).await {
            Ok(user) => Ok(user),
            Err(err) => {
                warn!(error = %err, "OAuth callback failed");
                inner.transition(&AuthMachineInput::OAuthFailed);
                inner.set_loading(false);
                Err(err)
            }
        }
    }

    /// Record that an OAuth redirect is about to happen.
    pub fn mark_oauth_flow_started(&self) {
        let now = self.inner.deps.clock.now_millis().to_string();
        if let Err(err) = self.inner.deps.store.set(StorageKeys::OAUTH_FLOW, &now) {
            warn!(error = %err, "Failed to record OAuth flow marker");
        }
    }

    /// Detach from the provider and the daemon and stop background work.
    pub fn unmount(&self) {
        let inner = &self.inner;
        if let Some(id) = inner.daemon_listener.lock().take() {
            inner.deps.daemon.remove_listener(id);
        }
        let tasks = std::mem::take(&mut *inner.tasks.lock());
        for task in tasks {
            task.abort();
        }
        inner.deps.daemon.stop();
        debug!("Orchestrator unmounted");
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.build_snapshot()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.inner.current_user()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.current_session()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.resolved.lock().loading
    }

    pub fn is_oauth_processing(&self) -> bool {
        self.inner.oauth_processing.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    pub fn state(&self) -> AuthState {
        self.inner.fsm.lock().state()
    }

    pub fn daemon_status(&self) -> DaemonStatus {
        self.inner.deps.daemon.status()
    }

    pub fn daemon_events(&self) -> Vec<DaemonEvent> {
        self.inner.deps.daemon.events()
    }

    pub fn cache(&self) -> &Arc<PersistentSessionCache> {
        &self.inner.deps.cache
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.deps.store
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.inner.deps.provider
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.deps.clock
    }
}

/// Holds the OAuth-processing flag for the lifetime of a callback.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> AuthResult<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return Err(AuthError::OAuth(
                "another OAuth callback is being processed".to_string(),
            ));
        }
        Ok(Self(flag))
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn is_initialized(&self) -> bool {
        *self.initialized_tx.borrow()
    }

    fn mark_initialized(&self) {
        self.initialized_tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.resolved.lock().user.clone()
    }

    fn epoch(&self) -> u64 {
        self.sign_out_epoch.load(Ordering::SeqCst)
    }

    fn signed_out_since(&self, epoch: u64) -> bool {
        self.epoch() != epoch
    }

    fn current_session(&self) -> Option<Session> {
        self.resolved.lock().session.clone()
    }

    fn known_role(&self) -> Role {
        self.resolved
            .lock()
            .user
            .as_ref()
            .map(|user| user.role)
            .unwrap_or_default()
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn build_snapshot(&self) -> AuthSnapshot {
        let state = self.fsm.lock().state();
        let resolved = self.resolved.lock();
        AuthSnapshot {
            user: resolved.user.clone(),
            session: resolved.session.clone(),
            loading: resolved.loading,
            state,
        }
    }

    fn notify(&self) {
        self.snapshot_tx.send_if_modified(|current| {
            let next = self.build_snapshot();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn publish(&self, user: Option<AuthUser>, session: Option<Session>, loading: bool) {
        {
            let mut resolved = self.resolved.lock();
            resolved.user = user;
            resolved.session = session;
            resolved.loading = loading;
        }
        self.notify();
    }

    fn set_loading(&self, loading: bool) {
        self.resolved.lock().loading = loading;
        self.notify();
    }

    fn transition(&self, input: &AuthMachineInput) {
        let changed = self.fsm.lock().apply(input);
        if changed {
            self.notify();
        }
    }

    /// Drop every trace of the session locally.
    fn sign_out_locally(&self, input: &AuthMachineInput) {
        self.transition(input);
        self.publish(None, None, false);
        self.deps.cache.clear_session();
        self.deps.daemon.stop();
    }

    fn ensure_daemon(self: &Arc<Self>) {
        {
            let mut listener = self.daemon_listener.lock();
            if listener.is_none() {
                let weak = Arc::downgrade(self);
                *listener = Some(self.deps.daemon.add_listener(move |event| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_daemon_event(event);
                    }
                }));
            }
        }
        self.deps.daemon.start();
    }

    fn spawn_fallback_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let timeout = self.timings.fallback_timeout();
        self.track(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !inner.is_initialized() && inner.resolved.lock().loading {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Startup still pending, releasing loading state"
                );
                inner.set_loading(false);
            }
        }));
    }

    fn attach_push_subscription(self: &Arc<Self>) {
        let mut subscription = self.deps.provider.on_auth_state_change();
        let weak = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_auth_change(change).await;
            }
            debug!("Provider push subscription closed");
        }));
    }

    /// Cache-hit path: confirm the optimistic identity with the provider.
    async fn revalidate(self: &Arc<Self>, cached: AuthUser) {
        let result = self.deps.provider.get_session().await;
        if !self.still_signed_in_as(&cached.id) {
            debug!("Identity changed during revalidation, discarding result");
            return;
        }

        match result {
            Ok(Some(session)) => {
                let role = match self.deps.directory.fetch_role(session.user_id(), &session).await {
                    Ok(Some(role)) => role,
                    Ok(None) => cached.role,
                    Err(err) => {
                        warn!(error = %err, "Role lookup failed, keeping cached role");
                        cached.role
                    }
                };
                if !self.still_signed_in_as(&cached.id) {
                    return;
                }

                let user = AuthUser::from_session(&session, role);
                self.transition(&AuthMachineInput::ServerVerified);
                let unchanged = {
                    let resolved = self.resolved.lock();
                    resolved.user.as_ref() == Some(&user)
                        && resolved.session.as_ref().map(|s| s.access_token.as_str())
                            == Some(session.access_token.as_str())
                };
                if !unchanged {
                    info!(role = %user.role, "Revalidation updated the identity");
                    self.publish(Some(user.clone()), Some(session.clone()), false);
                }
                self.deps.cache.save_session(&session, &user, None);
            }
            Ok(None) => {
                info!("Cached session no longer valid at the provider");
                self.sign_out_locally(&AuthMachineInput::ServerRejected);
            }
            Err(err) => {
                warn!(error = %err, "Revalidation inconclusive, keeping cached identity");
                self.transition(&AuthMachineInput::RevalidationInconclusive);
            }
        }
    }

    fn still_signed_in_as(&self, user_id: &str) -> bool {
        self.resolved
            .lock()
            .user
            .as_ref()
            .is_some_and(|user| user.id == user_id)
    }

    /// Cache-miss path: ask the provider.
    async fn resolve_from_provider(self: &Arc<Self>, epoch: u64) {
        let result = self.deps.provider.get_session().await;
        if self.is_initialized() || self.signed_out_since(epoch) {
            debug!("Startup superseded before the provider answered");
            return;
        }

        match result {
            Ok(Some(session)) => {
                let role = self.lookup_role(&session).await.unwrap_or_default();
                if self.is_initialized() || self.signed_out_since(epoch) {
                    return;
                }
                let user = AuthUser::from_session(&session, role);
                info!(user_id = %user.id, "Session resolved from provider");
                self.transition(&AuthMachineInput::SessionEstablished);
                self.publish(Some(user.clone()), Some(session.clone()), false);
                self.deps.cache.save_session(&session, &user, None);
                self.ensure_daemon();
            }
            Ok(None) => {
                info!("No session at startup");
                self.transition(&AuthMachineInput::SessionLost);
                self.publish(None, None, false);
                self.deps.cache.clear_session();
            }
            Err(err) => {
                warn!(error = %err, "Provider unavailable at startup");
                self.transition(&AuthMachineInput::SessionLost);
                self.publish(None, None, false);
            }
        }
        self.mark_initialized();
    }

    /// Directory role, `None` when the row is missing or the lookup failed.
    async fn lookup_role(&self, session: &Session) -> Option<Role> {
        match self.deps.directory.fetch_role(session.user_id(), session).await {
            Ok(role) => role,
            Err(err) => {
                warn!(error = %err, "Role lookup failed, using default role");
                None
            }
        }
    }

    async fn on_auth_change(self: &Arc<Self>, change: AuthStateChange) {
        let AuthStateChange { event, session } = change;
        match (event, session) {
            (AuthChangeEvent::InitialSession, _) if self.is_initialized() => {
                debug!("Ignoring initial session after initialization");
            }
            (AuthChangeEvent::InitialSession, None) => {
                debug!("Ignoring empty initial session");
            }
            (AuthChangeEvent::SignedOut, _) | (_, None)
                if self.fsm.lock().state() == AuthState::SigningOut =>
            {
                debug!(event = ?event, "Sign-out already in progress");
            }
            (AuthChangeEvent::SignedOut, _) | (_, None) => {
                info!(event = ?event, "Provider reported sign-out");
                self.sign_out_locally(&AuthMachineInput::SessionLost);
            }
            (AuthChangeEvent::InitialSession | AuthChangeEvent::SignedIn, Some(session)) => {
                if self.oauth_processing.load(Ordering::SeqCst) {
                    debug!("Sign-in push during OAuth callback, deferring to the callback");
                    return;
                }
                self.on_signed_in(event, session).await;
            }
            (AuthChangeEvent::TokenRefreshed | AuthChangeEvent::UserUpdated, Some(session)) => {
                if self.current_user().is_none() {
                    debug!(event = ?event, "Ignoring session update while signed out");
                    return;
                }
                let user = AuthUser::from_session(&session, self.known_role());
                self.transition(&AuthMachineInput::SessionEstablished);
                self.publish(Some(user.clone()), Some(session.clone()), false);
                self.deps.cache.save_session(&session, &user, None);
                debug!(event = ?event, "Republished pushed session");
            }
        }
    }

    async fn on_signed_in(self: &Arc<Self>, event: AuthChangeEvent, session: Session) {
        let epoch = self.epoch();
        let role = match self.deps.directory.fetch_role(session.user_id(), &session).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                let user = AuthUser::from_session(&session, Role::default());
                self.create_directory_row(user, session.clone());
                Role::default()
            }
            Err(err) => {
                warn!(error = %err, "Role lookup failed, using default role");
                Role::default()
            }
        };

        if self.signed_out_since(epoch) {
            debug!("Signed out while resolving the pushed sign-in, dropping it");
            return;
        }

        let user = AuthUser::from_session(&session, role);
        let changed = {
            let resolved = self.resolved.lock();
            resolved.user.as_ref() != Some(&user)
        };
        self.transition(&AuthMachineInput::SessionEstablished);
        if changed {
            info!(user_id = %user.id, role = %user.role, "Signed in");
            self.publish(Some(user.clone()), Some(session.clone()), false);
        } else {
            self.set_loading(false);
        }
        self.deps.cache.save_session(&session, &user, None);
        self.ensure_daemon();
        self.mark_initialized();
        if event == AuthChangeEvent::SignedIn {
            self.record_audit("login", Some(&user), serde_json::Value::Null);
        }
    }

    async fn complete_oauth(self: &Arc<Self>, params: &OAuthCallbackParams) -> AuthResult<AuthUser> {
        if let Err(err) = self.deps.provider.absorb_oauth_callback(params).await {
            warn!(error = %err, "Provider did not absorb the OAuth callback");
        }

        let session = match self.read_provider_session().await {
            Some(session) => session,
            None => {
                tokio::time::sleep(self.timings.oauth_retry_delay()).await;
                match self.read_provider_session().await {
                    Some(session) => session,
                    None => {
                        if let Some(err) = params.into_error() {
                            return Err(err);
                        }
                        tokio::time::sleep(self.timings.oauth_final_retry_delay()).await;
                        self.read_provider_session().await.ok_or_else(|| {
                            AuthError::OAuth("no session after OAuth callback".to_string())
                        })?
                    }
                }
            }
        };

        let role = self.lookup_role(&session).await.unwrap_or_default();
        let user = AuthUser::from_session(&session, role);
        self.transition(&AuthMachineInput::SessionEstablished);
        self.publish(Some(user.clone()), Some(session.clone()), false);
        self.deps.cache.save_session(&session, &user, None);
        self.ensure_daemon();
        self.mark_initialized();

        if let Err(err) = self.deps.store.delete(StorageKeys::OAUTH_FLOW) {
            warn!(error = %err, "Failed to clear OAuth flow marker");
        }
        self.record_audit("login", Some(&user), serde_json::json!({ "method": "oauth" }));
        info!(user_id = %user.id, "OAuth sign-in complete");
        Ok(user)
    }

    async fn read_provider_session(&self) -> Option<Session> {
        match self.deps.provider.get_session().await {
            Ok(session) => session,
            Err(err) => {
                debug!(error = %err, "Session read failed during OAuth callback");
                None
            }
        }
    }

    fn on_daemon_event(&self, event: &DaemonEvent) {
        match &event.payload {
            DaemonEventPayload::Refresh {
                session: Some(session),
                ..
            } => {
                if self.current_user().is_none() {
                    debug!("Ignoring daemon refresh while signed out");
                    return;
                }
                let user = AuthUser::from_session(session, self.known_role());
                self.transition(&AuthMachineInput::SessionEstablished);
                let loading = self.resolved.lock().loading;
                self.publish(Some(user.clone()), Some(session.as_ref().clone()), loading);
                self.deps.cache.save_session(session, &user, None);
                info!(expires_at = session.expires_at, "Applied daemon refresh");
            }
            DaemonEventPayload::Refresh { session: None, .. } => {
                debug!("Daemon refresh event without session");
            }
            DaemonEventPayload::Expire { reason } => {
                warn!(reason = ?reason, "Daemon reported session expiry");
                self.sign_out_locally(&AuthMachineInput::SessionLost);
            }
            DaemonEventPayload::Error { fatal: true, .. } => {
                error!(error = ?event.error, "Daemon gave up on the session");
                self.transition(&AuthMachineInput::SessionLost);
                self.publish(None, None, false);
                self.deps.cache.clear_session();
            }
            DaemonEventPayload::Error { retry_count, .. } => {
                debug!(retry_count, error = ?event.error, "Daemon retrying");
            }
            DaemonEventPayload::Heartbeat { .. } | DaemonEventPayload::Cleanup { .. } => {
                debug!(event = event.kind(), "Daemon event");
            }
        }
    }

    fn create_directory_row(&self, user: AuthUser, session: Session) {
        let directory = self.deps.directory.clone();
        tokio::spawn(async move {
            match directory.create_user(&user, &session).await {
                Ok(()) => info!(user_id = %user.id, "Created default user record"),
                Err(err) => warn!(user_id = %user.id, error = %err, "Failed to create user record"),
            }
        });
    }

    fn record_audit(&self, action: &str, user: Option<&AuthUser>, details: serde_json::Value) {
        let entry = AuditEntry::new(action, user, self.deps.clock.now_millis()).with_details(details);
        let audit = self.deps.audit.clone();
        tokio::spawn(async move {
            if let Err(err) = audit.record(entry).await {
                debug!(error = %err, "Audit entry dropped");
            }
        });
    }
}
