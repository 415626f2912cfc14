#![allow(dead_code)]

use auth_engine::mock::{session_for, MockAuditLog, MockIdentityProvider, MockUserDirectory};
use auth_engine::{AuthUser, Role, Session};
use auth_orchestrator::{AuthOrchestrator, OrchestratorDeps};
use session_cache::PersistentSessionCache;
use session_config_and_utils::{ManualClock, SessionTimings};
use session_daemon::SessionDaemon;
use session_storage::{KeyValueStore, MemoryStore, StorageKeys};
use std::sync::Arc;
use std::time::Duration;

pub const START_MS: i64 = 1_700_000_000_000;
pub const START_SECS: i64 = START_MS / 1000;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MockIdentityProvider>,
    pub directory: Arc<MockUserDirectory>,
    pub audit: Arc<MockAuditLog>,
    pub cache: Arc<PersistentSessionCache>,
    pub daemon: SessionDaemon,
    pub orchestrator: AuthOrchestrator,
}

impl Harness {
    /// Must run inside a tokio runtime.
    pub fn new() -> Self {
        let timings = SessionTimings::default();
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockIdentityProvider::new(clock.clone()));
        let directory = Arc::new(MockUserDirectory::new());
        let audit = Arc::new(MockAuditLog::new());
        let cache = Arc::new(PersistentSessionCache::new(
            store.clone(),
            clock.clone(),
            timings.clone(),
        ));
        let daemon = SessionDaemon::new(
            provider.clone(),
            store.clone(),
            clock.clone(),
            timings.clone(),
        );
        let orchestrator = AuthOrchestrator::new(
            OrchestratorDeps {
                provider: provider.clone(),
                directory: directory.clone(),
                audit: audit.clone(),
                cache: cache.clone(),
                daemon: daemon.clone(),
                store: store.clone(),
                clock: clock.clone(),
            },
            timings,
        );

        Self {
            clock,
            store,
            provider,
            directory,
            audit,
            cache,
            daemon,
            orchestrator,
        }
    }

    /// Seed the cache and the provider with the same session for `user_id`.
    pub fn with_cached_session(self, user_id: &str, role: Role, expires_at: i64) -> Self {
        let session = session_for(user_id, expires_at);
        self.cache
            .save_session(&session, &AuthUser::from_session(&session, role), None);
        self.provider.set_session(Some(session));
        self.directory.set_role(user_id, role);
        self
    }

    pub fn has_owned_keys(&self) -> bool {
        StorageKeys::OWNED
            .iter()
            .any(|key| self.store.has(key).unwrap_or(false))
    }

    pub fn healthy_session(user_id: &str) -> Session {
        session_for(user_id, START_SECS + 3600)
    }
}

/// Let spawned tasks run to completion without reaching any timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
