//! Builds the session core from configuration.

use auth_engine::SupabaseAuthClient;
use auth_orchestrator::{AuthOrchestrator, OrchestratorDeps, SessionInspector};
use session_cache::PersistentSessionCache;
use session_config_and_utils::{Clock, Config, Paths, SystemClock};
use session_daemon::SessionDaemon;
use session_storage::{FileStore, KeyValueStore};
use std::sync::Arc;
use tracing::info;

/// Fully wired components for one process.
pub struct SessionCore {
    pub client: Arc<SupabaseAuthClient>,
    pub orchestrator: AuthOrchestrator,
    pub inspector: SessionInspector,
}

impl SessionCore {
    /// Must be called inside the tokio runtime.
    pub fn build(config: &Config, paths: &Paths) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(paths.store_file())?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let timings = config.timings.clone();

        let client = Arc::new(SupabaseAuthClient::new(config, store.clone(), clock.clone())?);
        info!(
            supabase_url = %config.supabase_url,
            project_ref = %client.project_ref(),
            store = %paths.store_file().display(),
            "Configuration loaded"
        );

        let cache = Arc::new(PersistentSessionCache::new(
            store.clone(),
            clock.clone(),
            timings.clone(),
        ));
        let daemon = SessionDaemon::new(client.clone(), store.clone(), clock.clone(), timings.clone());
        let orchestrator = AuthOrchestrator::new(
            OrchestratorDeps {
                provider: client.clone(),
                directory: client.clone(),
                audit: client.clone(),
                cache,
                daemon,
                store,
                clock,
            },
            timings,
        );
        let inspector = SessionInspector::new(orchestrator.clone());

        Ok(Self {
            client,
            orchestrator,
            inspector,
        })
    }
}
