//! Read-mostly inspection surface for debugging a running session core.
//!
//! Reports never contain raw tokens. Actions go through the orchestrator's
//! and cache's public operations only.

use crate::auth_fsm::AuthState;
use crate::orchestrator::AuthOrchestrator;
use auth_engine::{AuthUser, Session};
use serde::Serialize;
use session_config_and_utils::CoreResult;
use session_daemon::{DaemonEvent, DaemonStatus};
use session_storage::StorageKeys;
use std::path::Path;
use tokio::time::Instant;
use tracing::{info, warn};

const VISIBLE_TOKEN_CHARS: usize = 6;

/// Token metadata safe to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub user_id: String,
    pub access_token: String,
    pub has_refresh_token: bool,
    pub token_type: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

impl SessionView {
    fn new(session: &Session, now_secs: i64) -> Self {
        Self {
            user_id: session.user.id.clone(),
            access_token: redact(&session.access_token),
            has_refresh_token: session.refresh_token.is_some(),
            token_type: session.token_type.clone(),
            expires_at: session.expires_at,
            expires_in: session.expires_in(now_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthView {
    pub state: AuthState,
    pub loading: bool,
    pub initialized: bool,
    pub oauth_processing: bool,
    pub user: Option<AuthUser>,
    pub session: Option<SessionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEntry {
    pub key: String,
    pub size: usize,
    pub class: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub generated_at: i64,
    pub auth: AuthView,
    pub daemon: DaemonStatus,
    pub events: Vec<DaemonEvent>,
    pub storage: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingReport {
    pub reachable: bool,
    pub has_session: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SessionInspector {
    orchestrator: AuthOrchestrator,
}

impl SessionInspector {
    pub fn new(orchestrator: AuthOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn report(&self) -> InspectionReport {
        let orchestrator = &self.orchestrator;
        let clock = orchestrator.clock();
        let snapshot = orchestrator.snapshot();

        InspectionReport {
            generated_at: clock.now_millis(),
            auth: AuthView {
                state: snapshot.state,
                loading: snapshot.loading,
                initialized: orchestrator.is_initialized(),
                oauth_processing: orchestrator.is_oauth_processing(),
                user: snapshot.user,
                session: snapshot
                    .session
                    .as_ref()
                    .map(|session| SessionView::new(session, clock.now_secs())),
            },
            daemon: orchestrator.daemon_status(),
            events: orchestrator.daemon_events(),
            storage: self.storage_entries(),
        }
    }

    fn storage_entries(&self) -> Vec<StorageEntry> {
        let store = self.orchestrator.store();
        let mut keys = match store.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "Failed to enumerate storage");
                return Vec::new();
            }
        };
        keys.sort();

        keys.into_iter()
            .map(|key| {
                let size = store.get(&key).ok().flatten().map_or(0, |value| value.len());
                let class = StorageKeys::classify(&key).as_str();
                StorageEntry { key, size, class }
            })
            .collect()
    }

    /// Drop the cached session without contacting the provider.
    pub fn force_clear(&self) {
        info!("Force-clearing cached session");
        self.orchestrator.cache().clear_session();
    }

    pub async fn force_refresh(&self) -> Option<Session> {
        info!("Forcing session refresh");
        self.orchestrator.refresh_session().await
    }

    /// Write the current report as pretty JSON.
    pub fn export_state(&self, path: &Path) -> CoreResult<()> {
        let report = self.report();
        let json = serde_json::to_string_pretty(&report)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Exported session state");
        Ok(())
    }

    /// Time one provider session read.
    pub async fn ping_provider(&self) -> PingReport {
        let started = Instant::now();
        let result = self.orchestrator.provider().get_session().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(session) => PingReport {
                reachable: true,
                has_session: session.is_some(),
                latency_ms,
                error: None,
            },
            Err(err) => PingReport {
                reachable: false,
                has_session: false,
                latency_ms,
                error: Some(err.to_string()),
            },
        }
    }
}

fn redact(token: &str) -> String {
    let visible: String = token.chars().take(VISIBLE_TOKEN_CHARS).collect();
    format!("{}... ({} chars)", visible, token.chars().count())
}
