//! Daemon event and status types.

use auth_engine::Session;
use serde::Serialize;

/// Handle returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Why the daemon declared the session gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireReason {
    NoSession,
    RefreshFailed,
}

/// Event payload, tagged by `type` when serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonEventPayload {
    Refresh {
        success: bool,
        expires_at: Option<i64>,
        /// Kept in memory for listeners, never serialized.
        #[serde(skip)]
        session: Option<Box<Session>>,
    },
    Expire {
        reason: ExpireReason,
    },
    Error {
        fatal: bool,
        retry_count: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },
    Heartbeat {
        #[serde(skip_serializing_if = "Option::is_none")]
        healthy: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_in: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<DaemonStatus>,
    },
    Cleanup {
        removed: usize,
    },
}

/// A daemon event as delivered to listeners and kept in history.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonEvent {
    /// Unix millis.
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: DaemonEventPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonEvent {
    pub fn kind(&self) -> &'static str {
        match self.payload {
            DaemonEventPayload::Refresh { .. } => "refresh",
            DaemonEventPayload::Expire { .. } => "expire",
            DaemonEventPayload::Error { .. } => "error",
            DaemonEventPayload::Heartbeat { .. } => "heartbeat",
            DaemonEventPayload::Cleanup { .. } => "cleanup",
        }
    }

    pub fn is_fatal_error(&self) -> bool {
        matches!(self.payload, DaemonEventPayload::Error { fatal: true, .. })
    }
}

/// Snapshot of the daemon's runtime state and tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub last_check: Option<i64>,
    pub last_heartbeat: Option<i64>,
    pub retry_count: u32,
    pub check_interval_ms: u64,
    pub refresh_threshold_ms: u64,
    pub max_retry_attempts: u32,
}
