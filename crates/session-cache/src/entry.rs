use auth_engine::{AuthUser, Session};
use serde::{Deserialize, Serialize};

/// A cached session together with its resolved user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedEntry {
    pub session: Session,
    pub user: AuthUser,
    /// Durable write time, unix millis.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<serde_json::Value>,
}

/// Auxiliary payloads written alongside a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryData {
    pub dashboard: Option<serde_json::Value>,
    pub profile: Option<serde_json::Value>,
}

/// Durable form of an auxiliary payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    pub data: serde_json::Value,
    /// Unix millis.
    pub timestamp: i64,
}
