//! Storage key constants.

/// Storage keys used by the session core
pub struct StorageKeys;

impl StorageKeys {
    /// Cached session (JSON)
    pub const SESSION: &'static str = "lms.session/v2";

    /// Cached resolved user (JSON)
    pub const USER: &'static str = "lms.user/v2";

    /// Write timestamp of the session record (unix millis)
    pub const TIMESTAMP: &'static str = "lms.timestamp/v2";

    /// Dashboard snapshot auxiliary record (JSON)
    pub const DASHBOARD: &'static str = "lms.dashboard/v2";

    /// Profile auxiliary record (JSON)
    pub const PROFILE: &'static str = "lms.profile/v2";

    /// Set before redirecting to an OAuth provider, cleared once the callback lands
    pub const OAUTH_FLOW: &'static str = "lms.oauth_flow/v2";

    /// Prefix of keys written by the identity provider client
    pub const PROVIDER_PREFIX: &'static str = "sb-";

    /// Keys owned by the session cache and cleared with it.
    pub const OWNED: [&'static str; 5] = [
        Self::SESSION,
        Self::USER,
        Self::TIMESTAMP,
        Self::DASHBOARD,
        Self::PROFILE,
    ];

    /// Superseded keys from earlier client versions. Purged on clear and aged
    /// out by the daemon's cleanup pass.
    pub const LEGACY: [&'static str; 9] = [
        "lms_session",
        "lms_user",
        "lms_session_timestamp",
        "lms_dashboard",
        "lms_profile",
        "session_cache",
        "user_cache",
        "auth_user",
        "supabase.auth.token",
    ];

    pub fn is_legacy(key: &str) -> bool {
        Self::LEGACY.contains(&key)
    }

    /// Classify a raw storage key for inspection output.
    pub fn classify(key: &str) -> KeyClass {
        if Self::OWNED.contains(&key) || key == Self::OAUTH_FLOW {
            KeyClass::Owned
        } else if Self::is_legacy(key) {
            KeyClass::Legacy
        } else if key.starts_with(Self::PROVIDER_PREFIX) {
            KeyClass::Provider
        } else {
            KeyClass::Other
        }
    }
}

/// Ownership class of a storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Owned,
    Legacy,
    Provider,
    Other,
}

impl KeyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyClass::Owned => "owned",
            KeyClass::Legacy => "legacy",
            KeyClass::Provider => "provider",
            KeyClass::Other => "other",
        }
    }
}
