//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// OAuth flow error, including provider-reported callback errors
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// The URL handed to the callback handler carries no OAuth parameters
    /// and no OAuth flow is in progress
    #[error("Not an OAuth callback")]
    NotOAuthCallback,

    /// The provider refused the refresh token (revoked, reused or unknown)
    #[error("Refresh token rejected: {0}")]
    RefreshTokenRejected(String),

    /// Session not found
    #[error("Not logged in")]
    NotLoggedIn,

    /// Session was invalidated server-side
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Non-success HTTP status from the provider or row store
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] session_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network unavailable and timeouts
    /// - HTTP 5xx and 429 responses
    /// - Connection failures
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::NetworkUnavailable => true,
            AuthError::Timeout => true,
            AuthError::Status { status, .. } => *status >= 500 || *status == 429,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error() || status.as_u16() == 429;
                }
                false
            }
            _ => false,
        }
    }

    /// Returns true if the provider definitively rejected the refresh token.
    pub fn is_refresh_token_rejected(&self) -> bool {
        matches!(self, AuthError::RefreshTokenRejected(_))
    }

    /// Returns true if the operation did not apply to its input at all.
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, AuthError::NotOAuthCallback)
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
