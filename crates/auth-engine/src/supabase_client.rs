//! Supabase GoTrue and REST client.
//!
//! Implements the identity provider, the user directory and the audit log
//! against a Supabase project. The provider session is persisted in the
//! durable store under `sb-<project_ref>-auth-token`, next to (but separate
//! from) the session cache's own keys.

use crate::oauth::{OAuthCallbackParams, PkcePair};
use crate::provider::{AuditLog, AuthEventHub, AuthSubscription, IdentityProvider, UserDirectory};
use crate::types::{AuditEntry, AuthChangeEvent, AuthUser, Role, Session, SubjectIdentity};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use serde::Deserialize;
use session_config_and_utils::{Clock, Config};
use session_storage::KeyValueStore;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Lifetime assumed when a token response carries neither expiry field.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Error markers GoTrue uses when a refresh token is no longer usable.
const REFRESH_REJECTION_MARKERS: [&str; 4] = [
    "refresh_token_not_found",
    "refresh_token_already_used",
    "invalid_grant",
    "Invalid Refresh Token",
];

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

/// Pull a readable message out of a GoTrue/PostgREST error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|field| value.get(field).and_then(|v| v.as_str()).map(String::from))
        })
        .unwrap_or_else(|| summarize_response_body(body))
}

fn is_refresh_rejection(status: u16, body: &str) -> bool {
    (status == 400 || status == 401)
        && REFRESH_REJECTION_MARKERS
            .iter()
            .any(|marker| body.contains(marker))
}

/// GoTrue token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self, now_secs: i64) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| now_secs + self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
            expires_at,
            user: SubjectIdentity {
                id: self.user.id,
                email: self.user.email,
            },
        }
    }
}

/// GoTrue user response.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    #[serde(default)]
    role: Option<String>,
}

/// Supabase-backed identity provider, user directory and audit log.
pub struct SupabaseAuthClient {
    http_client: reqwest::Client,
    api_url: String,
    publishable_key: String,
    project_ref: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    events: AuthEventHub,
}

impl SupabaseAuthClient {
    /// Create a client for the project configured in `config`.
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        let url = Url::parse(&config.supabase_url)?;
        let project_ref = url
            .host_str()
            .and_then(|host| host.split('.').next())
            .filter(|label| !label.is_empty())
            .ok_or_else(|| AuthError::Config(format!("no host in {}", config.supabase_url)))?
            .to_string();

        Ok(Self {
            http_client: reqwest::Client::new(),
            api_url: config.supabase_url.trim_end_matches('/').to_string(),
            publishable_key: config.supabase_publishable_key.clone(),
            project_ref,
            store,
            clock,
            events: AuthEventHub::new(),
        })
    }

    pub fn project_ref(&self) -> &str {
        &self.project_ref
    }

    /// Durable key of the provider's own session record.
    pub fn storage_key(&self) -> String {
        format!("sb-{}-auth-token", self.project_ref)
    }

    fn code_verifier_key(&self) -> String {
        format!("{}-code-verifier", self.storage_key())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    /// Build the REST API URL for a table.
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn stored_session(&self) -> AuthResult<Option<Session>> {
        let key = self.storage_key();
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Stored provider session is unreadable, dropping it");
                self.store.delete(&key)?;
                Ok(None)
            }
        }
    }

    fn persist(&self, session: &Session) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        self.store.set(&self.storage_key(), &raw)?;
        Ok(())
    }

    fn drop_stored(&self) {
        if let Err(e) = self.store.delete(&self.storage_key()) {
            warn!(error = %e, "Failed to drop stored provider session");
        }
    }

    async fn status_error(response: reqwest::Response, context: &str) -> AuthError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(
            status = %status,
            body_summary = %summarize_response_body(&body),
            "{} failed",
            context
        );
        AuthError::Status {
            status: status.as_u16(),
            message: format!("{}: {}", context, error_message(&body)),
        }
    }

    /// Verify an access token with `GET /auth/v1/user`.
    async fn fetch_user(&self, access_token: &str) -> AuthResult<UserResponse> {
        let response = self
            .http_client
            .get(self.auth_url("user"))
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "User verification").await);
        }

        let user: UserResponse = response.json().await?;
        debug!(user_id = %user.id, "Session verified with server");
        Ok(user)
    }

    async fn post_token(&self, grant_type: &str, body: serde_json::Value) -> AuthResult<Session> {
        let response = self
            .http_client
            .post(self.auth_url(&format!("token?grant_type={}", grant_type)))
            .header("apikey", &self.publishable_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = %status,
                grant_type,
                body_summary = %summarize_response_body(&body),
                "Token request failed"
            );
            let message = error_message(&body);
            if grant_type == "refresh_token" && is_refresh_rejection(status.as_u16(), &body) {
                return Err(AuthError::RefreshTokenRejected(message));
            }
            if grant_type == "password" && status.as_u16() == 400 {
                return Err(AuthError::InvalidCredentials(message));
            }
            return Err(AuthError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let data: TokenResponse = response.json().await?;
        Ok(data.into_session(self.clock.now_secs()))
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = self
            .post_token(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        self.persist(&session)?;
        info!(user_id = %session.user.id, "Login successful");
        self.events
            .emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Build the authorize URL for a third-party provider and remember the
    /// PKCE verifier for the callback.
    pub fn oauth_authorize_url(&self, provider: &str, redirect_to: &str) -> AuthResult<String> {
        let pkce = PkcePair::generate();
        self.store.set(&self.code_verifier_key(), &pkce.verifier)?;

        let url = Url::parse_with_params(
            &self.auth_url("authorize"),
            &[
                ("provider", provider),
                ("redirect_to", redirect_to),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "s256"),
            ],
        )?;
        Ok(url.to_string())
    }

    fn with_bearer(&self, builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.publishable_key)
            .header("Authorization", format!("Bearer {}", token))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuthClient {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let Some(session) = self.stored_session()? else {
            return Ok(None);
        };

        if session.is_expired(self.clock.now_secs()) {
            info!(user_id = %session.user.id, "Stored session expired, refreshing");
            return match self.refresh_session(&session).await {
                Ok(refreshed) => Ok(Some(refreshed)),
                Err(e) if e.is_refresh_token_rejected() => Ok(None),
                Err(e) => Err(e),
            };
        }

        match self.fetch_user(&session.access_token).await {
            Ok(user) => {
                let mut session = session;
                if user.id != session.user.id || user.email != session.user.email {
                    session.user = SubjectIdentity {
                        id: user.id,
                        email: user.email,
                    };
                    self.persist(&session)?;
                }
                Ok(Some(session))
            }
            Err(AuthError::Status { status, .. }) if status == 401 || status == 403 => {
                warn!(user_id = %session.user.id, "Server rejected stored session");
                self.drop_stored();
                self.events.emit(AuthChangeEvent::SignedOut, None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_session(&self, current: &Session) -> AuthResult<Session> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshTokenRejected("no refresh token".to_string()))?;

        match self
            .post_token(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await
        {
            Ok(session) => {
                self.persist(&session)?;
                info!(user_id = %session.user.id, expires_at = session.expires_at, "Token refreshed");
                self.events
                    .emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
                Ok(session)
            }
            Err(e) => {
                if e.is_refresh_token_rejected() {
                    self.drop_stored();
                    self.events.emit(AuthChangeEvent::SignedOut, None);
                }
                Err(e)
            }
        }
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let stored = self.stored_session().ok().flatten();
        self.drop_stored();
        self.events.emit(AuthChangeEvent::SignedOut, None);

        let Some(session) = stored else {
            return Ok(());
        };

        let response = self
            .with_bearer(
                self.http_client.post(self.auth_url("logout?scope=local")),
                &session.access_token,
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "Logout").await);
        }

        info!(user_id = %session.user.id, "Logged out");
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let initial = self.stored_session().ok().flatten();
        self.events.subscribe(initial)
    }

    async fn absorb_oauth_callback(&self, params: &OAuthCallbackParams) -> AuthResult<()> {
        if let Some(err) = params.into_error() {
            return Err(err);
        }

        let session = if let Some(access_token) = &params.access_token {
            let user = self.fetch_user(access_token).await?;
            let now = self.clock.now_secs();
            Session {
                access_token: access_token.clone(),
                refresh_token: params.refresh_token.clone(),
                token_type: params
                    .token_type
                    .clone()
                    .unwrap_or_else(|| "bearer".to_string()),
                expires_at: params
                    .expires_at
                    .unwrap_or_else(|| now + params.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
                user: SubjectIdentity {
                    id: user.id,
                    email: user.email,
                },
            }
        } else if let Some(code) = &params.code {
            let verifier_key = self.code_verifier_key();
            let verifier = self
                .store
                .get(&verifier_key)?
                .ok_or_else(|| AuthError::OAuth("missing PKCE code verifier".to_string()))?;
            let session = self
                .post_token(
                    "pkce",
                    serde_json::json!({ "auth_code": code, "code_verifier": verifier }),
                )
                .await?;
            self.store.delete(&verifier_key)?;
            session
        } else {
            return Ok(());
        };

        self.persist(&session)?;
        info!(user_id = %session.user.id, "OAuth session established");
        self.events
            .emit(AuthChangeEvent::SignedIn, Some(session));
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SupabaseAuthClient {
    async fn fetch_role(&self, user_id: &str, session: &Session) -> AuthResult<Option<Role>> {
        let url = format!(
            "{}?id=eq.{}&select=role&limit=1",
            self.rest_url("users"),
            user_id
        );

        let response = self
            .with_bearer(self.http_client.get(&url), &session.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "Role lookup").await);
        }

        let rows: Vec<RoleRow> = response.json().await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| row.role.as_deref().map(Role::parse_or_default).unwrap_or_default()))
    }

    async fn create_user(&self, user: &AuthUser, session: &Session) -> AuthResult<()> {
        let response = self
            .with_bearer(self.http_client.post(self.rest_url("users")), &session.access_token)
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates")
            .json(&serde_json::json!({
                "id": user.id,
                "email": user.email,
                "role": user.role,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "User record creation").await);
        }

        info!(user_id = %user.id, role = %user.role, "User record created");
        Ok(())
    }
}

#[async_trait]
impl AuditLog for SupabaseAuthClient {
    async fn record(&self, entry: AuditEntry) -> AuthResult<()> {
        let token = self
            .stored_session()
            .ok()
            .flatten()
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.publishable_key.clone());

        let response = self
            .with_bearer(self.http_client.post(self.rest_url("audit_logs")), &token)
            .header("Content-Type", "application/json")
            .json(&entry)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, "Audit insert").await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_config_and_utils::ManualClock;
    use session_storage::MemoryStore;

    fn client(store: Arc<MemoryStore>) -> SupabaseAuthClient {
        let config = Config {
            supabase_url: "https://abcd1234.supabase.co/".to_string(),
            ..Config::default()
        };
        SupabaseAuthClient::new(&config, store, Arc::new(ManualClock::new(1_000_000))).unwrap()
    }

    #[test]
    fn test_project_ref_and_keys() {
        let client = client(Arc::new(MemoryStore::new()));
        assert_eq!(client.project_ref(), "abcd1234");
        assert_eq!(client.storage_key(), "sb-abcd1234-auth-token");
        assert_eq!(
            client.auth_url("user"),
            "https://abcd1234.supabase.co/auth/v1/user"
        );
        assert_eq!(
            client.rest_url("users"),
            "https://abcd1234.supabase.co/rest/v1/users"
        );
    }

    #[test]
    fn test_refresh_rejection_detection() {
        assert!(is_refresh_rejection(
            400,
            r#"{"error":"invalid_grant","error_description":"Invalid Refresh Token: Refresh Token Not Found"}"#
        ));
        assert!(is_refresh_rejection(400, r#"{"code":"refresh_token_not_found"}"#));
        assert!(!is_refresh_rejection(500, "invalid_grant"));
        assert!(!is_refresh_rejection(400, r#"{"error":"validation_failed"}"#));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Bad token"}"#),
            "Bad token"
        );
        assert_eq!(error_message(r#"{"msg":"nope"}"#), "nope");
        assert!(error_message("<html>").starts_with("len=6"));
    }

    #[test]
    fn test_token_response_expiry() {
        let data: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":60,"user":{"id":"u"}}"#,
        )
        .unwrap();
        let session = data.into_session(100);
        assert_eq!(session.expires_at, 160);
        assert_eq!(session.token_type, "bearer");
    }

    #[tokio::test]
    async fn test_get_session_without_stored_session_is_none() {
        let client = client(Arc::new(MemoryStore::new()));
        assert!(client.get_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_stored_session_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());
        store.set(&client.storage_key(), "{broken").unwrap();

        assert!(client.get_session().await.unwrap().is_none());
        assert!(!store.has(&client.storage_key()).unwrap());
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_rejected_locally() {
        let client = client(Arc::new(MemoryStore::new()));
        let session = Session {
            access_token: "a".to_string(),
            refresh_token: None,
            token_type: "bearer".to_string(),
            expires_at: 0,
            user: SubjectIdentity {
                id: "u".to_string(),
                email: None,
            },
        };
        let err = client.refresh_session(&session).await.unwrap_err();
        assert!(err.is_refresh_token_rejected());
    }

    #[test]
    fn test_oauth_authorize_url_stores_verifier() {
        let store = Arc::new(MemoryStore::new());
        let client = client(store.clone());
        let url = client
            .oauth_authorize_url("google", "https://lms.dev/auth/callback")
            .unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/auth/v1/authorize");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["provider"], "google");
        assert_eq!(pairs["code_challenge_method"], "s256");

        let verifier = store.get("sb-abcd1234-auth-token-code-verifier").unwrap().unwrap();
        assert_eq!(
            PkcePair::from_verifier(verifier).challenge,
            pairs["code_challenge"]
        );
    }

    #[tokio::test]
    async fn test_absorb_reports_provider_error() {
        let client = client(Arc::new(MemoryStore::new()));
        let params =
            OAuthCallbackParams::from_url("https://lms.dev/cb?error=access_denied").unwrap();
        assert!(matches!(
            client.absorb_oauth_callback(&params).await,
            Err(AuthError::OAuth(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_out_without_session_emits_signed_out() {
        let client = client(Arc::new(MemoryStore::new()));
        let mut sub = client.on_auth_state_change();
        client.sign_out().await.unwrap();

        assert_eq!(sub.recv().await.unwrap().event, AuthChangeEvent::InitialSession);
        assert_eq!(sub.recv().await.unwrap().event, AuthChangeEvent::SignedOut);
    }
}
