//! OAuth redirect parsing and PKCE helpers.

use crate::{AuthError, AuthResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use url::Url;

/// Parameters an OAuth redirect may carry, from the query string or the
/// fragment (implicit flow puts tokens in the fragment).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthCallbackParams {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl OAuthCallbackParams {
    /// Parse a callback URL. Fragment values win over query values.
    pub fn from_url(raw: &str) -> AuthResult<Self> {
        let url = Url::parse(raw)?;
        let mut params = Self::default();

        for (key, value) in url.query_pairs() {
            params.apply(&key, value.into_owned());
        }
        if let Some(fragment) = url.fragment() {
            for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
                params.apply(&key, value.into_owned());
            }
        }

        Ok(params)
    }

    fn apply(&mut self, key: &str, value: String) {
        if value.is_empty() {
            return;
        }
        match key {
            "code" => self.code = Some(value),
            "access_token" => self.access_token = Some(value),
            "refresh_token" => self.refresh_token = Some(value),
            "token_type" => self.token_type = Some(value),
            "expires_in" => self.expires_in = value.parse().ok(),
            "expires_at" => self.expires_at = value.parse().ok(),
            "state" => self.state = Some(value),
            "error" => self.error = Some(value),
            "error_description" => self.error_description = Some(value),
            _ => {}
        }
    }

    /// Whether the URL looks like an OAuth redirect at all.
    pub fn has_oauth_params(&self) -> bool {
        self.code.is_some() || self.access_token.is_some() || self.error.is_some()
    }

    /// Human-readable provider error, if the redirect reports one.
    pub fn error_message(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (_, Some(description)) => Some(description.clone()),
            (Some(error), None) => Some(error.clone()),
            (None, None) => None,
        }
    }

    pub fn into_error(&self) -> Option<AuthError> {
        self.error_message().map(AuthError::OAuth)
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        Self {
            challenge: URL_SAFE_NO_PAD.encode(digest),
            verifier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pkce_code_from_query() {
        let params =
            OAuthCallbackParams::from_url("https://lms.dev/auth/callback?code=abc123&state=xyz")
                .unwrap();
        assert_eq!(params.code.as_deref(), Some("abc123"));
        assert_eq!(params.state.as_deref(), Some("xyz"));
        assert!(params.has_oauth_params());
        assert!(params.error_message().is_none());
    }

    #[test]
    fn test_parse_implicit_tokens_from_fragment() {
        let params = OAuthCallbackParams::from_url(
            "https://lms.dev/auth/callback#access_token=at&refresh_token=rt&expires_in=3600&token_type=bearer",
        )
        .unwrap();
        assert_eq!(params.access_token.as_deref(), Some("at"));
        assert_eq!(params.refresh_token.as_deref(), Some("rt"));
        assert_eq!(params.expires_in, Some(3600));
        assert!(params.has_oauth_params());
    }

    #[test]
    fn test_parse_error_prefers_description() {
        let params = OAuthCallbackParams::from_url(
            "https://lms.dev/auth/callback?error=access_denied&error_description=User+cancelled",
        )
        .unwrap();
        assert!(params.has_oauth_params());
        assert_eq!(params.error_message().as_deref(), Some("User cancelled"));
        assert!(matches!(params.into_error(), Some(AuthError::OAuth(_))));
    }

    #[test]
    fn test_plain_url_has_no_oauth_params() {
        let params = OAuthCallbackParams::from_url("https://lms.dev/dashboard?tab=courses").unwrap();
        assert!(!params.has_oauth_params());
        assert_eq!(params, OAuthCallbackParams::default());
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let params = OAuthCallbackParams::from_url("https://lms.dev/cb?code=&error=").unwrap();
        assert!(!params.has_oauth_params());
    }

    #[test]
    fn test_invalid_url_is_error() {
        assert!(OAuthCallbackParams::from_url("not a url").is_err());
    }

    #[test]
    fn test_pkce_challenge_matches_rfc_example() {
        // RFC 7636 appendix B
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string());
        assert_eq!(pair.challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pkce_generate_is_random() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_eq!(a.verifier.len(), 43);
    }
}
