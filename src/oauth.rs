//! OAuth 2.0 authorization-code-with-PKCE flow against Anthropic's consumer
//! OAuth endpoints.
//!
//! This module is deliberately stateless: it knows how to build an
//! authorization URL and how to talk to the token endpoint, but it holds no
//! tokens and touches no disk. Token persistence and refresh scheduling live
//! in [`crate::token_manager`].

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::OAuthConfig;

/// A PKCE verifier/challenge pair for a single authorization attempt.
///
/// The verifier doubles as the `state` parameter: since the verifier is
/// unguessable and single-use, there is no need for a separate server-side
/// session to defend against CSRF.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a fresh PKCE verifier/challenge pair.
///
/// The verifier is 32 random bytes, base64url-encoded without padding
/// (RFC 7636 permits 43-128 characters; this yields 43). The challenge is
/// the base64url-nopad encoding of the verifier's SHA-256 digest.
pub fn generate_pkce() -> PkceChallenge {
    let mut verifier_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut verifier_bytes);
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkceChallenge { verifier, challenge }
}

/// An OAuth token set obtained from the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenSet {
    /// True once `now` is within `buffer` of `expires_at`.
    pub fn is_expired_within(&self, buffer: Duration) -> bool {
        Utc::now() >= self.expires_at - buffer
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Split Claude's combined `{code}#{state}` callback value.
///
/// If no `#` is present the whole input is treated as the code with no
/// state suffix.
pub fn parse_auth_code(input: &str) -> (String, Option<String>) {
    match input.find('#') {
        Some(idx) => (input[..idx].to_string(), Some(input[idx + 1..].to_string())),
        None => (input.to_string(), None),
    }
}

/// Stateless client for the three OAuth HTTP operations: building the
/// authorization URL, exchanging a code, and refreshing an access token.
pub struct OAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("Claude Code/1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http, config }
    }

    /// Build the authorization URL the user must visit to approve access.
    pub fn build_auth_url(&self, pkce: &PkceChallenge) -> String {
        let params = [
            ("code", "true"),
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("scope", self.config.scopes.as_str()),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", pkce.verifier.as_str()),
        ];

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.config.authorize_url, query)
    }

    /// Exchange an authorization code (optionally suffixed with `#state`)
    /// and its PKCE verifier for a fresh token set.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet> {
        let (code, state) = parse_auth_code(code);

        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.config.client_id,
            "code": code,
            "state": state,
            "redirect_uri": self.config.redirect_uri,
            "code_verifier": verifier,
        });

        let response = self.send_token_request(body).await?;
        let refresh_token = response
            .refresh_token
            .context("token endpoint did not return a refresh token")?;

        Ok(TokenSet {
            access_token: response.access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        })
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.config.client_id,
            "refresh_token": refresh_token,
        });

        let response = self.send_token_request(body).await?;
        let refresh_token = response.refresh_token.unwrap_or_else(|| refresh_token.to_string());

        Ok(TokenSet {
            access_token: response.access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        })
    }

    async fn send_token_request(&self, body: serde_json::Value) -> Result<TokenResponse> {
        debug!("sending token request to {}", self.config.token_url);

        let response = self
            .http
            .post(&self.config.token_url)
            .json(&body)
            .send()
            .await
            .context("failed to reach token endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("token endpoint returned {}: {}", status, text);
        }

        response
            .json::<TokenResponse>()
            .await
            .context("failed to parse token endpoint response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_vector_matches_hash_formula() {
        let pkce = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
        assert!(pkce.verifier.len() >= 43);
        assert!(pkce
            .verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn pkce_generation_is_random() {
        let a = generate_pkce();
        let b = generate_pkce();
        assert_ne!(a.verifier, b.verifier);
    }

    #[test]
    fn auth_url_carries_verifier_as_state() {
        let config = OAuthConfig::default();
        let client = OAuthClient::new(config);
        let pkce = generate_pkce();
        let url = client.build_auth_url(&pkce);

        assert!(url.starts_with(&client.config.authorize_url));
        assert!(url.contains("code_challenge="));
        assert!(url.contains(&format!("state={}", urlencoding::encode(&pkce.verifier))));
    }

    #[test]
    fn parse_auth_code_splits_on_hash() {
        assert_eq!(
            parse_auth_code("abc123#state456"),
            ("abc123".to_string(), Some("state456".to_string()))
        );
        assert_eq!(parse_auth_code("just_a_code"), ("just_a_code".to_string(), None));
    }

    #[test]
    fn expiry_buffer_triggers_refresh_near_boundary() {
        let soon = TokenSet {
            access_token: "t".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + Duration::seconds(10),
        };
        assert!(soon.is_expired_within(Duration::seconds(60)));

        let later = TokenSet {
            access_token: "t".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + Duration::seconds(600),
        };
        assert!(!later.is_expired_within(Duration::seconds(60)));
    }
}
