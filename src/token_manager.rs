//! Persisted OAuth token storage with single-flight refresh.
//!
//! Everything that touches the token file or the in-flight PKCE challenge
//! goes through one [`tokio::sync::Mutex`]; holding it across the whole
//! load/refresh/save sequence is what gives concurrent callers single-flight
//! refresh semantics without any extra bookkeeping.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::oauth::{generate_pkce, OAuthClient, PkceChallenge, TokenSet};

/// Safety margin subtracted from a token's stated lifetime before it is
/// proactively refreshed.
const EXPIRY_BUFFER: i64 = 60;

struct Inner {
    cached: Option<TokenSet>,
    pending_pkce: Option<PkceChallenge>,
}

/// Owns the persisted token file and coordinates refresh.
pub struct TokenManager {
    path: PathBuf,
    client: OAuthClient,
    inner: Mutex<Inner>,
}

impl TokenManager {
    pub fn new(path: PathBuf, client: OAuthClient) -> Self {
        Self {
            path,
            client,
            inner: Mutex::new(Inner {
                cached: None,
                pending_pkce: None,
            }),
        }
    }

    /// Begin an authorization attempt: generate PKCE, remember the verifier
    /// for the matching `complete_auth_flow` call, and return the URL the
    /// user must visit.
    pub async fn start_auth_flow(&self) -> (String, String) {
        let pkce = generate_pkce();
        let url = self.client.build_auth_url(&pkce);
        let verifier = pkce.verifier.clone();

        let mut inner = self.inner.lock().await;
        inner.pending_pkce = Some(pkce);

        (url, verifier)
    }

    /// Complete an authorization attempt. If `verifier` is omitted, the
    /// verifier stashed by the most recent `start_auth_flow` call is used.
    pub async fn complete_auth_flow(&self, code: &str, verifier: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let verifier = match verifier {
            Some(v) => v.to_string(),
            None => inner
                .pending_pkce
                .as_ref()
                .map(|p| p.verifier.clone())
                .context("no pending authorization attempt")?,
        };

        let tokens = self.client.exchange_code(code, &verifier).await?;
        self.write_tokens(&tokens)?;
        inner.cached = Some(tokens);
        inner.pending_pkce = None;

        info!("oauth authorization completed");
        Ok(())
    }

    /// Clear any stored tokens, forcing re-authentication.
    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cached = None;
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("failed to remove token file")?;
        }
        Ok(())
    }

    /// Return the persisted token set, if any, reading the cache or the
    /// file on disk. A corrupt file is treated as "no tokens", not a
    /// fatal error.
    pub async fn load(&self) -> Option<TokenSet> {
        let mut inner = self.inner.lock().await;
        self.load_locked(&mut inner)
    }

    fn load_locked(&self, inner: &mut Inner) -> Option<TokenSet> {
        if let Some(tokens) = &inner.cached {
            return Some(tokens.clone());
        }

        let data = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<TokenSet>(&data) {
            Ok(tokens) => {
                inner.cached = Some(tokens.clone());
                Some(tokens)
            }
            Err(e) => {
                warn!("token file is corrupt, ignoring: {}", e);
                None
            }
        }
    }

    /// Returns a currently-valid access token, refreshing if the cached
    /// token is within the expiry buffer of expiring. Returns `None` if no
    /// tokens are stored or refresh fails (in which case stored tokens are
    /// cleared and the caller must re-authenticate).
    pub async fn get_valid_token(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let tokens = self.load_locked(&mut inner)?;

        if !tokens.is_expired_within(Duration::seconds(EXPIRY_BUFFER)) {
            return Some(tokens.access_token);
        }

        info!("access token near expiry, refreshing");
        match self.client.refresh(&tokens.refresh_token).await {
            Ok(refreshed) => {
                if let Err(e) = self.write_tokens(&refreshed) {
                    warn!("failed to persist refreshed tokens: {}", e);
                }
                let access_token = refreshed.access_token.clone();
                inner.cached = Some(refreshed);
                Some(access_token)
            }
            Err(e) => {
                warn!("token refresh failed, clearing stored tokens: {}", e);
                inner.cached = None;
                let _ = std::fs::remove_file(&self.path);
                None
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        self.load().await.is_some()
    }

    /// Persist the token set with owner-only file permissions established
    /// before any credential bytes are written, not as a follow-up chmod.
    fn write_tokens(&self, tokens: &TokenSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("failed to create token directory")?;
        }

        let json = serde_json::to_vec_pretty(tokens).context("failed to serialize tokens")?;
        write_with_owner_only_permissions(&self.path, &json)
    }
}

#[cfg(unix)]
fn write_with_owner_only_permissions(path: &std::path::Path, data: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .context("failed to open token file")?;
    file.write_all(data).context("failed to write token file")?;
    Ok(())
}

#[cfg(not(unix))]
fn write_with_owner_only_permissions(path: &std::path::Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).context("failed to write token file")
}
