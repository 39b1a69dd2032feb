//! Configuration loader with environment variable substitution.
//!
//! Loads configuration from:
//! 1. Default values
//! 2. `config.yaml` in the current directory
//! 3. `~/.config/anthropic-proxy/config.yaml` in the home directory
//! 4. Environment variables with the `ANTHROPIC_PROXY_` prefix

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Anthropic's fixed OAuth client identifier for the Claude Code / Max flow.
const DEFAULT_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const DEFAULT_AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
const DEFAULT_TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const DEFAULT_REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
const DEFAULT_SCOPES: &str = "org:create_api_key user:profile user:inference";
const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1";

/// The anthropic-beta flags required for OAuth-authenticated traffic to be
/// accepted by the messages endpoint.
const DEFAULT_BETA_FLAGS: &[&str] = &[
    "claude-code-20250219",
    "oauth-2025-04-20",
    "interleaved-thinking-2025-05-14",
    "fine-grained-tool-streaming-2025-05-14",
];

/// Top-level configuration for the proxy.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_beta_flags")]
    pub anthropic_beta: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// HTTP bind configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// OAuth endpoints and client identity, grounded in the upstream proxy's
/// exact defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
        }
    }
}

fn default_port() -> u16 {
    8100
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_authorize_url() -> String {
    DEFAULT_AUTHORIZE_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_token_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anthropic-proxy")
        .join("tokens.json")
}

fn default_beta_flags() -> Vec<String> {
    DEFAULT_BETA_FLAGS.iter().map(|s| s.to_string()).collect()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load configuration from defaults, an optional config file, and
/// environment variables under the `ANTHROPIC_PROXY_` prefix.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder()
        .set_default("server.port", default_port())?
        .set_default("server.host", default_host())?
        .set_default("oauth.client_id", default_client_id())?
        .set_default("oauth.authorize_url", default_authorize_url())?
        .set_default("oauth.token_url", default_token_url())?
        .set_default("oauth.redirect_uri", default_redirect_uri())?
        .set_default("oauth.scopes", default_scopes())?
        .set_default("api_url", default_api_url())?
        .set_default(
            "token_file",
            default_token_file().to_string_lossy().to_string(),
        )?
        .set_default("anthropic_beta", default_beta_flags())?
        .set_default("request_timeout_secs", default_request_timeout_secs() as i64)?
        .set_default("log_level", default_log_level())?;

    let project_config = PathBuf::from("config.yaml");
    if project_config.exists() {
        builder = builder.add_source(File::from(project_config).required(false));
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".config/anthropic-proxy/config.yaml");
        if home_config.exists() {
            builder = builder.add_source(File::from(home_config).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("ANTHROPIC_PROXY")
            .separator("_")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_upstream() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8100);
        assert_eq!(server.host, "0.0.0.0");
    }

    #[test]
    fn oauth_defaults_match_upstream() {
        let oauth = OAuthConfig::default();
        assert_eq!(oauth.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(oauth.authorize_url, DEFAULT_AUTHORIZE_URL);
        assert_eq!(oauth.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn beta_flags_include_oauth_flag() {
        let flags = default_beta_flags();
        assert!(flags.iter().any(|f| f == "oauth-2025-04-20"));
    }
}
