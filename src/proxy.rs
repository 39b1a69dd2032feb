//! HTTP surface: the OAuth endpoints, the model list, and the
//! chat-completions dispatcher that drives the translator and the
//! streaming transcoder.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::streaming::transcode_response;
use crate::token_manager::TokenManager;
use crate::translator::{translate_request, translate_response, ChatCompletionRequest};

/// Shared state for every request handler.
#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<AppConfig>,
    pub client: Client,
    pub tokens: Arc<TokenManager>,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("not authenticated; visit /auth/start")]
    Unauthenticated,

    #[error("upstream rejected the request ({status}): {body}")]
    UpstreamRejection { status: StatusCode, body: String },

    #[error("upstream request failed: {0}")]
    UpstreamTransport(#[from] reqwest::Error),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("oauth exchange failed: {0}")]
    OAuthExchangeFailed(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ProxyError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ProxyError::UpstreamRejection { status, body } => {
                return (
                    *status,
                    Json(json!({"error": {"message": body, "type": "upstream_error"}})),
                )
                    .into_response();
            }
            ProxyError::UpstreamTransport(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ProxyError::MalformedRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ProxyError::OAuthExchangeFailed(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        let body = json!({"error": {"message": message, "type": "proxy_error"}});
        (status, Json(body)).into_response()
    }
}

pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/health", get(health))
        .route("/auth/status", get(auth_status))
        .route("/auth/start", get(auth_start))
        .route("/auth/callback", post(auth_callback))
        .route("/auth/logout", post(auth_logout))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

async fn health(State(state): State<ProxyState>) -> impl IntoResponse {
    let authenticated = state.tokens.is_authenticated().await;
    Json(json!({"status": "ok", "authenticated": authenticated}))
}

async fn auth_status(State(state): State<ProxyState>) -> impl IntoResponse {
    match state.tokens.load().await {
        Some(tokens) => Json(json!({
            "authenticated": true,
            "expires_at": tokens.expires_at,
            "is_expired": tokens.is_expired_within(chrono::Duration::zero()),
        })),
        None => Json(json!({"authenticated": false})),
    }
}

async fn auth_start(State(state): State<ProxyState>) -> impl IntoResponse {
    let (url, verifier) = state.tokens.start_auth_flow().await;
    Json(json!({
        "url": url,
        "verifier": verifier,
        "next_step": "visit the url, then POST the returned code to /auth/callback",
    }))
}

#[derive(Debug, Deserialize)]
struct AuthCallbackRequest {
    code: String,
    #[serde(default)]
    verifier: Option<String>,
}

async fn auth_callback(
    State(state): State<ProxyState>,
    body: Bytes,
) -> Result<impl IntoResponse, ProxyError> {
    let request: AuthCallbackRequest =
        serde_json::from_slice(&body).map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    state
        .tokens
        .complete_auth_flow(&request.code, request.verifier.as_deref())
        .await
        .map_err(|e| ProxyError::OAuthExchangeFailed(e.to_string()))?;

    Ok(Json(json!({"status": "authenticated"})))
}

async fn auth_logout(State(state): State<ProxyState>) -> Result<impl IntoResponse, ProxyError> {
    state
        .tokens
        .clear()
        .await
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;
    Ok(Json(json!({"status": "logged_out"})))
}

async fn list_models() -> impl IntoResponse {
    let ids = [
        "claude-3-5-sonnet-20241022",
        "claude-3-5-haiku-20241022",
        "claude-3-opus-20240229",
        "claude-sonnet-4-20250514",
        "claude-opus-4-20250514",
    ];
    let data: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "object": "model", "owned_by": "anthropic"}))
        .collect();
    Json(json!({"object": "list", "data": data}))
}

async fn chat_completions(
    State(state): State<ProxyState>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request: ChatCompletionRequest =
        serde_json::from_slice(&body).map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    let access_token = state
        .tokens
        .get_valid_token()
        .await
        .ok_or(ProxyError::Unauthenticated)?;

    let upstream_body = translate_request(&request)
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    let url = format!("{}/messages", state.config.api_url);
    let beta_header = state.config.anthropic_beta.join(",");

    let mut upstream_request = state
        .client
        .post(&url)
        .header("Authorization", format!("Bearer {}", access_token))
        .header("anthropic-version", "2023-06-01")
        .header("anthropic-beta", beta_header)
        .header("content-type", "application/json")
        .json(&upstream_body);

    // A streaming completion can legitimately run well past the configured
    // timeout; only the non-streaming path bounds the whole request here.
    // The streaming path is instead bounded per-chunk in the transcoder.
    if !request.stream {
        upstream_request =
            upstream_request.timeout(Duration::from_secs(state.config.request_timeout_secs));
    }

    info!(model = %request.model, stream = request.stream, "dispatching completion");
    let response = upstream_request.send().await?;

    if request.stream {
        if !response.status().is_success() {
            warn!(status = %response.status(), "upstream rejected streaming request");
        }
        let chunk_timeout = Duration::from_secs(state.config.request_timeout_secs);
        let body_stream = transcode_response(response, request.model.clone(), chunk_timeout).await;
        let body = Body::from_stream(body_stream);
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .body(body)
            .unwrap());
    }

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(ProxyError::UpstreamRejection { status, body });
    }

    let upstream_json: Value = response
        .json()
        .await
        .map_err(ProxyError::UpstreamTransport)?;
    let downstream = translate_response(&upstream_json, &request.model);

    Ok(Json(downstream).into_response())
}

/// Bind and serve, returning once the listener is shut down.
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // No blanket per-request timeout here: a streaming completion can
    // legitimately run long. Only the connection phase is bounded; the
    // non-streaming path adds its own request timeout per call, and the
    // streaming path bounds reads per-chunk in the transcoder instead.
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let oauth_client =
        crate::oauth::OAuthClient::new(config.oauth.clone());
    let tokens = Arc::new(TokenManager::new(config.token_file.clone(), oauth_client));

    info!(authenticated = tokens.is_authenticated().await, "startup auth status");

    let state = ProxyState {
        config: Arc::new(config),
        client,
        tokens,
    };

    let app = create_router(state);

    info!(address = %addr, "starting proxy server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bind and serve with a graceful-shutdown signal, for embedding in tests
/// or in a supervising process.
pub async fn start_server_with_shutdown(
    config: AppConfig,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    // No blanket per-request timeout here: a streaming completion can
    // legitimately run long. Only the connection phase is bounded; the
    // non-streaming path adds its own request timeout per call, and the
    // streaming path bounds reads per-chunk in the transcoder instead.
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let oauth_client =
        crate::oauth::OAuthClient::new(config.oauth.clone());
    let tokens = Arc::new(TokenManager::new(config.token_file.clone(), oauth_client));

    let state = ProxyState {
        config: Arc::new(config),
        client,
        tokens,
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}
