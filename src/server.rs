use crate::client::BackendClient;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::logging::SharedLogger;
use crate::proxy::{self, SseStream};
use crate::registry::{Model, ModelRegistry};
use crate::translate::anthropic_types::{
    CountTokensRequest, CountTokensResponse, ErrorResponse, MessagesRequest,
};
use crate::translate::openai_types::ChatErrorResponse;
use crate::translate::tokens::estimate_input_tokens;

use axum::extract::{OriginalUri, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Prefix of the mount point that carries the caller secret in the path.
const PATH_TOKEN_PREFIX: &str = "/jb/";

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: ModelRegistry,
    pub client: reqwest::Client,
    /// Secret callers must present.
    pub gateway_key: String,
    /// Secret forwarded to the backend.
    pub provider_key: String,
    pub logger: SharedLogger,
}

impl AppState {
    fn backend_for(&self, model: &Model) -> BackendClient {
        BackendClient::for_model(
            self.client.clone(),
            &self.config.host,
            model,
            self.provider_key.clone(),
        )
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = api_routes();

    Router::new()
        .route("/health", get(handle_health))
        .merge(api.clone())
        .nest("/jb/:token", api)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::from_fn_with_state(state.clone(), journal_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/completions", post(handle_chat_completions))
        .route("/models", get(handle_models))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

async fn require_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let path = request_path(&req);
    if path == "/health" {
        return next.run(req).await;
    }

    let presented = match path.strip_prefix(PATH_TOKEN_PREFIX) {
        Some(rest) => rest.split('/').next().map(str::to_string),
        None => bearer_token(req.headers()),
    };

    match presented {
        Some(token) if secrets_match(&token, &state.gateway_key) => next.run(req).await,
        _ => {
            tracing::debug!(path = %redact_path(&path), "rejected unauthenticated request");
            (StatusCode::UNAUTHORIZED, GatewayError::Unauthorized.to_string()).into_response()
        }
    }
}

async fn journal_requests(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = redact_path(&request_path(&req));
    let started = Instant::now();

    let response = next.run(req).await;

    state
        .logger
        .request(&method, &path, response.status().as_u16(), started.elapsed());
    response
}

/// Path as the client sent it, before any nesting strips a prefix.
fn request_path(req: &Request) -> String {
    req.extensions()
        .get::<OriginalUri>()
        .map_or_else(|| req.uri().path().to_string(), |uri| uri.path().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Hide the path token so secrets never reach the journal.
fn redact_path(path: &str) -> String {
    match path.strip_prefix(PATH_TOKEN_PREFIX) {
        Some(rest) => match rest.split_once('/') {
            Some((_, tail)) => format!("{PATH_TOKEN_PREFIX}<redacted>/{tail}"),
            None => format!("{PATH_TOKEN_PREFIX}<redacted>"),
        },
        None => path.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Error envelopes
// ---------------------------------------------------------------------------

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn record_failure(state: &AppState, route: &str, err: &GatewayError) {
    if err.is_client_error() {
        state.logger.warn("server", format!("{route}: {err}"));
    } else {
        tracing::error!(route, error = %err, "request failed");
        state.logger.error("server", format!("{route}: {err}"));
    }
}

fn anthropic_error(err: &GatewayError) -> Response {
    let body = if err.is_client_error() {
        ErrorResponse::invalid_request(err.to_string())
    } else {
        ErrorResponse::api_error(err.to_string())
    };
    (status_for(err), Json(body)).into_response()
}

fn openai_error(err: &GatewayError) -> Response {
    (status_for(err), Json(ChatErrorResponse::new(err.to_string()))).into_response()
}

fn sse_response(stream: SseStream) -> Response {
    let events = stream.map(|item| {
        item.map(|sse| {
            let event = Event::default().data(sse.data);
            match sse.event {
                Some(name) => event.event(name),
                None => event,
            }
        })
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = GatewayError::invalid_request(format!("Invalid request body: {e}"));
            record_failure(&state, "messages", &err);
            return anthropic_error(&err);
        }
    };

    let model = match state.registry.resolve(&req.model) {
        Ok(m) => m,
        Err(err) => {
            record_failure(&state, "messages", &err);
            return anthropic_error(&err);
        }
    };

    let is_streaming = req.stream.unwrap_or(false);
    tracing::info!(
        model = %req.model,
        backend = %model.id,
        streaming = is_streaming,
        messages = req.messages.len(),
        "messages request"
    );

    let backend = state.backend_for(model);
    let result = if is_streaming {
        proxy::proxy_messages_streaming(&req, model, &backend, &state.logger)
            .await
            .map(sse_response)
    } else {
        proxy::proxy_messages(&req, model, &backend, &state.logger)
            .await
            .map(|resp| Json(resp).into_response())
    };

    result.unwrap_or_else(|err| {
        record_failure(&state, "messages", &err);
        anthropic_error(&err)
    })
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let body: Map<String, Value> = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            let err = GatewayError::invalid_request(format!("Invalid request body: {e}"));
            record_failure(&state, "chat_completions", &err);
            return openai_error(&err);
        }
    };

    let model = match proxy::requested_model(&body).and_then(|name| state.registry.resolve(name)) {
        Ok(m) => m,
        Err(err) => {
            record_failure(&state, "chat_completions", &err);
            return openai_error(&err);
        }
    };

    let is_streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    tracing::info!(
        model = %model.name,
        backend = %model.id,
        streaming = is_streaming,
        "chat completion request"
    );

    let backend = state.backend_for(model);
    let result = if is_streaming {
        proxy::proxy_chat_completion_streaming(body, model, &backend, &state.logger)
            .await
            .map(sse_response)
    } else {
        proxy::proxy_chat_completion(body, model, &backend, &state.logger)
            .await
            .map(|resp| Json(resp).into_response())
    };

    result.unwrap_or_else(|err| {
        record_failure(&state, "chat_completions", &err);
        openai_error(&err)
    })
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match serde_json::from_slice::<CountTokensRequest>(&body) {
        Ok(req) => Json(CountTokensResponse {
            input_tokens: estimate_input_tokens(&req),
        })
        .into_response(),
        Err(e) => {
            let err = GatewayError::invalid_request(format!("Invalid request body: {e}"));
            record_failure(&state, "count_tokens", &err);
            anthropic_error(&err)
        }
    }
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let created = chrono::Utc::now().timestamp();
    let data: Vec<Value> = state
        .registry
        .models()
        .iter()
        .map(|m| {
            serde_json::json!({
                "id": m.name,
                "object": "model",
                "owned_by": state.config.owned_by,
                "created": created,
                "owned": true,
            })
        })
        .collect();

    Json(serde_json::json!({ "object": "list", "data": data }))
}

async fn handle_health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path() {
        assert_eq!(redact_path("/jb/s3cret/v1/messages"), "/jb/<redacted>/v1/messages");
        assert_eq!(redact_path("/jb/s3cret"), "/jb/<redacted>");
        assert_eq!(redact_path("/v1/messages"), "/v1/messages");
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("key", "key"));
        assert!(!secrets_match("kez", "key"));
        assert!(!secrets_match("ke", "key"));
        assert!(!secrets_match("", "key"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&GatewayError::model_not_supported("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&GatewayError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&GatewayError::upstream("boom")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
