//! Authentication and request-logging middleware.
//!
//! Grounded on `gateway::middleware`'s `auth_middleware`/`AuthState`/
//! `Claims`/`UserContext` JWT-bearer pattern, narrowed to this service's
//! smaller route surface: only the order-transition endpoints require a
//! bearer token — webhook ingestion and health/readiness stay public so the
//! messaging gateway and the orchestrator's own load balancer never need a
//! credential.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use orchestrator_common::config::AppConfig;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::models::{ApiResponse, ErrorResponse};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
}

#[derive(Clone)]
pub struct AuthState {
    pub config: Arc<AppConfig>,
}

/// Bearer-JWT gate for every route outside [`is_public_endpoint`]. Missing,
/// malformed, or expired tokens never reach a handler.
pub async fn auth_middleware(State(auth_state): State<AuthState>, mut request: Request, next: Next) -> Result<Response, Response> {
    let path = request.uri().path();
    if is_public_endpoint(path) {
        return Ok(next.run(request).await);
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        warn!(path, "request missing bearer token");
        return Err(unauthorized_response("missing_token", "Authorization header missing or malformed"));
    };

    let validation = Validation::default();
    let decoding_key = DecodingKey::from_secret(auth_state.config.jwt_secret.as_bytes());
    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(token_data) => {
            request.extensions_mut().insert(UserContext { user_id: token_data.claims.sub });
            Ok(next.run(request).await)
        }
        Err(err) => {
            warn!(path, error = %err, "jwt validation failed");
            Err(unauthorized_response("authentication_failed", "Invalid or expired bearer token"))
        }
    }
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let body = Json(ApiResponse::<()>::error(ErrorResponse { error: code.to_string(), message: message.to_string(), details: None }));
    (StatusCode::UNAUTHORIZED, body).into_response()
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health" | "/ready" | "/metrics") || path.starts_with("/api/v1/whatsapp/")
}

/// Logs method, path, status, and latency for every request, and bumps the
/// request/error counters the `/metrics` handler reports.
pub async fn logging_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();
    state.request_count.fetch_add(1, Ordering::Relaxed);
    if status.is_server_error() || status.is_client_error() {
        state.error_count.fetch_add(1, Ordering::Relaxed);
    }

    info!(method = %method, uri = %uri, status = %status.as_u16(), duration_ms = duration.as_millis(), "request processed");
    response
}

/// Permissive CORS: the messaging gateway and any admin console are
/// first-party callers, not untrusted browser origins with credentials to
/// protect, so there is no `GatewayConfig`-style allow-list to thread
/// through here.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}
