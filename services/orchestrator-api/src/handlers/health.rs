//! Liveness, readiness, and metrics handlers.
//!
//! Grounded on `gateway::handlers::health`'s handler-struct + `State`
//! pattern, narrowed: readiness checks the database directly instead of a
//! fleet of gRPC backends, and metrics reports this service's own
//! request/error counters instead of a hand-rolled block of simulated
//! trading gauges.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use orchestrator_core::Context;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::models::{ApiResponse, HealthCheckResponse, ReadyCheckResponse};
use crate::server::AppState;

#[derive(Clone)]
pub struct HealthHandlers {
    ctx: Context,
    start_time: Instant,
}

impl HealthHandlers {
    #[must_use]
    pub fn new(ctx: Context, start_time: Instant) -> Self {
        Self { ctx, start_time }
    }

    pub async fn health(State(handlers): State<Self>) -> Json<ApiResponse<HealthCheckResponse>> {
        Json(ApiResponse::success(HealthCheckResponse {
            status: "ok".to_string(),
            uptime_seconds: handlers.start_time.elapsed().as_secs(),
        }))
    }

    pub async fn ready(
        State(handlers): State<Self>,
    ) -> (StatusCode, Json<ApiResponse<ReadyCheckResponse>>) {
        let db_ok = tokio::time::timeout(
            Duration::from_secs(5),
            sqlx::query("SELECT 1").execute(&handlers.ctx.db),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

        if !db_ok {
            warn!("readiness check failed: database unreachable within 5s");
        }
        let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
        (status, Json(ApiResponse::success(ReadyCheckResponse { ready: db_ok, database: db_ok })))
    }
}

/// Plain-text Prometheus exposition. Lives outside `HealthHandlers` since it
/// reads the shared request/error counters off the top-level `AppState`
/// rather than anything scoped to health checks.
pub async fn metrics(State(state): State<AppState>) -> String {
    let requests = state.request_count.load(Ordering::Relaxed);
    let errors = state.error_count.load(Ordering::Relaxed);
    format!(
        "# HELP orchestrator_api_requests_total Total HTTP requests processed\n\
         # TYPE orchestrator_api_requests_total counter\n\
         orchestrator_api_requests_total {requests}\n\
         # HELP orchestrator_api_errors_total Total HTTP requests that returned a 4xx/5xx status\n\
         # TYPE orchestrator_api_errors_total counter\n\
         orchestrator_api_errors_total {errors}\n"
    )
}
