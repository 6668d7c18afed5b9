//! Router assembly and shared application state.
//!
//! Grounded on `gateway::server`'s `AppState`/`ApiGatewayServer` shape: one
//! `Clone`-able state struct holding a handler struct per concern, a router
//! built once in `create_app`, and the same middleware layering order
//! (body limit, timeout, auth, logging, trace, compression, cors) — minus
//! `gateway`'s gRPC client pool and rate limiter, which this service has no
//! analogue for.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use orchestrator_core::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{HealthHandlers, ImageHandlers, OrderHandlers, WebhookHandlers};
use crate::middleware::{auth_middleware, cors_layer, logging_middleware, AuthState};
use crate::models::{
    ApiResponse, HealthCheckResponse, OrderDetailResponse, OrderTransitionRequest, ReadyCheckResponse,
    UploadImageResponse, UploadImageStatusResponse, WebhookAckResponse, WhatsAppWebhookRequest,
};

type ErrResp = (StatusCode, Json<ApiResponse<()>>);

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub health_handlers: HealthHandlers,
    pub webhook_handlers: WebhookHandlers,
    pub order_handlers: OrderHandlers,
    pub image_handlers: ImageHandlers,
    pub request_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
}

pub struct OrchestratorApiServer {
    ctx: Context,
    bind_addr: String,
    start_time: Instant,
}

impl OrchestratorApiServer {
    #[must_use]
    pub fn new(ctx: Context, bind_addr: String) -> Self {
        Self { ctx, bind_addr, start_time: Instant::now() }
    }

    pub async fn start(self) -> anyhow::Result<()> {
        let auth_state = AuthState { config: Arc::clone(&self.ctx.config) };
        let app_state = AppState {
            health_handlers: HealthHandlers::new(self.ctx.clone(), self.start_time),
            webhook_handlers: WebhookHandlers::new(self.ctx.clone()),
            order_handlers: OrderHandlers::new(self.ctx.clone()),
            image_handlers: ImageHandlers::new(self.ctx.clone()),
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
        };

        let app = create_app(app_state, auth_state);
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!(addr = %self.bind_addr, "orchestrator-api listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn create_app(app_state: AppState, auth_state: AuthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(crate::handlers::health::metrics))
        .route("/api/v1/whatsapp/webhook", post(webhook_ingest))
        .route("/api/v1/orders/upload-image", post(upload_image))
        .route("/api/v1/orders/upload-image/:id", get(upload_image_status))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/confirm", post(confirm_order))
        .route("/api/v1/orders/:id/assign-vendor", post(assign_vendor))
        .route("/api/v1/orders/:id/accept", post(accept_order))
        .route("/api/v1/orders/:id/dispatch", post(dispatch_order))
        .route("/api/v1/orders/:id/deliver", post(deliver_order))
        .route("/api/v1/orders/:id/complete", post(complete_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(middleware::from_fn_with_state(app_state.clone(), logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer())
        .with_state(app_state)
}

// Wrapper functions: each extracts its sub-handler from the unified
// `AppState` and delegates, so every handler struct can be tested or
// `with_state`-wired in isolation of the others (gateway's convention).

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthCheckResponse>> {
    HealthHandlers::health(State(state.health_handlers)).await
}

async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<ReadyCheckResponse>>) {
    HealthHandlers::ready(State(state.health_handlers)).await
}

async fn webhook_ingest(
    State(state): State<AppState>,
    body: Json<WhatsAppWebhookRequest>,
) -> Result<Json<ApiResponse<WebhookAckResponse>>, ErrResp> {
    WebhookHandlers::ingest(State(state.webhook_handlers), body).await
}

async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ApiResponse<UploadImageResponse>>, ErrResp> {
    ImageHandlers::upload(State(state.image_handlers), multipart).await
}

async fn upload_image_status(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
) -> Result<Json<ApiResponse<UploadImageStatusResponse>>, ErrResp> {
    ImageHandlers::status(State(state.image_handlers), path).await
}

async fn get_order(State(state): State<AppState>, path: Path<uuid::Uuid>) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::get(State(state.order_handlers), path).await
}

async fn confirm_order(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::confirm(State(state.order_handlers), path, body).await
}

async fn assign_vendor(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::assign_vendor(State(state.order_handlers), path, body).await
}

async fn accept_order(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::accept(State(state.order_handlers), path, body).await
}

async fn dispatch_order(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::dispatch(State(state.order_handlers), path, body).await
}

async fn deliver_order(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::deliver(State(state.order_handlers), path, body).await
}

async fn complete_order(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::complete(State(state.order_handlers), path, body).await
}

async fn cancel_order(
    State(state): State<AppState>,
    path: Path<uuid::Uuid>,
    body: Json<OrderTransitionRequest>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ErrResp> {
    OrderHandlers::cancel(State(state.order_handlers), path, body).await
}

/// Prints the route table at startup, mirroring `gateway`'s `print_routes`.
pub fn print_routes() {
    println!("orchestrator-api routes:");
    println!("  GET  /health");
    println!("  GET  /ready");
    println!("  GET  /metrics");
    println!("  POST /api/v1/whatsapp/webhook");
    println!("  POST /api/v1/orders/upload-image");
    println!("  GET  /api/v1/orders/upload-image/:id");
    println!("  GET  /api/v1/orders/:id");
    println!("  POST /api/v1/orders/:id/confirm");
    println!("  POST /api/v1/orders/:id/assign-vendor");
    println!("  POST /api/v1/orders/:id/accept");
    println!("  POST /api/v1/orders/:id/dispatch");
    println!("  POST /api/v1/orders/:id/deliver");
    println!("  POST /api/v1/orders/:id/complete");
    println!("  POST /api/v1/orders/:id/cancel");
}
