//! REST API models: request/response types and the success/error envelope.
//!
//! Grounded on `gateway::models`'s `ApiResponse<T>`/`ErrorResponse` pair —
//! same shape, reused verbatim since it has no trading-specific fields.

use axum::http::StatusCode;
use axum::response::Json;
use chrono::{DateTime, Utc};
use orchestrator_common::error::CoreError;
use orchestrator_core::types::{Order, OrderItem, OrderStatus};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<FxHashMap<String, String>>,
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        Self { error: err.code().to_string(), message: err.client_message(None), details: None }
    }
}

/// Maps any `CoreError` to the `(status, envelope)` pair every handler
/// returns on its error path — the one place the error taxonomy's
/// `http_status()` is consulted, so no handler hand-rolls a status code.
#[must_use]
pub fn core_error_response(err: &CoreError) -> (StatusCode, Json<ApiResponse<()>>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiResponse::error(ErrorResponse::from(err))))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, timestamp: Utc::now().timestamp() }
    }

    #[must_use]
    pub fn error(error: ErrorResponse) -> Self {
        Self { success: false, data: None, error: Some(error), timestamp: Utc::now().timestamp() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyCheckResponse {
    pub ready: bool,
    pub database: bool,
}

/// Inbound body for `POST /api/v1/whatsapp/webhook`, matching the messaging
/// gateway's forwarded payload shape exactly.
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookRequest {
    pub channel_id: String,
    pub external_id: String,
    pub text: Option<String>,
    pub media: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAckResponse {
    pub stored: bool,
    pub event_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub uploaded_order_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UploadImageStatusResponse {
    pub uploaded_order_id: String,
    pub status: &'static str,
}

/// Body shared by every `POST /api/v1/orders/:id/*` transition route. Only
/// `assign-vendor` reads `vendor_id`; `cancel` reads `reason`; the rest
/// ignore both and accept `{}`.
#[derive(Debug, Deserialize, Default)]
pub struct OrderTransitionRequest {
    pub actor_id: Option<String>,
    pub vendor_id: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: String,
}

impl From<&OrderItem> for OrderItemResponse {
    fn from(item: &OrderItem) -> Self {
        Self { product_id: item.product_id.to_string(), quantity: item.quantity, unit_price: item.unit_price.to_string() }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub retailer_id: String,
    pub vendor_id: Option<String>,
    pub status: OrderStatus,
    pub total: String,
    pub items: Vec<OrderItemResponse>,
    pub requires_approval: bool,
    pub needs_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            order_number: order.order_number.clone(),
            retailer_id: order.retailer_id.to_string(),
            vendor_id: order.vendor_id.map(|v| v.to_string()),
            status: order.status,
            total: order.total().to_string(),
            items: order.items.iter().map(OrderItemResponse::from).collect(),
            requires_approval: order.requires_approval,
            needs_admin: order.needs_admin,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusLogEntryResponse {
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub actor_id: Option<String>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentRetryResponse {
    pub vendor_id: String,
    pub attempt: i64,
    pub status: String,
    pub assigned_at: DateTime<Utc>,
    pub response_deadline: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub status_log: Vec<StatusLogEntryResponse>,
    pub current_assignment: Option<AssignmentRetryResponse>,
}

