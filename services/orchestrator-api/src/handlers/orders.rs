//! Order lifecycle transition routes: thin wrappers over
//! `order_machine::OrderStateMachine`, translating its `CoreError` taxonomy
//! into the envelope/status-code pairs `core_error_response` produces (most
//! importantly 409 on an illegal transition). Grounded on
//! `gateway::handlers::risk`'s handler-struct-calls-domain-module shape.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use orchestrator_core::order_machine::OrderStateMachine;
use orchestrator_core::types::{Order, OrderItem, OrderSource, OrderStatus};
use orchestrator_core::Context;
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{OrderId, ProductId, RetailerId, VendorId};
use orchestrator_common::money::Money;
use sqlx::Row;

use crate::models::{
    core_error_response, ApiResponse, AssignmentRetryResponse, OrderDetailResponse, OrderResponse,
    OrderTransitionRequest, StatusLogEntryResponse,
};

type Resp<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Clone)]
pub struct OrderHandlers {
    ctx: Context,
}

impl OrderHandlers {
    #[must_use]
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub async fn get(State(handlers): State<Self>, Path(id): Path<uuid::Uuid>) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let detail = handlers.detail(order_id).await.map_err(|e| core_error_response(&e))?;
        Ok(Json(ApiResponse::success(detail)))
    }

    pub async fn confirm(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine.confirm(order_id, body.actor_id.as_deref()).await.map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    pub async fn assign_vendor(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let Some(vendor_id) = body.vendor_id.as_deref().and_then(|v| uuid::Uuid::parse_str(v).ok()) else {
            return Err(core_error_response(&CoreError::Validation { message: "vendor_id is required".to_string() }));
        };
        let order = handlers.load_order(order_id).await.map_err(|e| core_error_response(&e))?;
        let Some(order) = order else {
            return Err(core_error_response(&CoreError::NotFound { entity: "order", id: id.to_string() }));
        };
        let Some(product_id) = order.items.first().map(|i| i.product_id) else {
            return Err(core_error_response(&CoreError::Validation { message: "order has no line items".to_string() }));
        };
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine
            .assign_vendor(order_id, VendorId::from_uuid(vendor_id), product_id, body.actor_id.as_deref())
            .await
            .map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    pub async fn accept(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let order = handlers.load_order(order_id).await.map_err(|e| core_error_response(&e))?;
        let Some(order) = order else {
            return Err(core_error_response(&CoreError::NotFound { entity: "order", id: id.to_string() }));
        };
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine
            .accept(order_id, order.total(), order.retailer_id, body.actor_id.as_deref())
            .await
            .map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    pub async fn dispatch(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine.dispatch(order_id, body.actor_id.as_deref()).await.map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    pub async fn deliver(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine.deliver(order_id, body.actor_id.as_deref()).await.map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    pub async fn complete(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine.complete(order_id, body.actor_id.as_deref()).await.map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    pub async fn cancel(
        State(handlers): State<Self>,
        Path(id): Path<uuid::Uuid>,
        Json(body): Json<OrderTransitionRequest>,
    ) -> Resp<OrderDetailResponse> {
        let order_id = OrderId::from_uuid(id);
        let order = handlers.load_order(order_id).await.map_err(|e| core_error_response(&e))?;
        let Some(order) = order else {
            return Err(core_error_response(&CoreError::NotFound { entity: "order", id: id.to_string() }));
        };
        let reason = body.reason.as_deref().unwrap_or("cancelled via API");
        let machine = OrderStateMachine::new(&handlers.ctx);
        machine
            .cancel(order_id, order.retailer_id, reason, body.actor_id.as_deref())
            .await
            .map_err(|e| core_error_response(&e))?;
        handlers.respond(order_id).await
    }

    async fn respond(&self, order_id: OrderId) -> Resp<OrderDetailResponse> {
        let detail = self.detail(order_id).await.map_err(|e| core_error_response(&e))?;
        Ok(Json(ApiResponse::success(detail)))
    }

    async fn detail(&self, order_id: OrderId) -> CoreResult<OrderDetailResponse> {
        let Some(order) = self.load_order(order_id).await? else {
            return Err(CoreError::NotFound { entity: "order", id: order_id.to_string() });
        };
        let status_log = self.load_status_log(order_id).await?;
        let current_assignment = self.load_current_assignment(order_id).await?;
        Ok(OrderDetailResponse { order: OrderResponse::from(&order), status_log, current_assignment })
    }

    async fn load_order(&self, order_id: OrderId) -> CoreResult<Option<Order>> {
        let row = sqlx::query(
            "SELECT id, order_number, retailer_id, vendor_id, status, source, requires_approval, needs_admin, created_at, updated_at
             FROM orders WHERE id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        let Some(row) = row else { return Ok(None) };

        let item_rows = sqlx::query("SELECT product_id, quantity, unit_price FROM order_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let items = item_rows
            .into_iter()
            .map(|r| OrderItem {
                product_id: ProductId::from_uuid(r.get("product_id")),
                quantity: r.get("quantity"),
                unit_price: Money::from_minor(r.get("unit_price")),
            })
            .collect();

        let vendor_id: Option<uuid::Uuid> = row.get("vendor_id");
        Ok(Some(Order {
            id: order_id,
            order_number: row.get("order_number"),
            retailer_id: RetailerId::from_uuid(row.get("retailer_id")),
            vendor_id: vendor_id.map(VendorId::from_uuid),
            items,
            status: order_status_from_str(row.get("status")),
            source: order_source_from_str(row.get("source")),
            requires_approval: row.get("requires_approval"),
            needs_admin: row.get("needs_admin"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn load_status_log(&self, order_id: OrderId) -> CoreResult<Vec<StatusLogEntryResponse>> {
        let rows = sqlx::query(
            "SELECT from_status, to_status, actor_id, reason, at FROM order_status_log WHERE order_id = $1 ORDER BY at ASC",
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(rows
            .into_iter()
            .map(|r| StatusLogEntryResponse {
                from_status: r.get::<Option<String>, _>("from_status").map(|s| order_status_from_str(s)),
                to_status: order_status_from_str(r.get("to_status")),
                actor_id: r.get("actor_id"),
                reason: r.get("reason"),
                at: r.get("at"),
            })
            .collect())
    }

    async fn load_current_assignment(&self, order_id: OrderId) -> CoreResult<Option<AssignmentRetryResponse>> {
        let row = sqlx::query(
            "SELECT vendor_id, attempt, status, assigned_at, response_deadline
             FROM vendor_assignment_retries WHERE order_id = $1 ORDER BY attempt DESC LIMIT 1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(row.map(|r| AssignmentRetryResponse {
            vendor_id: VendorId::from_uuid(r.get("vendor_id")).to_string(),
            attempt: r.get("attempt"),
            status: r.get("status"),
            assigned_at: r.get("assigned_at"),
            response_deadline: r.get("response_deadline"),
        }))
    }
}

fn order_status_from_str(s: String) -> OrderStatus {
    match s.as_str() {
        "CONFIRMED" => OrderStatus::Confirmed,
        "VENDOR_ASSIGNED" => OrderStatus::VendorAssigned,
        "ACCEPTED" => OrderStatus::Accepted,
        "DISPATCHED" => OrderStatus::Dispatched,
        "DELIVERED" => OrderStatus::Delivered,
        "COMPLETED" => OrderStatus::Completed,
        "CANCELLED" => OrderStatus::Cancelled,
        _ => OrderStatus::Draft,
    }
}

fn order_source_from_str(s: String) -> OrderSource {
    match s.as_str() {
        "IMAGE" => OrderSource::Image,
        "MANUAL" => OrderSource::Manual,
        _ => OrderSource::Text,
    }
}
