//! Wires C1 (event store) to C9 (intent parsing) and C8 (dispatch): the
//! concrete [`recovery::EventHandler`](crate::recovery::EventHandler) the
//! recovery worker's `claim_pending` loop drives for the `whatsapp` channel.
//! The webhook HTTP handler only durably stores the inbound event and
//! returns 200 (per the event store's contract); all parsing and dispatch
//! happens here, off the request path, so a flood of inbound messages never
//! backs up the gateway's response latency.
//!
//! Mirrors `oms`'s pattern of a thin `EventHandler` impl that loads context,
//! delegates to the domain modules, and never holds state across calls.

use crate::context::Context;
use crate::dispatcher::{Dispatcher, DispatchOutcome, RetryOutcome};
use crate::event_store::WebhookEvent;
use crate::intent_parser::{IntentParser, IntentResult};
use crate::order_machine::OrderStateMachine;
use crate::recovery::EventHandler;
use crate::types::{
    Order, OrderItem, OrderSource, OrderStatus, Product, Retailer, RetailerStatus, Unit, Vendor, VendorProductOffer,
};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{OrderId, ProductId, RetailerId, VendorId};
use orchestrator_common::money::Money;
use sqlx::Row;
use tracing::{info, warn};

pub struct WhatsAppEventHandler<'a> {
    ctx: &'a Context,
}

impl<'a> WhatsAppEventHandler<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    async fn process(&self, event: &WebhookEvent) -> CoreResult<()> {
        if event.channel != "whatsapp" {
            warn!(channel = %event.channel, "webhook processor only handles the whatsapp channel");
            return Ok(());
        }

        let channel_id = event.payload.get("channel_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let text = event.payload.get("text").and_then(|v| v.as_str()).map(str::trim).filter(|t| !t.is_empty());

        if let Some(pending) = self.pending_assignment_for(&channel_id).await? {
            return self.handle_vendor_reply(pending, text).await;
        }

        let Some(retailer) = self.load_retailer_by_phone(&channel_id).await? else {
            info!(phone = %channel_id, "inbound message from unregistered phone number, ignoring");
            return Ok(());
        };

        let Some(text) = text else {
            self.ctx.notifier.notify(
                channel_id.clone(),
                format!("media_unsupported:{}:{channel_id}", event.id),
                "We can't process images from this channel yet — please describe your order as text.".to_string(),
            );
            return Ok(());
        };

        let catalog = self.load_catalog().await?;
        let parser = IntentParser::new(&catalog);
        match parser.parse(text) {
            IntentResult::Greeting { .. } => {
                self.reply(&channel_id, event, "greeting", crate::notifier::templates::greeting().to_string());
            }
            IntentResult::Help => {
                self.reply(&channel_id, event, "help", crate::notifier::templates::help().to_string());
            }
            IntentResult::Unknown { .. } => {
                self.reply(&channel_id, event, "unknown", crate::notifier::templates::help().to_string());
            }
            IntentResult::OrderNeedsClarification { .. } => {
                self.reply(
                    &channel_id,
                    event,
                    "clarify",
                    crate::notifier::templates::needs_clarification().to_string(),
                );
            }
            IntentResult::StatusQuery { order_number } => {
                self.handle_status_query(&channel_id, event, &retailer, &order_number).await?;
            }
            IntentResult::OrderIntent { items } => {
                self.handle_order_intent(&channel_id, event, &retailer, items).await?;
            }
        }
        Ok(())
    }

    fn reply(&self, channel_id: &str, event: &WebhookEvent, kind: &str, body: String) {
        self.ctx.notifier.notify(channel_id.to_string(), format!("{kind}:{}:{channel_id}", event.id), body);
    }

    async fn handle_status_query(&self, channel_id: &str, event: &WebhookEvent, retailer: &Retailer, order_number: &str) -> CoreResult<()> {
        let row = sqlx::query("SELECT status FROM orders WHERE retailer_id = $1 AND order_number = $2")
            .bind(retailer.id.as_uuid())
            .bind(order_number)
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        let body = match row {
            Some(r) => {
                let status: String = r.get("status");
                crate::notifier::templates::status_reply(order_number, &status)
            }
            None => crate::notifier::templates::status_unknown(order_number),
        };
        self.reply(channel_id, event, "status", body);
        Ok(())
    }

    async fn handle_order_intent(
        &self,
        channel_id: &str,
        event: &WebhookEvent,
        retailer: &Retailer,
        items: Vec<crate::intent_parser::ParsedItem>,
    ) -> CoreResult<()> {
        let mut resolved = Vec::new();
        for item in &items {
            let (Some(product_id), Some(quantity)) = (item.product_id, item.quantity) else {
                self.reply(channel_id, event, "clarify", crate::notifier::templates::needs_clarification().to_string());
                return Ok(());
            };
            resolved.push((product_id, quantity));
        }
        if resolved.is_empty() {
            self.reply(channel_id, event, "clarify", crate::notifier::templates::needs_clarification().to_string());
            return Ok(());
        }

        let primary_product_id = resolved[0].0;
        let Some(product) = self.load_product(primary_product_id).await? else {
            self.reply(channel_id, event, "clarify", crate::notifier::templates::needs_clarification().to_string());
            return Ok(());
        };

        let order = self.create_draft_order(retailer.id, &resolved).await?;
        let candidates = self.load_candidates_for(primary_product_id).await?;
        let current_hour = (self.ctx.clock.now().format("%H").to_string().parse::<u8>()).unwrap_or(0);

        let machine = OrderStateMachine::new(self.ctx);
        machine.confirm(order.id, None).await?;

        let dispatcher = Dispatcher::new(self.ctx);
        let outcome = dispatcher.dispatch(&order, retailer, &product, &candidates, current_hour).await?;

        match outcome {
            DispatchOutcome::VendorAssigned => {}
            DispatchOutcome::NoVendorAvailable => {
                self.reply(channel_id, event, "no_vendor", crate::notifier::templates::no_vendor_available(&order.order_number));
            }
            DispatchOutcome::Rejected { reason_code, available_credit } => {
                let body = if reason_code == crate::admission::REASON_CREDIT_LIMIT_EXCEEDED {
                    crate::notifier::templates::insufficient_credit(available_credit.unwrap_or(Money::ZERO))
                } else {
                    crate::notifier::templates::order_rejected("order does not meet credit requirements")
                };
                self.reply(channel_id, event, "rejected", body);
            }
            DispatchOutcome::NeedsApproval => {
                self.reply(channel_id, event, "needs_approval", crate::notifier::templates::order_held_for_approval(&order.order_number));
            }
        }
        Ok(())
    }

    async fn handle_vendor_reply(&self, pending: PendingAssignment, text: Option<&str>) -> CoreResult<()> {
        let Some(text) = text else { return Ok(()) };
        let normalized = text.trim().to_ascii_uppercase();

        let Some((order, retailer)) = self.load_order_and_retailer(pending.order_id).await? else {
            return Err(CoreError::NotFound { entity: "order", id: pending.order_id.to_string() });
        };

        if normalized.starts_with("ACCEPT") {
            let dispatcher = Dispatcher::new(self.ctx);
            dispatcher.record_acceptance(&order, &retailer).await?;
        } else if normalized.starts_with("DECLINE") || normalized.starts_with("REJECT") {
            let machine = OrderStateMachine::new(self.ctx);
            machine.decline_vendor(pending.order_id, pending.vendor_id).await?;

            let Some((product, candidates)) = self.load_dispatch_context(pending.order_id).await? else {
                return Err(CoreError::NotFound { entity: "product", id: pending.order_id.to_string() });
            };
            let exclude = self.previously_tried_vendors(pending.order_id).await?;
            let current_hour = (self.ctx.clock.now().format("%H").to_string().parse::<u8>()).unwrap_or(0);
            let dispatcher = Dispatcher::new(self.ctx);
            match dispatcher.retry_vendor(&order, &product, &candidates, current_hour, &exclude).await? {
                RetryOutcome::ReassignedTo(vendor_id) => info!(order_id = %order.id, %vendor_id, "order reassigned after vendor decline"),
                RetryOutcome::EscalatedToAdmin => {
                    sqlx::query("UPDATE orders SET needs_admin = true, updated_at = $2 WHERE id = $1")
                        .bind(order.id.as_uuid())
                        .bind(self.ctx.clock.now())
                        .execute(&self.ctx.db)
                        .await
                        .map_err(|e| CoreError::Internal(e.into()))?;
                }
            }
        } else {
            self.ctx.notifier.notify(
                pending.vendor_phone.clone(),
                format!("vendor_clarify:{}:{}", pending.order_id, pending.vendor_phone),
                "Please reply ACCEPT or DECLINE for this order.".to_string(),
            );
        }
        Ok(())
    }

    async fn pending_assignment_for(&self, phone: &str) -> CoreResult<Option<PendingAssignment>> {
        let row = sqlx::query(
            "SELECT r.order_id, r.vendor_id, v.phone
             FROM vendor_assignment_retries r
             JOIN vendors v ON v.id = r.vendor_id
             WHERE v.phone = $1 AND r.status = 'PENDING'
             ORDER BY r.assigned_at DESC
             LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(row.map(|r| PendingAssignment {
            order_id: OrderId::from_uuid(r.get("order_id")),
            vendor_id: VendorId::from_uuid(r.get("vendor_id")),
            vendor_phone: r.get("phone"),
        }))
    }

    async fn load_retailer_by_phone(&self, phone: &str) -> CoreResult<Option<Retailer>> {
        let row = sqlx::query("SELECT id, phone, credit_limit, outstanding_debt, credit_score, status FROM retailers WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(row.map(|r| Retailer {
            id: RetailerId::from_uuid(r.get("id")),
            phone: r.get("phone"),
            credit_limit: Money::from_minor(r.get("credit_limit")),
            outstanding_debt: Money::from_minor(r.get("outstanding_debt")),
            credit_score: r.get("credit_score"),
            status: retailer_status_from_str(r.get("status")),
        }))
    }

    async fn load_catalog(&self) -> CoreResult<Vec<Product>> {
        let rows = sqlx::query("SELECT id, canonical_name, aliases, unit FROM products")
            .fetch_all(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(rows
            .into_iter()
            .map(|r| Product {
                id: ProductId::from_uuid(r.get("id")),
                canonical_name: r.get("canonical_name"),
                aliases: r.get("aliases"),
                unit: unit_from_str(r.get("unit")),
            })
            .collect())
    }

    async fn load_product(&self, product_id: ProductId) -> CoreResult<Option<Product>> {
        let row = sqlx::query("SELECT id, canonical_name, aliases, unit FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(row.map(|r| Product {
            id: product_id,
            canonical_name: r.get("canonical_name"),
            aliases: r.get("aliases"),
            unit: unit_from_str(r.get("unit")),
        }))
    }

    async fn load_candidates_for(&self, product_id: ProductId) -> CoreResult<Vec<Vendor>> {
        let rows = sqlx::query(
            "SELECT v.id, v.working_hours_start, v.working_hours_end, v.is_active,
                    v.active_orders_count, v.pending_orders_count, o.stock, o.unit_price
             FROM vendors v JOIN vendor_product_offers o ON o.vendor_id = v.id
             WHERE o.product_id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(rows
            .into_iter()
            .map(|r| Vendor {
                id: VendorId::from_uuid(r.get("id")),
                offers: vec![VendorProductOffer { product_id, stock: r.get("stock"), unit_price: Money::from_minor(r.get("unit_price")) }],
                working_hours_start: r.get::<i32, _>("working_hours_start") as u8,
                working_hours_end: r.get::<i32, _>("working_hours_end") as u8,
                is_active: r.get("is_active"),
                active_orders_count: r.get("active_orders_count"),
                pending_orders_count: r.get("pending_orders_count"),
            })
            .collect())
    }

    async fn create_draft_order(&self, retailer_id: RetailerId, items: &[(ProductId, i64)]) -> CoreResult<Order> {
        let order_id = OrderId::new();
        let now = self.ctx.clock.now();
        let order_number = format!("ORD-{}", &order_id.to_string()[..8].to_uppercase());

        let mut order_items = Vec::with_capacity(items.len());
        let mut tx = self.ctx.db.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        sqlx::query(
            "INSERT INTO orders (id, order_number, retailer_id, status, source, requires_approval, needs_admin, created_at, updated_at)
             VALUES ($1, $2, $3, 'DRAFT', 'TEXT', false, false, $4, $4)",
        )
        .bind(order_id.as_uuid())
        .bind(&order_number)
        .bind(retailer_id.as_uuid())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        for (product_id, quantity) in items {
            let price_row = sqlx::query("SELECT MIN(unit_price) AS p FROM vendor_product_offers WHERE product_id = $1")
                .bind(product_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CoreError::Internal(e.into()))?;
            let unit_price: i64 = price_row.and_then(|r| r.get::<Option<i64>, _>("p")).unwrap_or(0);

            sqlx::query("INSERT INTO order_items (order_id, product_id, quantity, unit_price) VALUES ($1, $2, $3, $4)")
                .bind(order_id.as_uuid())
                .bind(product_id.as_uuid())
                .bind(quantity)
                .bind(unit_price)
                .execute(&mut *tx)
                .await
                .map_err(|e| CoreError::Internal(e.into()))?;

            order_items.push(OrderItem { product_id: *product_id, quantity: *quantity, unit_price: Money::from_minor(unit_price) });
        }
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;

        Ok(Order {
            id: order_id,
            order_number,
            retailer_id,
            vendor_id: None,
            items: order_items,
            status: OrderStatus::Draft,
            source: OrderSource::Text,
            requires_approval: false,
            needs_admin: false,
            created_at: now,
            updated_at: now,
        })
    }

    async fn load_order_and_retailer(&self, order_id: OrderId) -> CoreResult<Option<(Order, Retailer)>> {
        let row = sqlx::query(
            "SELECT o.id, o.order_number, o.retailer_id, o.vendor_id, o.status, o.source, o.requires_approval,
                    o.needs_admin, o.created_at, o.updated_at,
                    r.phone, r.credit_limit, r.outstanding_debt, r.credit_score, r.status AS retailer_status
             FROM orders o JOIN retailers r ON r.id = o.retailer_id
             WHERE o.id = $1",
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
        let order = Order {
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
        };
        let retailer = Retailer {
            id: order.retailer_id,
            phone: row.get("phone"),
            credit_limit: Money::from_minor(row.get("credit_limit")),
            outstanding_debt: Money::from_minor(row.get("outstanding_debt")),
            credit_score: row.get("credit_score"),
            status: retailer_status_from_str(row.get("retailer_status")),
        };
        Ok(Some((order, retailer)))
    }

    async fn load_dispatch_context(&self, order_id: OrderId) -> CoreResult<Option<(Product, Vec<Vendor>)>> {
        let item_row = sqlx::query("SELECT product_id FROM order_items WHERE order_id = $1 LIMIT 1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let Some(item_row) = item_row else { return Ok(None) };
        let product_id = ProductId::from_uuid(item_row.get("product_id"));
        let Some(product) = self.load_product(product_id).await? else { return Ok(None) };
        let candidates = self.load_candidates_for(product_id).await?;
        Ok(Some((product, candidates)))
    }

    async fn previously_tried_vendors(&self, order_id: OrderId) -> CoreResult<Vec<VendorId>> {
        let rows = sqlx::query("SELECT DISTINCT vendor_id FROM vendor_assignment_retries WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(rows.into_iter().map(|r| VendorId::from_uuid(r.get("vendor_id"))).collect())
    }
}

struct PendingAssignment {
    order_id: OrderId,
    vendor_id: VendorId,
    vendor_phone: String,
}

#[async_trait::async_trait]
impl EventHandler for WhatsAppEventHandler<'_> {
    async fn handle(&self, event: &WebhookEvent) -> CoreResult<()> {
        self.process(event).await
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

fn retailer_status_from_str(s: String) -> RetailerStatus {
    match s.as_str() {
        "BLOCKED" => RetailerStatus::Blocked,
        "PENDING_APPROVAL" => RetailerStatus::PendingApproval,
        _ => RetailerStatus::Active,
    }
}

fn unit_from_str(s: String) -> Unit {
    match s.as_str() {
        "G" => Unit::G,
        "L" => Unit::L,
        "ML" => Unit::Ml,
        "PIECE" => Unit::Piece,
        "DOZEN" => Unit::Dozen,
        "PACKET" => Unit::Packet,
        "CARTON" => Unit::Carton,
        _ => Unit::Kg,
    }
}
