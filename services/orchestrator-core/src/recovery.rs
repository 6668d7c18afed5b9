//! C10 — Recovery Worker: the continuous reconciliation loop that keeps the
//! system self-healing. Runs every `RECOVERY_INTERVAL` plus once
//! unconditionally at process start, and never lets a crashed worker strand
//! work — claimed events and in-flight workflows are always resumable
//! through their lease.
//!
//! Grounded on `oms::recovery::RecoveryManager`'s "load -> reconcile ->
//! handle discrepancy -> report stats" shape, adapted from fill/quantity
//! reconciliation to this domain's event/workflow/assignment recovery.

use crate::context::Context;
use crate::dispatcher::{Dispatcher, RetryOutcome};
use crate::event_store::EventStore;
use crate::types::{
    Order, OrderItem, OrderSource, OrderStatus, Product, Retailer, RetailerStatus, Unit, Vendor, VendorProductOffer,
};
use crate::vendor_scorer::VendorScorer;
use crate::workflow::WorkflowJournal;
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{OrderId, ProductId, RetailerId, VendorId};
use orchestrator_common::money::Money;
use serde_json::json;
use sqlx::Row;
use tracing::{error, info, warn};

const BATCH_SIZE: i64 = 50;

#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    pub events_claimed: u32,
    pub events_failed: u32,
    pub workflows_resumed: u32,
    pub assignments_timed_out: u32,
    pub orders_reselected: u32,
}

/// A caller-supplied handler for claimed events; the recovery worker only
/// owns claim/fail bookkeeping, not channel-specific processing logic.
#[async_trait::async_trait]
pub trait EventHandler: Sync {
    async fn handle(&self, event: &crate::event_store::WebhookEvent) -> CoreResult<()>;
}

pub struct RecoveryWorker<'a> {
    ctx: &'a Context,
}

impl<'a> RecoveryWorker<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Runs one full recovery cycle: events, stale workflows, timed-out
    /// vendor assignments, stalled orders — in that order, so an event that
    /// unblocks a workflow is processed before the workflow scan runs.
    pub async fn run_cycle(&self, handler: &dyn EventHandler) -> CoreResult<RecoveryStats> {
        let mut stats = RecoveryStats::default();
        self.process_pending_events(handler, &mut stats).await?;
        self.resume_stale_workflows(&mut stats).await?;
        self.timeout_vendor_assignments(&mut stats).await?;
        self.reselect_stalled_orders(&mut stats).await?;
        info!(?stats, "recovery cycle complete");
        Ok(stats)
    }

    /// Reclaims workflow leases left by a crashed process, run once
    /// unconditionally at startup before the periodic cycle begins.
    pub async fn reclaim_at_startup(&self) -> CoreResult<u32> {
        let journal = WorkflowJournal::new(self.ctx);
        let incomplete = journal.scan_incomplete().await?;
        info!(count = incomplete.len(), "reclaiming in-progress workflows at startup");
        Ok(incomplete.len() as u32)
    }

    async fn process_pending_events(&self, handler: &dyn EventHandler, stats: &mut RecoveryStats) -> CoreResult<()> {
        let store = EventStore::new(self.ctx);
        let events = store.claim_pending(BATCH_SIZE).await?;
        stats.events_claimed = events.len() as u32;

        for event in events {
            match handler.handle(&event).await {
                Ok(()) => store.complete(event.id).await?,
                Err(err) => {
                    error!(event_id = %event.id, error = %err, "event processing failed");
                    let backoff = EventStore::backoff(event.attempts.max(0) as u32);
                    let next_attempt_at = self.ctx.clock.now() + chrono::Duration::from_std(backoff).unwrap_or_default();
                    store.fail(event.id, &err.to_string(), next_attempt_at).await?;
                    stats.events_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Each stale workflow is resumed by re-entering the dispatcher at the
    /// step indicated by `current_step`. Idempotent: the dispatcher's own
    /// steps no-op on work already done (journal advance is monotonic,
    /// ledger posting is guarded by `(order_id, type)`, transitions are
    /// guarded by the legal-transition check).
    async fn resume_stale_workflows(&self, stats: &mut RecoveryStats) -> CoreResult<()> {
        let journal = WorkflowJournal::new(self.ctx);
        let now = self.ctx.clock.now();
        let stale = journal.scan_stale(now).await?;

        for wf in stale {
            let Some(order_id) = wf.order_id else { continue };
            match self.load_order_and_retailer(order_id).await {
                Ok(Some((order, retailer))) => {
                    let dispatch_ctx = match self.load_dispatch_context(order_id).await {
                        Ok(ctx) => ctx,
                        Err(err) => {
                            error!(%order_id, error = %err, "failed to load dispatch context for workflow resume");
                            continue;
                        }
                    };
                    let Some((product, candidates)) = dispatch_ctx else {
                        warn!(%order_id, "stale workflow's order has no line items to resume dispatch with");
                        continue;
                    };
                    let current_hour = (self.ctx.clock.now().format("%H").to_string().parse::<u8>()).unwrap_or(0);
                    let dispatcher = Dispatcher::new(self.ctx);
                    if let Err(err) = dispatcher.resume(&wf, &order, &retailer, &product, &candidates, current_hour).await {
                        warn!(workflow_id = %wf.id, %order_id, error = %err, "failed to resume stale workflow");
                    } else {
                        stats.workflows_resumed += 1;
                    }
                }
                Ok(None) => warn!(%order_id, "stale workflow references missing order or retailer"),
                Err(err) => error!(%order_id, error = %err, "failed to load order for workflow resume"),
            }
        }
        Ok(())
    }

    /// Vendor assignment retries past their response deadline become
    /// TIMEOUT, emit a `LATE_RESPONSE` score event, and trigger the
    /// vendor-reselection workflow against the next candidate.
    async fn timeout_vendor_assignments(&self, stats: &mut RecoveryStats) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let timed_out = sqlx::query(
            "UPDATE vendor_assignment_retries
             SET status = 'TIMEOUT'
             WHERE status = 'PENDING' AND response_deadline < $1
             RETURNING order_id, vendor_id, attempt",
        )
        .bind(now)
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let scorer = VendorScorer::new(self.ctx);
        for row in timed_out {
            let order_id = OrderId::from_uuid(row.get("order_id"));
            let vendor_id = VendorId::from_uuid(row.get("vendor_id"));

            sqlx::query("UPDATE vendors SET pending_orders_count = GREATEST(pending_orders_count - 1, 0) WHERE id = $1")
                .bind(vendor_id.as_uuid())
                .execute(&self.ctx.db)
                .await
                .map_err(|e| CoreError::Internal(e.into()))?;

            scorer.record(vendor_id, "LATE_RESPONSE", json!({ "order_id": order_id })).await?;
            stats.assignments_timed_out += 1;

            if let Err(err) = self.retry_with_next_vendor(order_id, vendor_id).await {
                warn!(%order_id, %vendor_id, error = %err, "vendor reselection after timeout failed");
            }
        }
        Ok(())
    }

    /// CONFIRMED orders that have not progressed past `STALLED_THRESHOLD`
    /// (e.g. the workflow that should have selected a vendor never ran or
    /// silently stalled) are enqueued for re-selection rather than left
    /// waiting indefinitely.
    async fn reselect_stalled_orders(&self, stats: &mut RecoveryStats) -> CoreResult<()> {
        let threshold_secs = self.ctx.config.stalled_threshold.as_secs() as f64;
        let now = self.ctx.clock.now();
        let stalled = sqlx::query(
            "SELECT id, vendor_id FROM orders
             WHERE status = 'CONFIRMED' AND updated_at < $1 - make_interval(secs => $2)",
        )
        .bind(now)
        .bind(threshold_secs)
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        for row in stalled {
            let order_id = OrderId::from_uuid(row.get("id"));
            if let Err(err) = self.retry_with_next_vendor(order_id, None).await {
                warn!(%order_id, error = %err, "failed to re-enqueue stalled order for vendor selection");
                continue;
            }
            stats.orders_reselected += 1;
        }
        Ok(())
    }

    async fn retry_with_next_vendor(&self, order_id: OrderId, failed_vendor: Option<VendorId>) -> CoreResult<()> {
        let Some((order, _retailer)) = self.load_order_and_retailer(order_id).await? else {
            return Err(CoreError::NotFound { entity: "order", id: order_id.to_string() });
        };
        let Some((product, candidates)) = self.load_dispatch_context(order_id).await? else {
            return Err(CoreError::NotFound { entity: "product", id: order_id.to_string() });
        };

        let mut exclude = self.previously_tried_vendors(order_id).await?;
        if let Some(vendor_id) = failed_vendor {
            if !exclude.contains(&vendor_id) {
                exclude.push(vendor_id);
            }
        }

        let dispatcher = Dispatcher::new(self.ctx);
        let current_hour = (self.ctx.clock.now().format("%H").to_string().parse::<u8>()).unwrap_or(0);
        match dispatcher.retry_vendor(&order, &product, &candidates, current_hour, &exclude).await? {
            RetryOutcome::ReassignedTo(vendor_id) => {
                info!(%order_id, %vendor_id, "order reassigned to next vendor candidate");
                Ok(())
            }
            RetryOutcome::EscalatedToAdmin => {
                sqlx::query("UPDATE orders SET needs_admin = true, updated_at = $2 WHERE id = $1")
                    .bind(order_id.as_uuid())
                    .bind(self.ctx.clock.now())
                    .execute(&self.ctx.db)
                    .await
                    .map_err(|e| CoreError::Internal(e.into()))?;
                warn!(%order_id, "order escalated to admin queue after exhausting vendor retries");
                Ok(())
            }
        }
    }

    async fn previously_tried_vendors(&self, order_id: OrderId) -> CoreResult<Vec<VendorId>> {
        let rows = sqlx::query("SELECT DISTINCT vendor_id FROM vendor_assignment_retries WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(rows.into_iter().map(|r| VendorId::from_uuid(r.get("vendor_id"))).collect())
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

    /// Loads the order's primary product and the candidate vendors offering
    /// it, for re-running vendor selection.
    async fn load_dispatch_context(&self, order_id: OrderId) -> CoreResult<Option<(Product, Vec<Vendor>)>> {
        let item_row = sqlx::query("SELECT product_id FROM order_items WHERE order_id = $1 LIMIT 1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let Some(item_row) = item_row else { return Ok(None) };
        let product_id = ProductId::from_uuid(item_row.get("product_id"));

        let product_row = sqlx::query("SELECT canonical_name, aliases, unit FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let Some(product_row) = product_row else { return Ok(None) };
        let product = Product {
            id: product_id,
            canonical_name: product_row.get("canonical_name"),
            aliases: product_row.get("aliases"),
            unit: unit_from_str(product_row.get("unit")),
        };

        let vendor_rows = sqlx::query(
            "SELECT v.id, v.working_hours_start, v.working_hours_end, v.is_active,
                    v.active_orders_count, v.pending_orders_count,
                    o.stock, o.unit_price
             FROM vendors v JOIN vendor_product_offers o ON o.vendor_id = v.id
             WHERE o.product_id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let vendors = vendor_rows
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
            .collect();

        Ok(Some((product, vendors)))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_stats_default_is_all_zero() {
        let stats = RecoveryStats::default();
        assert_eq!(stats.events_claimed, 0);
        assert_eq!(stats.workflows_resumed, 0);
    }
}
