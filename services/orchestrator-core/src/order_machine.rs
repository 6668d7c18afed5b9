//! C6 — Order State Machine: enforces the legal-transition table from
//! `types::OrderStatus` and performs each transition's side effects
//! (status log, stock, ledger) atomically in one database transaction.
//!
//! The legal-transition check mirrors `oms::lifecycle::OrderLifecycleManager`
//! — reject the move if the target isn't in the current status's allowed-next
//! set — generalized to also fire the side effects that belong to this
//! domain's transitions (credit postings, vendor stock) rather than this
//! crate's fills/amendments.

use crate::context::Context;
use crate::ledger::CreditLedger;
use crate::types::{LedgerEntryType, Order, OrderSource, OrderStatus};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{OrderId, ProductId, RetailerId, VendorId};
use orchestrator_common::money::Money;
use sqlx::Row;
use tracing::{info, warn};

pub struct OrderStateMachine<'a> {
    ctx: &'a Context,
}

impl<'a> OrderStateMachine<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Creates a bare DRAFT order with no line items, for intake paths where
    /// item extraction happens out-of-band (the image/OCR pipeline). The
    /// caller inserts `order_items` and calls `confirm` once extraction
    /// completes; until then the order stays in DRAFT.
    pub async fn create_draft(&self, retailer_id: RetailerId, source: OrderSource) -> CoreResult<Order> {
        let order_id = OrderId::new();
        let now = self.ctx.clock.now();
        let order_number = format!("ORD-{}", &order_id.to_string()[..8].to_uppercase());

        sqlx::query(
            "INSERT INTO orders (id, order_number, retailer_id, status, source, requires_approval, needs_admin, created_at, updated_at)
             VALUES ($1, $2, $3, 'DRAFT', $4, false, false, $5, $5)",
        )
        .bind(order_id.as_uuid())
        .bind(&order_number)
        .bind(retailer_id.as_uuid())
        .bind(source_str(source))
        .bind(now)
        .execute(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        info!(%order_id, ?source, "draft order created");
        Ok(Order {
            id: order_id,
            order_number,
            retailer_id,
            vendor_id: None,
            items: Vec::new(),
            status: OrderStatus::Draft,
            source,
            requires_approval: false,
            needs_admin: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Confirms a draft order: the first status-log entry, no monetary or
    /// stock side effects (admission already decided creditworthiness).
    pub async fn confirm(&self, order_id: OrderId, actor_id: Option<&str>) -> CoreResult<()> {
        self.transition(order_id, OrderStatus::Confirmed, actor_id, None).await
    }

    /// Assigns a vendor: records the assignment, opens a PENDING
    /// `vendor_assignment_retries` row with a `response_deadline` the
    /// recovery worker's timeout scan reads, and logs the transition. No
    /// stock or ledger effect yet — those land on acceptance.
    pub async fn assign_vendor(
        &self,
        order_id: OrderId,
        vendor_id: VendorId,
        product_id: ProductId,
        actor_id: Option<&str>,
    ) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let deadline = now + chrono::Duration::from_std(self.ctx.config.vendor_response_timeout).unwrap_or_default();
        let mut tx = self.ctx.db.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        let current = self.lock_order(&mut tx, order_id).await?;
        self.require_transition(current, OrderStatus::VendorAssigned)?;

        sqlx::query("UPDATE orders SET status = 'VENDOR_ASSIGNED', vendor_id = $2, updated_at = $3 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(vendor_id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        let attempt_row = sqlx::query("SELECT COUNT(*) AS n FROM vendor_assignment_retries WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let attempt: i64 = attempt_row.get::<i64, _>("n") + 1;

        sqlx::query(
            "INSERT INTO vendor_assignment_retries (order_id, vendor_id, attempt, status, assigned_at, response_deadline)
             VALUES ($1, $2, $3, 'PENDING', $4, $5)",
        )
        .bind(order_id.as_uuid())
        .bind(vendor_id.as_uuid())
        .bind(attempt)
        .bind(now)
        .bind(deadline)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("UPDATE vendors SET pending_orders_count = pending_orders_count + 1 WHERE id = $1")
            .bind(vendor_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        insert_status_log(&mut tx, order_id, Some(current), OrderStatus::VendorAssigned, actor_id, None, now).await?;
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;

        let scorer = crate::vendor_scorer::VendorScorer::new(self.ctx);
        let mut data = serde_json::json!({ "order_id": order_id.to_string(), "product_id": product_id.to_string() });
        match self.price_deviation_pct(vendor_id, product_id).await {
            Ok(Some(pct)) => data["deviation_pct"] = serde_json::json!(pct),
            Ok(None) => {}
            Err(e) => warn!(%order_id, %vendor_id, error = %e, "failed to compute price deviation for scorer event"),
        }
        if let Err(e) = scorer.record(vendor_id, "ASSIGNED", data).await {
            warn!(%order_id, %vendor_id, error = %e, "failed to record ASSIGNED scorer event");
        }

        info!(%order_id, %vendor_id, attempt, "vendor assigned");
        Ok(())
    }

    /// This vendor's offered price for `product_id`, as a percentage
    /// deviation from the mean offer across every vendor carrying the
    /// product — feeds the C4 scorer's price-competitiveness component.
    /// `None` when the vendor has no offer on file for the product.
    async fn price_deviation_pct(&self, vendor_id: VendorId, product_id: ProductId) -> CoreResult<Option<i64>> {
        let rows = sqlx::query("SELECT vendor_id, unit_price FROM vendor_product_offers WHERE product_id = $1")
            .bind(product_id.as_uuid())
            .fetch_all(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        if rows.is_empty() {
            return Ok(None);
        }

        let prices: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("unit_price")).collect();
        let market_average = Money::from_minor(prices.iter().sum::<i64>()).div_round_half_even(prices.len() as i64);

        let vendor_price = rows
            .iter()
            .find(|r| r.get::<uuid::Uuid, _>("vendor_id") == vendor_id.as_uuid())
            .map(|r| Money::from_minor(r.get::<i64, _>("unit_price")));
        Ok(vendor_price.map(|price| price.percent_deviation_from(market_average)))
    }

    /// Records a vendor's explicit decline of an assignment (as opposed to a
    /// response timeout, which the recovery worker handles separately):
    /// marks the open `vendor_assignment_retries` row REJECTED, emits the
    /// REJECTED scorer event, and releases the vendor's pending-order slot.
    /// The caller (the webhook handler) is responsible for triggering
    /// re-selection via `Dispatcher::retry_vendor` afterward.
    pub async fn decline_vendor(&self, order_id: OrderId, vendor_id: VendorId) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let row = sqlx::query(
            "UPDATE vendor_assignment_retries SET status = 'REJECTED'
             WHERE order_id = $1 AND vendor_id = $2 AND status = 'PENDING'
             RETURNING assigned_at",
        )
        .bind(order_id.as_uuid())
        .bind(vendor_id.as_uuid())
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("UPDATE vendors SET pending_orders_count = GREATEST(pending_orders_count - 1, 0) WHERE id = $1")
            .bind(vendor_id.as_uuid())
            .execute(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        let response_minutes = row.map(|r| {
            let assigned_at: chrono::DateTime<chrono::Utc> = r.get("assigned_at");
            (now - assigned_at).num_minutes()
        });

        let scorer = crate::vendor_scorer::VendorScorer::new(self.ctx);
        let mut data = serde_json::json!({ "order_id": order_id.to_string() });
        if let Some(minutes) = response_minutes {
            data["response_minutes"] = serde_json::json!(minutes);
        }
        scorer.record(vendor_id, "REJECTED", data).await?;

        info!(%order_id, %vendor_id, "vendor declined assignment");
        Ok(())
    }

    /// Accepts the order on the vendor's behalf: transitions to ACCEPTED,
    /// posts the ORDER_CREDIT ledger entry, and decrements vendor stock, all
    /// inside one transaction — a partial application here would leave the
    /// ledger and vendor inventory inconsistent with the order's status.
    pub async fn accept(&self, order_id: OrderId, order_total: Money, retailer_id: RetailerId, actor_id: Option<&str>) -> CoreResult<()> {
        let max_retries = self.ctx.config.ledger_retries;
        let mut attempt = 0u32;
        loop {
            match self.try_accept(order_id, order_total, retailer_id, actor_id).await {
                Ok(()) => return Ok(()),
                Err(CoreError::Transient { message }) if attempt < max_retries => {
                    attempt += 1;
                    let backoff = std::time::Duration::from_millis(50u64 * (1u64 << attempt.min(10)));
                    warn!(%order_id, attempt, message, "accept transition conflict, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_accept(&self, order_id: OrderId, order_total: Money, retailer_id: RetailerId, actor_id: Option<&str>) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.db.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;

        let current = self.lock_order(&mut tx, order_id).await?;
        self.require_transition(current, OrderStatus::Accepted)?;

        let ledger = CreditLedger::new(self.ctx);
        ledger.post_in_tx(&mut tx, retailer_id, LedgerEntryType::OrderCredit, order_total, Some(order_id)).await?;

        let items = sqlx::query("SELECT product_id, quantity FROM order_items WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;
        let vendor_row = sqlx::query("SELECT vendor_id FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;
        let vendor_id: Option<uuid::Uuid> = vendor_row.get("vendor_id");
        let Some(vendor_id) = vendor_id else {
            return Err(CoreError::Conflict { message: "order has no assigned vendor".to_string() });
        };

        for item in items {
            let product_id: uuid::Uuid = item.get("product_id");
            let quantity: i64 = item.get("quantity");
            let updated = sqlx::query(
                "UPDATE vendor_product_offers SET stock = stock - $3
                 WHERE vendor_id = $1 AND product_id = $2 AND stock >= $3
                 RETURNING stock",
            )
            .bind(vendor_id)
            .bind(product_id)
            .bind(quantity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;
            if updated.is_none() {
                return Err(CoreError::BusinessRule { message: "vendor stock insufficient at acceptance time".to_string() });
            }
        }

        sqlx::query("UPDATE orders SET status = 'ACCEPTED', updated_at = $2 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;
        sqlx::query(
            "UPDATE vendors SET active_orders_count = active_orders_count + 1,
                                 pending_orders_count = GREATEST(pending_orders_count - 1, 0)
             WHERE id = $1",
        )
        .bind(vendor_id)
        .execute(&mut *tx)
        .await
        .map_err(serialization_aware_error)?;

        let retry_row = sqlx::query(
            "UPDATE vendor_assignment_retries SET status = 'ACCEPTED'
             WHERE order_id = $1 AND vendor_id = $2 AND status = 'PENDING'
             RETURNING assigned_at",
        )
        .bind(order_id.as_uuid())
        .bind(vendor_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(serialization_aware_error)?;

        insert_status_log(&mut tx, order_id, Some(current), OrderStatus::Accepted, actor_id, None, now).await?;

        tx.commit().await.map_err(serialization_aware_error)?;

        let response_minutes = retry_row.map(|r| {
            let assigned_at: chrono::DateTime<chrono::Utc> = r.get("assigned_at");
            (now - assigned_at).num_minutes()
        });
        let scorer = crate::vendor_scorer::VendorScorer::new(self.ctx);
        let mut data = serde_json::json!({ "order_id": order_id.to_string() });
        if let Some(minutes) = response_minutes {
            data["response_minutes"] = serde_json::json!(minutes);
        }
        if let Err(e) = scorer.record(VendorId::from_uuid(vendor_id), "ACCEPTED", data).await {
            warn!(%order_id, error = %e, "failed to record ACCEPTED scorer event");
        }

        Ok(())
    }

    pub async fn dispatch(&self, order_id: OrderId, actor_id: Option<&str>) -> CoreResult<()> {
        self.transition(order_id, OrderStatus::Dispatched, actor_id, None).await
    }

    pub async fn deliver(&self, order_id: OrderId, actor_id: Option<&str>) -> CoreResult<()> {
        self.transition(order_id, OrderStatus::Delivered, actor_id, None).await
    }

    /// Completes a delivered order. Emits the C4 `DELIVERED` scoring event
    /// for the assigned vendor after commit — the final signal in the
    /// vendor's delivery-success history.
    pub async fn complete(&self, order_id: OrderId, actor_id: Option<&str>) -> CoreResult<()> {
        let vendor_id = sqlx::query("SELECT vendor_id FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?
            .and_then(|r| r.get::<Option<uuid::Uuid>, _>("vendor_id"));

        self.transition(order_id, OrderStatus::Completed, actor_id, None).await?;

        if let Some(vendor_id) = vendor_id {
            let scorer = crate::vendor_scorer::VendorScorer::new(self.ctx);
            if let Err(e) = scorer
                .record(VendorId::from_uuid(vendor_id), "DELIVERED", serde_json::json!({ "order_id": order_id.to_string() }))
                .await
            {
                warn!(%order_id, error = %e, "failed to record DELIVERED scorer event");
            }
        }
        Ok(())
    }

    /// Cancels an order. If a ledger credit was already posted (order had
    /// reached ACCEPTED or later), reverses it with a REFUND_DEBIT, restores
    /// vendor stock, and decrements the vendor's active-order count, all in
    /// the same transaction as the status change. The C4 `CANCELLED` event
    /// is emitted after commit — it is a scoring signal, not part of the
    /// transactional invariant.
    pub async fn cancel(&self, order_id: OrderId, retailer_id: RetailerId, reason: &str, actor_id: Option<&str>) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.db.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;

        let current = self.lock_order(&mut tx, order_id).await?;
        self.require_transition(current, OrderStatus::Cancelled)?;

        let had_acceptance = current != OrderStatus::Draft && current != OrderStatus::Confirmed && current != OrderStatus::VendorAssigned;
        let mut vendor_id = None;
        if had_acceptance {
            let credit_row = sqlx::query("SELECT amount FROM credit_ledger_entries WHERE order_id = $1 AND entry_type = 'ORDER_CREDIT' LIMIT 1")
                .bind(order_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(serialization_aware_error)?;
            if let Some(row) = credit_row {
                let refunded = sqlx::query("SELECT 1 FROM credit_ledger_entries WHERE order_id = $1 AND entry_type = 'REFUND_DEBIT' LIMIT 1")
                    .bind(order_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(serialization_aware_error)?;
                if refunded.is_none() {
                    let amount = Money::from_minor(row.get("amount"));
                    let ledger = CreditLedger::new(self.ctx);
                    ledger.post_in_tx(&mut tx, retailer_id, LedgerEntryType::RefundDebit, amount, Some(order_id)).await?;
                }
            }

            let vendor_row = sqlx::query("SELECT vendor_id FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(serialization_aware_error)?;
            let vid: Option<uuid::Uuid> = vendor_row.get("vendor_id");
            vendor_id = vid.map(VendorId::from_uuid);

            if let Some(vid) = vid {
                let items = sqlx::query("SELECT product_id, quantity FROM order_items WHERE order_id = $1")
                    .bind(order_id.as_uuid())
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(serialization_aware_error)?;
                for item in items {
                    let product_id: uuid::Uuid = item.get("product_id");
                    let quantity: i64 = item.get("quantity");
                    sqlx::query("UPDATE vendor_product_offers SET stock = stock + $3 WHERE vendor_id = $1 AND product_id = $2")
                        .bind(vid)
                        .bind(product_id)
                        .bind(quantity)
                        .execute(&mut *tx)
                        .await
                        .map_err(serialization_aware_error)?;
                }
                sqlx::query("UPDATE vendors SET active_orders_count = GREATEST(active_orders_count - 1, 0) WHERE id = $1")
                    .bind(vid)
                    .execute(&mut *tx)
                    .await
                    .map_err(serialization_aware_error)?;
            }
        } else if current == OrderStatus::VendorAssigned {
            // Order never reached acceptance, but `assign_vendor` already
            // incremented the assigned vendor's pending-order slot — release it
            // here so cancellation doesn't leak capacity.
            let vendor_row = sqlx::query("SELECT vendor_id FROM orders WHERE id = $1")
                .bind(order_id.as_uuid())
                .fetch_one(&mut *tx)
                .await
                .map_err(serialization_aware_error)?;
            let vid: Option<uuid::Uuid> = vendor_row.get("vendor_id");
            vendor_id = vid.map(VendorId::from_uuid);
            if let Some(vid) = vid {
                sqlx::query("UPDATE vendors SET pending_orders_count = GREATEST(pending_orders_count - 1, 0) WHERE id = $1")
                    .bind(vid)
                    .execute(&mut *tx)
                    .await
                    .map_err(serialization_aware_error)?;
            }
        }

        sqlx::query("UPDATE orders SET status = 'CANCELLED', updated_at = $2 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;

        insert_status_log(&mut tx, order_id, Some(current), OrderStatus::Cancelled, actor_id, Some(reason), now)
            .await
            .map_err(|_| CoreError::Internal(anyhow::anyhow!("failed to log cancellation")))?;

        tx.commit().await.map_err(serialization_aware_error)?;

        if let Some(vid) = vendor_id {
            let scorer = crate::vendor_scorer::VendorScorer::new(self.ctx);
            if let Err(e) = scorer.record(vid, "CANCELLED", serde_json::json!({ "order_id": order_id.to_string() })).await {
                warn!(%order_id, %vid, error = %e, "failed to record CANCELLED scorer event");
            }
        }

        info!(%order_id, reason, "order cancelled");
        Ok(())
    }

    /// Generic transition for steps with no side effect beyond the status
    /// change and status log entry (CONFIRMED, DISPATCHED, DELIVERED, COMPLETED).
    async fn transition(&self, order_id: OrderId, to: OrderStatus, actor_id: Option<&str>, reason: Option<&str>) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let mut tx = self.ctx.db.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        let current = self.lock_order(&mut tx, order_id).await?;
        self.require_transition(current, to)?;

        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(status_str(to))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        insert_status_log(&mut tx, order_id, Some(current), to, actor_id, reason, now).await?;
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;
        info!(%order_id, ?to, "order transitioned");
        Ok(())
    }

    fn require_transition(&self, current: OrderStatus, to: OrderStatus) -> CoreResult<()> {
        if current.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::Conflict { message: format!("cannot transition order from {current:?} to {to:?}") })
        }
    }

    async fn lock_order(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, order_id: OrderId) -> CoreResult<OrderStatus> {
        let row = sqlx::query("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let Some(row) = row else {
            return Err(CoreError::NotFound { entity: "order", id: order_id.to_string() });
        };
        let status: String = row.get("status");
        Ok(status_from_str(&status))
    }
}

async fn insert_status_log(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    order_id: OrderId,
    from_status: Option<OrderStatus>,
    to_status: OrderStatus,
    actor_id: Option<&str>,
    reason: Option<&str>,
    at: chrono::DateTime<chrono::Utc>,
) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO order_status_log (order_id, from_status, to_status, actor_id, reason, at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(order_id.as_uuid())
    .bind(from_status.map(status_str))
    .bind(status_str(to_status))
    .bind(actor_id)
    .bind(reason)
    .bind(at)
    .execute(&mut **tx)
    .await
    .map_err(|e| CoreError::Internal(e.into()))?;
    Ok(())
}

const fn status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::Draft => "DRAFT",
        OrderStatus::Confirmed => "CONFIRMED",
        OrderStatus::VendorAssigned => "VENDOR_ASSIGNED",
        OrderStatus::Accepted => "ACCEPTED",
        OrderStatus::Dispatched => "DISPATCHED",
        OrderStatus::Delivered => "DELIVERED",
        OrderStatus::Completed => "COMPLETED",
        OrderStatus::Cancelled => "CANCELLED",
    }
}

fn status_from_str(s: &str) -> OrderStatus {
    match s {
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

fn serialization_aware_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return CoreError::Transient { message: db_err.message().to_string() };
        }
    }
    CoreError::Internal(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_reject_skips() {
        assert!(OrderStatus::Draft.can_transition_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Draft.can_transition_to(OrderStatus::Accepted));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Dispatched));
    }

    #[test]
    fn status_str_round_trips() {
        for s in [
            OrderStatus::Draft,
            OrderStatus::Confirmed,
            OrderStatus::VendorAssigned,
            OrderStatus::Accepted,
            OrderStatus::Dispatched,
            OrderStatus::Delivered,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            if s == OrderStatus::Draft {
                continue;
            }
            assert_eq!(status_from_str(status_str(s)), s);
        }
    }
}
