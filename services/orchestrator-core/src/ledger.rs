//! C3 — Credit Ledger: append-only monetary ledger per retailer. Every
//! posting transaction runs at `SERIALIZABLE` isolation with a row lock on
//! the retailer, and retries under write conflict.

use crate::context::Context;
use crate::types::{LedgerEntry, LedgerEntryType};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{LedgerEntryId, OrderId, RetailerId};
use orchestrator_common::money::Money;
use sqlx::Row;
use tracing::{error, warn};

pub struct CreditLedger<'a> {
    ctx: &'a Context,
}

impl<'a> CreditLedger<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Posts one ledger entry inside a serializable transaction, retrying
    /// on write-conflict up to `LEDGER_RETRIES` with exponential backoff.
    pub async fn post(
        &self,
        retailer_id: RetailerId,
        entry_type: LedgerEntryType,
        amount: Money,
        order_id: Option<OrderId>,
    ) -> CoreResult<LedgerEntry> {
        let max_retries = self.ctx.config.ledger_retries;
        let mut attempt = 0u32;
        loop {
            match self.try_post(retailer_id, entry_type, amount, order_id).await {
                Ok(entry) => return Ok(entry),
                Err(CoreError::Transient { message }) if attempt < max_retries => {
                    attempt += 1;
                    let backoff = std::time::Duration::from_millis(50u64 * (1u64 << attempt.min(10)));
                    warn!(%retailer_id, attempt, message, "ledger post conflict, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_post(
        &self,
        retailer_id: RetailerId,
        entry_type: LedgerEntryType,
        amount: Money,
        order_id: Option<OrderId>,
    ) -> CoreResult<LedgerEntry> {
        let mut tx = self.ctx.db.begin().await.map_err(|e| CoreError::Internal(e.into()))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(serialization_aware_error)?;

        let entry = post_in_tx(&mut tx, self.ctx.clock.now(), retailer_id, entry_type, amount, order_id).await?;
        tx.commit().await.map_err(serialization_aware_error)?;
        Ok(entry)
    }

    /// Posts within a transaction the caller already holds (e.g. the order
    /// state machine's `SET TRANSACTION ISOLATION LEVEL SERIALIZABLE` block
    /// for an ACCEPTED/CANCELLED transition), so the ledger entry, stock
    /// decrement, and status log insert commit or roll back together. The
    /// caller is responsible for the isolation level, the row lock, and
    /// retrying on `CoreError::Transient`.
    pub async fn post_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        retailer_id: RetailerId,
        entry_type: LedgerEntryType,
        amount: Money,
        order_id: Option<OrderId>,
    ) -> CoreResult<LedgerEntry> {
        post_in_tx(tx, self.ctx.clock.now(), retailer_id, entry_type, amount, order_id).await
    }

    pub async fn available(&self, retailer_id: RetailerId) -> CoreResult<Money> {
        let row = sqlx::query("SELECT credit_limit, outstanding_debt FROM retailers WHERE id = $1")
            .bind(retailer_id.as_uuid())
            .fetch_optional(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let Some(row) = row else {
            return Err(CoreError::NotFound { entity: "retailer", id: retailer_id.to_string() });
        };
        let limit = Money::from_minor(row.get("credit_limit"));
        let debt = Money::from_minor(row.get("outstanding_debt"));
        Ok(limit - debt)
    }

    /// Inserts a REFUND_DEBIT for the open ORDER_CREDIT of `order_id`, iff
    /// one exists and no prior REFUND_DEBIT for the same order exists.
    pub async fn cancel_order_reversal(&self, retailer_id: RetailerId, order_id: OrderId) -> CoreResult<Option<LedgerEntry>> {
        let credit_row = sqlx::query(
            "SELECT amount FROM credit_ledger_entries WHERE order_id = $1 AND entry_type = 'ORDER_CREDIT' LIMIT 1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let Some(credit_row) = credit_row else {
            return Ok(None);
        };

        let already_refunded = sqlx::query(
            "SELECT 1 FROM credit_ledger_entries WHERE order_id = $1 AND entry_type = 'REFUND_DEBIT' LIMIT 1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        if already_refunded.is_some() {
            return Ok(None);
        }

        let amount = Money::from_minor(credit_row.get("amount"));
        let entry = self.post(retailer_id, LedgerEntryType::RefundDebit, amount, Some(order_id)).await?;
        Ok(Some(entry))
    }

    pub async fn apply_payment(&self, retailer_id: RetailerId, amount: Money) -> CoreResult<LedgerEntry> {
        self.post(retailer_id, LedgerEntryType::PaymentDebit, amount, None).await
    }
}

/// Shared core of a posting: lock the retailer row, compute the new running
/// balance, reject if it would go negative, insert the entry, update the
/// cached balance. Used both by `try_post`'s own transaction and by
/// `post_in_tx`'s caller-supplied one.
async fn post_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    now: chrono::DateTime<chrono::Utc>,
    retailer_id: RetailerId,
    entry_type: LedgerEntryType,
    amount: Money,
    order_id: Option<OrderId>,
) -> CoreResult<LedgerEntry> {
    let locked = sqlx::query("SELECT outstanding_debt FROM retailers WHERE id = $1 FOR UPDATE")
        .bind(retailer_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(serialization_aware_error)?;

    let Some(locked) = locked else {
        return Err(CoreError::NotFound { entity: "retailer", id: retailer_id.to_string() });
    };
    let previous_balance = Money::from_minor(locked.get::<i64, _>("outstanding_debt"));

    let signed = amount.mul_qty(entry_type.sign());
    let running_balance = previous_balance + signed;
    if running_balance.is_negative() {
        error!(%retailer_id, ?entry_type, "ledger would go negative; fatal invariant violation");
        return Err(CoreError::Internal(anyhow::anyhow!(
            "ledger invariant violated: running balance would be negative for retailer {retailer_id}"
        )));
    }

    let ledger_number: i64 =
        sqlx::query("SELECT COALESCE(MAX(ledger_number), 0) + 1 AS next FROM credit_ledger_entries WHERE retailer_id = $1")
            .bind(retailer_id.as_uuid())
            .fetch_one(&mut **tx)
            .await
            .map_err(serialization_aware_error)?
            .get("next");

    let id = LedgerEntryId::new();
    sqlx::query(
        "INSERT INTO credit_ledger_entries
            (id, retailer_id, ledger_number, order_id, entry_type, amount, previous_balance, running_balance, at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(id.as_uuid())
    .bind(retailer_id.as_uuid())
    .bind(ledger_number)
    .bind(order_id.map(|o| o.as_uuid()))
    .bind(entry_type_str(entry_type))
    .bind(amount.as_minor())
    .bind(previous_balance.as_minor())
    .bind(running_balance.as_minor())
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(serialization_aware_error)?;

    sqlx::query("UPDATE retailers SET outstanding_debt = $2 WHERE id = $1")
        .bind(retailer_id.as_uuid())
        .bind(running_balance.as_minor())
        .execute(&mut **tx)
        .await
        .map_err(serialization_aware_error)?;

    Ok(LedgerEntry { id, retailer_id, ledger_number, order_id, entry_type, amount, previous_balance, running_balance, at: now })
}

const fn entry_type_str(t: LedgerEntryType) -> &'static str {
    match t {
        LedgerEntryType::OrderCredit => "ORDER_CREDIT",
        LedgerEntryType::PaymentDebit => "PAYMENT_DEBIT",
        LedgerEntryType::RefundDebit => "REFUND_DEBIT",
        LedgerEntryType::Adjustment => "ADJUSTMENT",
    }
}

fn serialization_aware_error(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        // Postgres serialization_failure (40001) / deadlock_detected (40P01).
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
    fn entry_type_sign_matches_invariant() {
        assert_eq!(LedgerEntryType::OrderCredit.sign(), 1);
        assert_eq!(LedgerEntryType::PaymentDebit.sign(), -1);
        assert_eq!(LedgerEntryType::RefundDebit.sign(), -1);
    }

    #[test]
    fn refund_of_same_amount_restores_balance() {
        let start = Money::new(1_400, 0);
        let after_credit = start + Money::new(1_400, 0);
        let after_refund = after_credit - Money::new(1_400, 0);
        assert_eq!(after_refund, start);
    }
}
