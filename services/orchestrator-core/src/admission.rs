//! C7 — Admission Controller: evaluates an order against the retailer's
//! credit standing before it is allowed to enter the dispatch workflow.
//! Rules run in a fixed order and the first one that fires decides the
//! outcome — no rule re-evaluation, no scoring across rules.

use crate::context::Context;
use crate::types::{AdmissionDecision, Retailer, RetailerStatus, ScoreCategory};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::OrderId;
use orchestrator_common::money::Money;
use tracing::info;

/// Stable reason codes for rejections/holds, independent of the
/// human-readable `reason` string — `webhook_processor` and the HTTP layer
/// branch on these rather than pattern-matching free text.
pub const REASON_RETAILER_BLOCKED: &str = "RETAILER_NOT_ACTIVE";
pub const REASON_CREDIT_SCORE_TOO_LOW: &str = "CREDIT_SCORE_TOO_LOW";
pub const REASON_TIER_MAX_EXCEEDED: &str = "TIER_MAX_EXCEEDED";
pub const REASON_CREDIT_LIMIT_EXCEEDED: &str = "CREDIT_LIMIT_EXCEEDED";
pub const REASON_NEEDS_APPROVAL: &str = "NEEDS_APPROVAL";
pub const REASON_ACCEPTED: &str = "ACCEPTED";

#[derive(Debug, Clone)]
pub struct AdmissionOutcome {
    pub decision: AdmissionDecision,
    pub reason: String,
    pub reason_code: &'static str,
    /// Only set for `REASON_CREDIT_LIMIT_EXCEEDED` — the retailer's available
    /// credit at decision time, for the templated shortfall reply.
    pub available_credit: Option<Money>,
}

pub struct AdmissionController<'a> {
    ctx: &'a Context,
}

impl<'a> AdmissionController<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Evaluates the order total against the retailer's standing. Rejected
    /// orders are persisted for the retailer's visibility, never silently
    /// dropped.
    pub async fn admit(&self, order_id: OrderId, retailer: &Retailer, order_total: Money) -> CoreResult<AdmissionOutcome> {
        let outcome = evaluate(retailer, order_total);
        if outcome.decision == AdmissionDecision::Reject {
            self.record_rejection(order_id, retailer.id, outcome.reason_code).await?;
        }
        info!(%order_id, retailer_id = %retailer.id, decision = ?outcome.decision, reason_code = outcome.reason_code, reason = %outcome.reason, "admission decision");
        Ok(outcome)
    }

    async fn record_rejection(&self, order_id: OrderId, retailer_id: orchestrator_common::ids::RetailerId, reason_code: &str) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        sqlx::query("INSERT INTO rejected_orders (order_id, retailer_id, reason, at) VALUES ($1, $2, $3, $4)")
            .bind(order_id.as_uuid())
            .bind(retailer_id.as_uuid())
            .bind(reason_code)
            .bind(now)
            .execute(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }
}

/// Pure rule evaluation, independent of persistence, so the decision logic
/// is directly unit-testable against fixture retailers.
#[must_use]
pub fn evaluate(retailer: &Retailer, order_total: Money) -> AdmissionOutcome {
    if retailer.status != RetailerStatus::Active {
        return AdmissionOutcome {
            decision: AdmissionDecision::Reject,
            reason: format!("retailer is not active ({:?})", retailer.status),
            reason_code: REASON_RETAILER_BLOCKED,
            available_credit: None,
        };
    }

    let category = retailer.score_category();

    if category == ScoreCategory::VeryPoor {
        return AdmissionOutcome {
            decision: AdmissionDecision::Reject,
            reason: "retailer credit score is too low for credit orders".to_string(),
            reason_code: REASON_CREDIT_SCORE_TOO_LOW,
            available_credit: None,
        };
    }

    if order_total > category.max_order_amount() {
        return AdmissionOutcome {
            decision: AdmissionDecision::Reject,
            reason: format!("order total {order_total} exceeds the maximum allowed for this credit tier ({})", category.max_order_amount()),
            reason_code: REASON_TIER_MAX_EXCEEDED,
            available_credit: None,
        };
    }

    if order_total > retailer.available_credit() {
        return AdmissionOutcome {
            decision: AdmissionDecision::Reject,
            reason: format!("order total {order_total} exceeds available credit ({})", retailer.available_credit()),
            reason_code: REASON_CREDIT_LIMIT_EXCEEDED,
            available_credit: Some(retailer.available_credit()),
        };
    }

    if matches!(category, ScoreCategory::Poor | ScoreCategory::Fair) && order_total > category.approval_threshold() {
        return AdmissionOutcome {
            decision: AdmissionDecision::NeedsApproval,
            reason: format!("order total {order_total} exceeds the auto-approval threshold for this credit tier"),
            reason_code: REASON_NEEDS_APPROVAL,
            available_credit: None,
        };
    }

    AdmissionOutcome {
        decision: AdmissionDecision::Accept,
        reason: "within credit limits".to_string(),
        reason_code: REASON_ACCEPTED,
        available_credit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_common::ids::RetailerId;

    fn retailer(credit_score: i32, credit_limit: Money, outstanding_debt: Money, status: RetailerStatus) -> Retailer {
        Retailer { id: RetailerId::new(), phone: "+910000000000".to_string(), credit_limit, outstanding_debt, credit_score, status }
    }

    #[test]
    fn blocked_retailer_always_rejected() {
        let r = retailer(900, Money::new(1_000_000, 0), Money::ZERO, RetailerStatus::Blocked);
        let outcome = evaluate(&r, Money::new(10, 0));
        assert_eq!(outcome.decision, AdmissionDecision::Reject);
    }

    #[test]
    fn very_poor_score_is_cash_only() {
        let r = retailer(300, Money::new(1_000_000, 0), Money::ZERO, RetailerStatus::Active);
        let outcome = evaluate(&r, Money::new(10, 0));
        assert_eq!(outcome.decision, AdmissionDecision::Reject);
    }

    #[test]
    fn excellent_score_within_credit_is_accepted() {
        let r = retailer(850, Money::new(1_000_000, 0), Money::ZERO, RetailerStatus::Active);
        let outcome = evaluate(&r, Money::new(5_000, 0));
        assert_eq!(outcome.decision, AdmissionDecision::Accept);
    }

    #[test]
    fn fair_score_above_approval_threshold_needs_approval() {
        let r = retailer(650, Money::new(1_000_000, 0), Money::ZERO, RetailerStatus::Active);
        let outcome = evaluate(&r, Money::new(50_000, 0));
        assert_eq!(outcome.decision, AdmissionDecision::NeedsApproval);
    }

    #[test]
    fn order_exceeding_available_credit_is_rejected() {
        let r = retailer(850, Money::new(1_000, 0), Money::new(990, 0), RetailerStatus::Active);
        let outcome = evaluate(&r, Money::new(100, 0));
        assert_eq!(outcome.decision, AdmissionDecision::Reject);
    }

    #[test]
    fn order_exceeding_tier_max_is_rejected_before_credit_check() {
        let r = retailer(650, Money::new(10_000_000, 0), Money::ZERO, RetailerStatus::Active);
        let outcome = evaluate(&r, Money::new(100_000, 0));
        assert_eq!(outcome.decision, AdmissionDecision::Reject);
        assert!(outcome.reason.contains("maximum allowed"));
    }
}
