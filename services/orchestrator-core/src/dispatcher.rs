//! C8 — Order Dispatcher: drives an order from DRAFT through vendor
//! assignment, and an accepted vendor through its acceptance/retry
//! sub-workflows, checkpointing every step through the workflow journal so
//! a crash mid-dispatch resumes instead of restarting or double-applying
//! side effects.
//!
//! Mirrors `execution-router::smart_router::Router`'s role as the single
//! place that strings together admission, candidate selection, and state
//! transition into one routed operation — generalized from one-shot venue
//! routing to a checkpointed, resumable multi-step workflow.

use crate::admission::AdmissionController;
use crate::context::Context;
use crate::order_machine::OrderStateMachine;
use crate::types::{AdmissionDecision, Order, OrderStatus, Product, Retailer, Vendor};
use crate::vendor_selector::{SelectionStrategy, VendorSelector};
use crate::workflow::{WorkflowJournal, WorkflowState, ACCEPTANCE_STEPS, DISPATCH_STEPS, RETRY_STEPS};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{OrderId, VendorId};
use orchestrator_common::money::Money;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    VendorAssigned,
    NoVendorAvailable,
    Rejected { reason_code: &'static str, available_credit: Option<Money> },
    NeedsApproval,
}

pub struct Dispatcher<'a> {
    ctx: &'a Context,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Runs the full dispatch workflow for a freshly-uploaded order:
    /// VALIDATE -> ADMIT -> PERSIST_DRAFT -> SELECT_VENDOR ->
    /// TRANSITION_TO_ASSIGNED -> NOTIFY. Every step advances the journal
    /// before its side effect, so a resumed run can tell which steps already
    /// landed.
    pub async fn dispatch(
        &self,
        order: &Order,
        retailer: &Retailer,
        product: &Product,
        candidates: &[Vendor],
        current_hour: u8,
    ) -> CoreResult<DispatchOutcome> {
        let journal = WorkflowJournal::new(self.ctx);
        let wf_id = journal.begin("DISPATCH", Some(order.id)).await?;

        journal.advance(wf_id, DISPATCH_STEPS[0], 0, json!({})).await?;

        let admission = AdmissionController::new(self.ctx);
        let decision = admission.admit(order.id, retailer, order.total()).await?;
        journal.advance(wf_id, DISPATCH_STEPS[1], 1, json!({ "decision": format!("{:?}", decision.decision) })).await?;

        match decision.decision {
            AdmissionDecision::Reject => {
                journal.complete(wf_id).await?;
                return Ok(DispatchOutcome::Rejected {
                    reason_code: decision.reason_code,
                    available_credit: decision.available_credit,
                });
            }
            AdmissionDecision::NeedsApproval => {
                journal.complete(wf_id).await?;
                return Ok(DispatchOutcome::NeedsApproval);
            }
            AdmissionDecision::Accept => {}
        }

        journal.advance(wf_id, DISPATCH_STEPS[2], 2, json!({})).await?;

        let exclude: Vec<VendorId> = Vec::new();
        let selector = VendorSelector::new(self.ctx, SelectionStrategy::RoundRobin);
        let selection = selector.select(product, order.quantity_of(product.id), candidates, current_hour, &exclude).await?;
        journal
            .advance(
                wf_id,
                DISPATCH_STEPS[3],
                3,
                json!({ "ranked": selection.as_ref().map(|s| s.considered.clone()).unwrap_or_default() }),
            )
            .await?;

        let Some(selection) = selection else {
            journal.fail(wf_id, "no vendor candidates available").await?;
            return Ok(DispatchOutcome::NoVendorAvailable);
        };

        let machine = OrderStateMachine::new(self.ctx);
        machine.assign_vendor(order.id, selection.vendor_id, product.id, None).await?;
        journal.advance(wf_id, DISPATCH_STEPS[4], 4, json!({ "vendor_id": selection.vendor_id })).await?;

        self.notify_assignment(order, retailer, selection.vendor_id);
        journal.advance(wf_id, DISPATCH_STEPS[5], 5, json!({})).await?;
        journal.complete(wf_id).await?;

        info!(order_id = %order.id, vendor_id = %selection.vendor_id, "order dispatched to vendor");
        Ok(DispatchOutcome::VendorAssigned)
    }

    /// Runs the vendor-acceptance workflow once the assigned vendor has
    /// responded with acceptance: RECORD_RESPONSE -> TRANSITION_TO_ACCEPTED
    /// -> POST_LEDGER -> DECREMENT_STOCK -> NOTIFY_RETAILER. The ledger post
    /// and stock decrement happen together inside `OrderStateMachine::accept`,
    /// which is itself transactional, so the journal records them as one step.
    pub async fn record_acceptance(&self, order: &Order, retailer: &Retailer) -> CoreResult<()> {
        let journal = WorkflowJournal::new(self.ctx);
        let wf_id = journal.begin("ACCEPTANCE", Some(order.id)).await?;

        journal.advance(wf_id, ACCEPTANCE_STEPS[0], 0, json!({})).await?;

        let machine = OrderStateMachine::new(self.ctx);
        machine.accept(order.id, order.total(), retailer.id, None).await?;
        journal.advance(wf_id, ACCEPTANCE_STEPS[1], 1, json!({})).await?;
        journal.advance(wf_id, ACCEPTANCE_STEPS[2], 2, json!({})).await?;
        journal.advance(wf_id, ACCEPTANCE_STEPS[3], 3, json!({})).await?;

        self.ctx.notifier.notify(
            &retailer.phone,
            format!("vendor_accepted:{}:{}", order.id, retailer.phone),
            crate::notifier::templates::vendor_accepted(&order.order_number),
        );
        journal.advance(wf_id, ACCEPTANCE_STEPS[4], 4, json!({})).await?;
        journal.complete(wf_id).await?;

        info!(order_id = %order.id, "vendor acceptance recorded");
        Ok(())
    }

    /// Runs the vendor-retry workflow after a decline or response timeout:
    /// MARK_RETRY_FAILED -> SELECT_NEXT_VENDOR -> TRANSITION_TO_ASSIGNED_AGAIN.
    /// After `max_vendor_attempts` exhausted retries, the order is flagged
    /// `needs_admin` rather than moved to a terminal failure state — a human
    /// always has a path to rescue a stuck order.
    pub async fn retry_vendor(
        &self,
        order: &Order,
        product: &Product,
        candidates: &[Vendor],
        current_hour: u8,
        already_tried: &[VendorId],
    ) -> CoreResult<RetryOutcome> {
        let journal = WorkflowJournal::new(self.ctx);
        let wf_id = journal.begin("VENDOR_RETRY", Some(order.id)).await?;

        journal.advance(wf_id, RETRY_STEPS[0], 0, json!({ "excluded": already_tried })).await?;

        if already_tried.len() as u32 >= self.ctx.config.max_vendor_attempts {
            journal.fail(wf_id, "max vendor attempts exhausted").await?;
            warn!(order_id = %order.id, attempts = already_tried.len(), "vendor retries exhausted, escalating to admin");
            return Ok(RetryOutcome::EscalatedToAdmin);
        }

        let selector = VendorSelector::new(self.ctx, SelectionStrategy::RoundRobin);
        let selection = selector.select(product, order.quantity_of(product.id), candidates, current_hour, already_tried).await?;
        journal
            .advance(wf_id, RETRY_STEPS[1], 1, json!({ "ranked": selection.as_ref().map(|s| s.considered.clone()).unwrap_or_default() }))
            .await?;

        let Some(selection) = selection else {
            journal.fail(wf_id, "no remaining vendor candidates").await?;
            return Ok(RetryOutcome::EscalatedToAdmin);
        };

        let machine = OrderStateMachine::new(self.ctx);
        machine.assign_vendor(order.id, selection.vendor_id, product.id, None).await?;
        journal.advance(wf_id, RETRY_STEPS[2], 2, json!({ "vendor_id": selection.vendor_id })).await?;
        journal.complete(wf_id).await?;

        Ok(RetryOutcome::ReassignedTo(selection.vendor_id))
    }

    /// Resumes a workflow found by the recovery worker's stale scan, by
    /// re-entering the appropriate sub-workflow from its last checkpoint
    /// rather than from the beginning. Never fabricates a vendor acceptance:
    /// a crash that left an order `VENDOR_ASSIGNED` only gets its
    /// notifications resent, the acceptance timeout `assign_vendor` already
    /// armed is left to run its own course.
    pub async fn resume(
        &self,
        wf: &WorkflowState,
        order: &Order,
        retailer: &Retailer,
        product: &Product,
        candidates: &[Vendor],
        current_hour: u8,
    ) -> CoreResult<()> {
        let journal = WorkflowJournal::new(self.ctx);
        if order.status == OrderStatus::Accepted || order.status.is_terminal() {
            journal.complete(wf.id).await?;
            return Ok(());
        }

        match wf.wf_type.as_str() {
            "DISPATCH" | "VENDOR_RETRY" => self.resume_assignment(wf, order, retailer, product, candidates, current_hour).await,
            "ACCEPTANCE" => {
                if order.status == OrderStatus::VendorAssigned {
                    self.record_acceptance(order, retailer).await
                } else {
                    journal.complete(wf.id).await
                }
            }
            other => Err(CoreError::Conflict { message: format!("cannot resume unknown workflow type {other}") }),
        }
    }

    /// Resumes a DISPATCH or VENDOR_RETRY workflow stalled at or before
    /// SELECT_VENDOR/SELECT_NEXT_VENDOR. Reuses the ranked candidate list the
    /// crashed run already persisted into `step_state` rather than
    /// re-ranking, so a resume can't hand the order to a different vendor
    /// than the notification the retailer may have already received names.
    async fn resume_assignment(
        &self,
        wf: &WorkflowState,
        order: &Order,
        retailer: &Retailer,
        product: &Product,
        candidates: &[Vendor],
        current_hour: u8,
    ) -> CoreResult<()> {
        let journal = WorkflowJournal::new(self.ctx);

        if order.status == OrderStatus::VendorAssigned {
            let Some(vendor_id) = order.vendor_id else {
                return Err(CoreError::Conflict { message: "order is VENDOR_ASSIGNED with no vendor_id".to_string() });
            };
            self.notify_assignment(order, retailer, vendor_id);
            journal.complete(wf.id).await?;
            return Ok(());
        }

        if wf.wf_type == "DISPATCH" && wf.step_ordinal < 1 {
            let admission = AdmissionController::new(self.ctx);
            let decision = admission.admit(order.id, retailer, order.total()).await?;
            match decision.decision {
                AdmissionDecision::Reject | AdmissionDecision::NeedsApproval => {
                    journal.complete(wf.id).await?;
                    return Ok(());
                }
                AdmissionDecision::Accept => {}
            }
        }

        let already_tried: Vec<VendorId> = wf
            .step_state
            .get("excluded")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|id| id.as_str().and_then(|s| s.parse().ok())).collect())
            .unwrap_or_default();

        let ranked: Vec<VendorId> = wf
            .step_state
            .get("ranked")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|id| id.as_str().and_then(|s| s.parse().ok())).collect())
            .unwrap_or_default();

        let vendor_id = if let Some(&id) = ranked.first() {
            id
        } else {
            let selector = VendorSelector::new(self.ctx, SelectionStrategy::RoundRobin);
            let Some(selection) =
                selector.select(product, order.quantity_of(product.id), candidates, current_hour, &already_tried).await?
            else {
                journal.fail(wf.id, "no vendor candidates available on resume").await?;
                return Ok(());
            };
            selection.vendor_id
        };

        let machine = OrderStateMachine::new(self.ctx);
        machine.assign_vendor(order.id, vendor_id, product.id, None).await?;
        self.notify_assignment(order, retailer, vendor_id);
        journal.complete(wf.id).await?;
        Ok(())
    }

    fn notify_assignment(&self, order: &Order, retailer: &Retailer, vendor_id: VendorId) {
        self.ctx.notifier.notify(
            &retailer.phone,
            format!("order_confirmation:{}:{}", order.id, retailer.phone),
            crate::notifier::templates::order_confirmation(&order.order_number, order.total()),
        );
        self.ctx.notifier.notify(
            vendor_id.to_string(),
            format!("vendor_assignment:{}:{}", order.id, vendor_id),
            crate::notifier::templates::vendor_assignment(&order.order_number, &retailer.phone, order.total()),
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    ReassignedTo(VendorId),
    EscalatedToAdmin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_outcome_variants_are_distinct() {
        let a = RetryOutcome::EscalatedToAdmin;
        let b = RetryOutcome::ReassignedTo(VendorId::new());
        assert_ne!(a, b);
    }

    #[test]
    fn dispatch_outcome_variants_are_distinct() {
        let rejected =
            DispatchOutcome::Rejected { reason_code: "CREDIT_LIMIT_EXCEEDED", available_credit: Some(Money::new(100, 0)) };
        assert_ne!(rejected, DispatchOutcome::NeedsApproval);
    }
}
