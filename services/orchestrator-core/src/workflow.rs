//! C2 — Workflow Journal: per-order durable workflow state with step
//! checkpoints and heartbeats, so a crash mid-operation is recoverable
//! without re-running completed side effects.

use crate::context::Context;
use chrono::{DateTime, Utc};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{OrderId, WorkflowId};
use serde_json::Value;
use sqlx::Row;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    InProgress,
    Completed,
    Failed,
}

impl WorkflowStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub id: WorkflowId,
    pub order_id: Option<OrderId>,
    pub wf_type: String,
    pub current_step: String,
    pub step_ordinal: i32,
    pub step_state: Value,
    pub status: WorkflowStatus,
    pub heartbeat_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub attempts: i32,
}

pub struct WorkflowJournal<'a> {
    ctx: &'a Context,
}

impl<'a> WorkflowJournal<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn begin(&self, wf_type: &str, order_id: Option<OrderId>) -> CoreResult<WorkflowId> {
        let id = WorkflowId::new();
        let now = self.ctx.clock.now();
        sqlx::query(
            "INSERT INTO workflow_states
                (id, order_id, wf_type, current_step, step_ordinal, step_state, status, heartbeat_at, started_at, attempts)
             VALUES ($1, $2, $3, '', -1, '{}'::jsonb, 'IN_PROGRESS', $4, $4, 0)",
        )
        .bind(id.as_uuid())
        .bind(order_id.map(|o| o.as_uuid()))
        .bind(wf_type)
        .bind(now)
        .execute(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(id)
    }

    /// Advances the journal to `step` (numbered by `step_ordinal`), atomically
    /// updating the heartbeat. Monotonic: advancing to a step at or behind
    /// the current ordinal is a no-op, so a retried step never rewinds
    /// progress (the "duplicate advance is idempotent" invariant).
    pub async fn advance(&self, wf_id: WorkflowId, step: &str, step_ordinal: i32, step_state: Value) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        let updated = sqlx::query(
            "UPDATE workflow_states
             SET current_step = $2, step_ordinal = $3, step_state = $4, heartbeat_at = $5
             WHERE id = $1 AND status = 'IN_PROGRESS' AND step_ordinal < $3
             RETURNING id",
        )
        .bind(wf_id.as_uuid())
        .bind(step)
        .bind(step_ordinal)
        .bind(&step_state)
        .bind(now)
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        if updated.is_none() {
            debug!(%wf_id, step, step_ordinal, "advance no-op: already at or past this step");
        }
        Ok(())
    }

    pub async fn complete(&self, wf_id: WorkflowId) -> CoreResult<()> {
        sqlx::query("UPDATE workflow_states SET status = 'COMPLETED' WHERE id = $1 AND status = 'IN_PROGRESS'")
            .bind(wf_id.as_uuid())
            .execute(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn fail(&self, wf_id: WorkflowId, error: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE workflow_states SET status = 'FAILED', attempts = attempts + 1, step_state = step_state || jsonb_build_object('last_error', $2::text)
             WHERE id = $1",
        )
        .bind(wf_id.as_uuid())
        .bind(error)
        .execute(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Workflows whose heartbeat is older than `stale_threshold` and still
    /// `IN_PROGRESS` — candidates for the recovery worker to resume.
    pub async fn scan_stale(&self, now: DateTime<Utc>) -> CoreResult<Vec<WorkflowState>> {
        let threshold_secs = self.ctx.config.stale_threshold.as_secs() as f64;
        let rows = sqlx::query(
            "SELECT id, order_id, wf_type, current_step, step_ordinal, step_state, status, heartbeat_at, started_at, attempts
             FROM workflow_states
             WHERE status = 'IN_PROGRESS' AND heartbeat_at < $1 - make_interval(secs => $2)",
        )
        .bind(now)
        .bind(threshold_secs)
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(rows.into_iter().map(row_to_state).collect())
    }

    /// All `IN_PROGRESS` workflows, read once at process start to resume
    /// anything left mid-flight by a prior crash.
    pub async fn scan_incomplete(&self) -> CoreResult<Vec<WorkflowState>> {
        let rows = sqlx::query(
            "SELECT id, order_id, wf_type, current_step, step_ordinal, step_state, status, heartbeat_at, started_at, attempts
             FROM workflow_states WHERE status = 'IN_PROGRESS'",
        )
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(rows.into_iter().map(row_to_state).collect())
    }
}

fn row_to_state(row: sqlx::postgres::PgRow) -> WorkflowState {
    let id: uuid::Uuid = row.get("id");
    let order_id: Option<uuid::Uuid> = row.get("order_id");
    let status: String = row.get("status");
    WorkflowState {
        id: WorkflowId::from_uuid(id),
        order_id: order_id.map(OrderId::from_uuid),
        wf_type: row.get("wf_type"),
        current_step: row.get("current_step"),
        step_ordinal: row.get("step_ordinal"),
        step_state: row.get("step_state"),
        status: WorkflowStatus::from_str(&status),
        heartbeat_at: row.get("heartbeat_at"),
        started_at: row.get("started_at"),
        attempts: row.get("attempts"),
    }
}

/// Named steps of the order-dispatch workflow (see the dispatcher module),
/// in the order the journal expects them to advance.
pub const DISPATCH_STEPS: [&str; 6] = ["VALIDATE", "ADMIT", "PERSIST_DRAFT", "SELECT_VENDOR", "TRANSITION_TO_ASSIGNED", "NOTIFY"];

/// Named steps of the vendor-acceptance workflow.
pub const ACCEPTANCE_STEPS: [&str; 5] =
    ["RECORD_RESPONSE", "TRANSITION_TO_ACCEPTED", "POST_LEDGER", "DECREMENT_STOCK", "NOTIFY_RETAILER"];

/// Named steps of the vendor-retry (decline/timeout) workflow.
pub const RETRY_STEPS: [&str; 3] = ["MARK_RETRY_FAILED", "SELECT_NEXT_VENDOR", "TRANSITION_TO_ASSIGNED_AGAIN"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_steps_match_design() {
        assert_eq!(DISPATCH_STEPS.len(), 6);
        assert_eq!(DISPATCH_STEPS[3], "SELECT_VENDOR");
    }
}
