//! C1 — Event Store: durable append-only store of inbound webhook events,
//! keyed by `(channel, external_id)` for idempotency under at-least-once
//! delivery from the messaging gateway.

use crate::context::Context;
use chrono::{DateTime, Utc};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::EventId;
use serde_json::Value;
use sqlx::Row;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EventStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "PROCESSING" => Self::Processing,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: EventId,
    pub channel: String,
    pub external_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub status: EventStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RecordOutcome {
    pub stored: bool,
    pub event_id: EventId,
}

pub struct EventStore<'a> {
    ctx: &'a Context,
}

impl<'a> EventStore<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Stores the event synchronously before the HTTP response is sent.
    /// Duplicate `(channel, external_id)` is idempotent: returns the
    /// existing id with `stored=false`, never double-inserts.
    pub async fn record(&self, channel: &str, external_id: &str, payload: Value) -> CoreResult<RecordOutcome> {
        let existing = sqlx::query(
            "SELECT id FROM webhook_events WHERE channel = $1 AND external_id = $2",
        )
        .bind(channel)
        .bind(external_id)
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        if let Some(row) = existing {
            let id: uuid::Uuid = row.get("id");
            info!(channel, external_id, "duplicate webhook event, idempotent no-op");
            return Ok(RecordOutcome { stored: false, event_id: EventId::from_uuid(id) });
        }

        let event_id = EventId::new();
        let now = self.ctx.clock.now();
        let inserted = sqlx::query(
            "INSERT INTO webhook_events (id, channel, external_id, payload, received_at, status, attempts)
             VALUES ($1, $2, $3, $4, $5, 'PENDING', 0)
             ON CONFLICT (channel, external_id) DO NOTHING
             RETURNING id",
        )
        .bind(event_id.as_uuid())
        .bind(channel)
        .bind(external_id)
        .bind(&payload)
        .bind(now)
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        match inserted {
            Some(_) => Ok(RecordOutcome { stored: true, event_id }),
            None => {
                // Lost the insert race to a concurrent idempotent retry.
                let row = sqlx::query(
                    "SELECT id FROM webhook_events WHERE channel = $1 AND external_id = $2",
                )
                .bind(channel)
                .bind(external_id)
                .fetch_one(&self.ctx.db)
                .await
                .map_err(|e| CoreError::Internal(e.into()))?;
                let id: uuid::Uuid = row.get("id");
                Ok(RecordOutcome { stored: false, event_id: EventId::from_uuid(id) })
            }
        }
    }

    /// Atomically flips PENDING → PROCESSING for up to `limit` events,
    /// setting a lease deadline. Also reclaims PROCESSING events whose
    /// lease has expired.
    pub async fn claim_pending(&self, limit: i64) -> CoreResult<Vec<WebhookEvent>> {
        let lease_timeout_secs = self.ctx.config.lease_timeout.as_secs() as f64;
        let rows = sqlx::query(
            "UPDATE webhook_events
             SET status = 'PROCESSING', next_attempt_at = NULL
             WHERE id IN (
                 SELECT id FROM webhook_events
                 WHERE (status = 'PENDING' AND (next_attempt_at IS NULL OR next_attempt_at <= now()))
                    OR (status = 'PROCESSING' AND received_at < now() - make_interval(secs => $2))
                 ORDER BY received_at
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, channel, external_id, payload, received_at, status, attempts, last_error, next_attempt_at",
        )
        .bind(limit)
        .bind(lease_timeout_secs)
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    /// Marks the event as durably completed.
    pub async fn complete(&self, event_id: EventId) -> CoreResult<()> {
        sqlx::query("UPDATE webhook_events SET status = 'COMPLETED' WHERE id = $1")
            .bind(event_id.as_uuid())
            .execute(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Records a processing failure; after `MAX_ATTEMPTS` the event becomes
    /// dead-lettered (status `FAILED`) and must surface to the admin queue.
    pub async fn fail(&self, event_id: EventId, error: &str, next_attempt_at: DateTime<Utc>) -> CoreResult<()> {
        let max_attempts: i32 = self.ctx.config.max_webhook_attempts.try_into().unwrap_or(i32::MAX);
        let row = sqlx::query(
            "UPDATE webhook_events
             SET attempts = attempts + 1,
                 last_error = $2,
                 status = CASE WHEN attempts + 1 >= $3 THEN 'FAILED' ELSE 'PENDING' END,
                 next_attempt_at = $4
             WHERE id = $1
             RETURNING attempts, status",
        )
        .bind(event_id.as_uuid())
        .bind(error)
        .bind(max_attempts)
        .bind(next_attempt_at)
        .fetch_one(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let status: String = row.get("status");
        if status == "FAILED" {
            warn!(%event_id, error, "webhook event dead-lettered after exhausting retries");
        }
        Ok(())
    }

    /// Exponential backoff for re-attempting a failed event: base 30s,
    /// capped at 1 hour.
    #[must_use]
    pub fn backoff(attempts: u32) -> std::time::Duration {
        let base = 30u64;
        let capped_exp = attempts.min(12);
        let secs = base.saturating_mul(1u64 << capped_exp);
        std::time::Duration::from_secs(secs.min(3600))
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> WebhookEvent {
    let id: uuid::Uuid = row.get("id");
    let status: String = row.get("status");
    WebhookEvent {
        id: EventId::from_uuid(id),
        channel: row.get("channel"),
        external_id: row.get("external_id"),
        payload: row.get("payload"),
        received_at: row.get("received_at"),
        status: EventStatus::from_str(&status),
        attempts: row.get("attempts"),
        last_error: row.get("last_error"),
        next_attempt_at: row.get("next_attempt_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(EventStore::backoff(0), std::time::Duration::from_secs(30));
        assert_eq!(EventStore::backoff(1), std::time::Duration::from_secs(60));
        assert_eq!(EventStore::backoff(20), std::time::Duration::from_secs(3600));
    }

    #[test]
    fn status_str_round_trips() {
        for s in [EventStatus::Pending, EventStatus::Processing, EventStatus::Completed, EventStatus::Failed] {
            assert_eq!(EventStatus::from_str(s.as_str()), s);
        }
    }
}
