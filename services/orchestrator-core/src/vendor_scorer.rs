//! C4 — Vendor Scorer: computes a per-vendor reliability score from the
//! append-only score event stream, with a single-writer cached snapshot
//! that readers tolerate staleness from (bounded by `SNAPSHOT_TTL`).
//!
//! The weighted-sum aggregation itself (`overall_score`) is a pure function
//! of its five components — deterministic and independently testable,
//! mirroring how `execution-router::smart_router` keeps its algorithm
//! engines as plain functions over a `MarketContext` rather than
//! DB-coupled methods.

use crate::context::Context;
use crate::types::{VendorScoreSnapshot, VendorTier};
use chrono::{DateTime, Duration, Utc};
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::VendorId;
use orchestrator_common::money::Money;
use serde_json::Value;
use sqlx::Row;

/// Neutral component value for vendors with no qualifying events yet, so new
/// vendors are never systematically excluded from selection.
const NEUTRAL_COMPONENT: i64 = 50;

const LATE_THRESHOLD_MINUTES: i64 = 30;
const LATE_PENALTY: i64 = 5;
const RESPONSE_TARGET_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub response_speed: i64,
    pub acceptance_rate: i64,
    pub price_competitiveness: i64,
    pub delivery_success: i64,
    pub cancellation_rate: i64,
}

impl ScoreWeights {
    pub const DEFAULT: Self = Self {
        response_speed: 25,
        acceptance_rate: 20,
        price_competitiveness: 20,
        delivery_success: 25,
        cancellation_rate: 10,
    };

    #[must_use]
    pub const fn sum(self) -> i64 {
        self.response_speed + self.acceptance_rate + self.price_competitiveness + self.delivery_success + self.cancellation_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreComponents {
    pub response_speed: i64,
    pub acceptance_rate: i64,
    pub price_competitiveness: i64,
    pub delivery_success: i64,
    pub cancellation_rate: i64,
}

impl ScoreComponents {
    pub const NEUTRAL: Self = Self {
        response_speed: NEUTRAL_COMPONENT,
        acceptance_rate: NEUTRAL_COMPONENT,
        price_competitiveness: NEUTRAL_COMPONENT,
        delivery_success: NEUTRAL_COMPONENT,
        cancellation_rate: NEUTRAL_COMPONENT,
    };
}

/// Deterministic weighted sum of the five components. Referentially
/// transparent for a fixed input — recomputation never depends on anything
/// but `components` and `weights`.
#[must_use]
pub fn overall_score(components: ScoreComponents, weights: ScoreWeights) -> i64 {
    debug_assert_eq!(weights.sum(), 100, "score weights must sum to 100");
    let weighted = components.response_speed * weights.response_speed
        + components.acceptance_rate * weights.acceptance_rate
        + components.price_competitiveness * weights.price_competitiveness
        + components.delivery_success * weights.delivery_success
        + components.cancellation_rate * weights.cancellation_rate;
    Money::from_minor(weighted).div_round_half_even(100).as_minor()
}

#[must_use]
pub const fn tier_for(overall: i64) -> VendorTier {
    VendorScoreSnapshot::tier_for(overall)
}

pub struct VendorScorer<'a> {
    ctx: &'a Context,
    weights: ScoreWeights,
}

impl<'a> VendorScorer<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context) -> Self {
        Self { ctx, weights: ScoreWeights::DEFAULT }
    }

    /// Appends one event to the stream and marks the cached snapshot dirty,
    /// so the next `score()` call recomputes instead of serving stale data.
    pub async fn record(&self, vendor_id: VendorId, kind: &str, data: Value) -> CoreResult<()> {
        let now = self.ctx.clock.now();
        sqlx::query("INSERT INTO vendor_score_events (id, vendor_id, kind, at, data) VALUES ($1, $2, $3, $4, $5)")
            .bind(uuid::Uuid::new_v4())
            .bind(vendor_id.as_uuid())
            .bind(kind)
            .bind(now)
            .bind(&data)
            .execute(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("UPDATE vendor_score_snapshots SET dirty = true WHERE vendor_id = $1")
            .bind(vendor_id.as_uuid())
            .execute(&self.ctx.db)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Returns the cached snapshot, recomputing lazily if it is missing,
    /// dirty, or older than `SNAPSHOT_TTL`.
    pub async fn score(&self, vendor_id: VendorId) -> CoreResult<VendorScoreSnapshot> {
        let now = self.ctx.clock.now();
        let cached = self.load_cached(vendor_id).await?;
        if let Some((snapshot, dirty)) = cached {
            let ttl = Duration::from_std(self.ctx.config.snapshot_ttl()).unwrap_or(Duration::hours(1));
            if !dirty && now - snapshot.computed_at < ttl {
                return Ok(snapshot);
            }
        }
        self.recompute(vendor_id, now).await
    }

    /// Scores every candidate and returns up to `k` ids sorted by overall
    /// descending. Candidates must already be filtered to vendors offering
    /// the product in question — the scorer itself is product-agnostic.
    pub async fn top(&self, candidates: &[VendorId], k: usize) -> CoreResult<Vec<VendorId>> {
        let mut scored = Vec::with_capacity(candidates.len());
        for &id in candidates {
            scored.push((id, self.score(id).await?.overall));
        }
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn load_cached(&self, vendor_id: VendorId) -> CoreResult<Option<(VendorScoreSnapshot, bool)>> {
        let row = sqlx::query(
            "SELECT vendor_id, response_speed, acceptance_rate, price_competitiveness, delivery_success,
                    cancellation_rate, overall, tier, computed_at, dirty
             FROM vendor_score_snapshots WHERE vendor_id = $1",
        )
        .bind(vendor_id.as_uuid())
        .fetch_optional(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(row.map(|row| {
            let tier_str: String = row.get("tier");
            (
                VendorScoreSnapshot {
                    vendor_id,
                    response_speed: row.get("response_speed"),
                    acceptance_rate: row.get("acceptance_rate"),
                    price_competitiveness: row.get("price_competitiveness"),
                    delivery_success: row.get("delivery_success"),
                    cancellation_rate: row.get("cancellation_rate"),
                    overall: row.get("overall"),
                    tier: tier_from_str(&tier_str),
                    computed_at: row.get("computed_at"),
                },
                row.get("dirty"),
            )
        }))
    }

    async fn recompute(&self, vendor_id: VendorId, now: DateTime<Utc>) -> CoreResult<VendorScoreSnapshot> {
        let window_30d = now - Duration::days(30);
        let window_90d = now - Duration::days(90);

        let response_speed = self.response_speed(vendor_id, window_30d, now).await?;
        let acceptance_rate = self.acceptance_rate(vendor_id, window_30d).await?;
        let price_competitiveness = self.price_competitiveness(vendor_id, window_30d).await?;
        let delivery_success = self.delivery_success(vendor_id, window_90d).await?;
        let cancellation_rate = self.cancellation_rate(vendor_id, window_30d).await?;

        let components = ScoreComponents { response_speed, acceptance_rate, price_competitiveness, delivery_success, cancellation_rate };
        let overall = overall_score(components, self.weights);
        let tier = tier_for(overall);

        sqlx::query(
            "INSERT INTO vendor_score_snapshots
                (vendor_id, response_speed, acceptance_rate, price_competitiveness, delivery_success,
                 cancellation_rate, overall, tier, computed_at, dirty)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false)
             ON CONFLICT (vendor_id) DO UPDATE SET
                response_speed = excluded.response_speed,
                acceptance_rate = excluded.acceptance_rate,
                price_competitiveness = excluded.price_competitiveness,
                delivery_success = excluded.delivery_success,
                cancellation_rate = excluded.cancellation_rate,
                overall = excluded.overall,
                tier = excluded.tier,
                computed_at = excluded.computed_at,
                dirty = false",
        )
        .bind(vendor_id.as_uuid())
        .bind(response_speed)
        .bind(acceptance_rate)
        .bind(price_competitiveness)
        .bind(delivery_success)
        .bind(cancellation_rate)
        .bind(overall)
        .bind(tier_str(tier))
        .bind(now)
        .execute(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(VendorScoreSnapshot { vendor_id, response_speed, acceptance_rate, price_competitiveness, delivery_success, cancellation_rate, overall, tier, computed_at: now })
    }

    async fn response_speed(&self, vendor_id: VendorId, since: DateTime<Utc>, _now: DateTime<Utc>) -> CoreResult<i64> {
        let rows = sqlx::query(
            "SELECT (data->>'response_minutes')::bigint AS minutes FROM vendor_score_events
             WHERE vendor_id = $1 AND kind IN ('ACCEPTED', 'REJECTED') AND at >= $2
                   AND data ? 'response_minutes'",
        )
        .bind(vendor_id.as_uuid())
        .bind(since)
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        if rows.is_empty() {
            return Ok(NEUTRAL_COMPONENT);
        }
        let minutes: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("minutes")).collect();
        let avg = Money::from_minor(minutes.iter().sum::<i64>()).div_round_half_even(minutes.len() as i64).as_minor();
        let base = (100 - (avg * 100) / RESPONSE_TARGET_MINUTES).max(0);
        let late_count = minutes.iter().filter(|m| **m > LATE_THRESHOLD_MINUTES).count() as i64;
        Ok((base - late_count * LATE_PENALTY).max(0))
    }

    async fn acceptance_rate(&self, vendor_id: VendorId, since: DateTime<Utc>) -> CoreResult<i64> {
        let (assigned, accepted) = self.count_pair(vendor_id, "ASSIGNED", "ACCEPTED", since).await?;
        if assigned == 0 {
            return Ok(NEUTRAL_COMPONENT);
        }
        Ok((accepted * 100) / assigned)
    }

    async fn price_competitiveness(&self, vendor_id: VendorId, since: DateTime<Utc>) -> CoreResult<i64> {
        let rows = sqlx::query(
            "SELECT (data->>'deviation_pct')::bigint AS deviation FROM vendor_score_events
             WHERE vendor_id = $1 AND at >= $2 AND data ? 'deviation_pct'",
        )
        .bind(vendor_id.as_uuid())
        .bind(since)
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        if rows.is_empty() {
            return Ok(NEUTRAL_COMPONENT);
        }
        let deviations: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("deviation")).collect();
        let mean = Money::from_minor(deviations.iter().sum::<i64>()).div_round_half_even(deviations.len() as i64).as_minor();
        Ok(100 - mean.clamp(-50, 50))
    }

    async fn delivery_success(&self, vendor_id: VendorId, since: DateTime<Utc>) -> CoreResult<i64> {
        let (delivered, failed) = self.count_pair(vendor_id, "DELIVERED", "DELIVERY_FAILED", since).await?;
        let denom = delivered + failed;
        if denom == 0 {
            return Ok(NEUTRAL_COMPONENT);
        }
        Ok((delivered * 100) / denom)
    }

    async fn cancellation_rate(&self, vendor_id: VendorId, since: DateTime<Utc>) -> CoreResult<i64> {
        let (assigned, cancelled) = self.count_pair(vendor_id, "ASSIGNED", "CANCELLED", since).await?;
        if assigned == 0 {
            return Ok(NEUTRAL_COMPONENT);
        }
        Ok(100 - (cancelled * 100) / assigned)
    }

    async fn count_pair(&self, vendor_id: VendorId, a: &str, b: &str, since: DateTime<Utc>) -> CoreResult<(i64, i64)> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE kind = $2) AS count_a,
                COUNT(*) FILTER (WHERE kind = $3) AS count_b
             FROM vendor_score_events WHERE vendor_id = $1 AND at >= $4",
        )
        .bind(vendor_id.as_uuid())
        .bind(a)
        .bind(b)
        .bind(since)
        .fetch_one(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok((row.get("count_a"), row.get("count_b")))
    }
}

fn tier_str(tier: VendorTier) -> &'static str {
    match tier {
        VendorTier::Excellent => "EXCELLENT",
        VendorTier::Good => "GOOD",
        VendorTier::Average => "AVERAGE",
        VendorTier::Poor => "POOR",
    }
}

fn tier_from_str(s: &str) -> VendorTier {
    match s {
        "EXCELLENT" => VendorTier::Excellent,
        "GOOD" => VendorTier::Good,
        "AVERAGE" => VendorTier::Average,
        _ => VendorTier::Poor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_100() {
        assert_eq!(ScoreWeights::DEFAULT.sum(), 100);
    }

    #[test]
    fn neutral_components_yield_neutral_overall() {
        let overall = overall_score(ScoreComponents::NEUTRAL, ScoreWeights::DEFAULT);
        assert_eq!(overall, 50);
    }

    #[test]
    fn tiering_matches_thresholds() {
        assert_eq!(tier_for(90), VendorTier::Excellent);
        assert_eq!(tier_for(89), VendorTier::Good);
        assert_eq!(tier_for(75), VendorTier::Good);
        assert_eq!(tier_for(74), VendorTier::Average);
        assert_eq!(tier_for(50), VendorTier::Average);
        assert_eq!(tier_for(49), VendorTier::Poor);
    }

    #[test]
    fn overall_is_weighted_sum_of_components() {
        let components = ScoreComponents {
            response_speed: 100,
            acceptance_rate: 100,
            price_competitiveness: 100,
            delivery_success: 100,
            cancellation_rate: 100,
        };
        assert_eq!(overall_score(components, ScoreWeights::DEFAULT), 100);

        let components = ScoreComponents {
            response_speed: 0,
            acceptance_rate: 0,
            price_competitiveness: 0,
            delivery_success: 0,
            cancellation_rate: 0,
        };
        assert_eq!(overall_score(components, ScoreWeights::DEFAULT), 0);
    }
}
