//! C5 — Vendor Selector: narrows the vendor pool for a product down to one
//! assignment candidate through an ordered filter pipeline, ranks survivors
//! by score, and breaks ties among the top-ranked group with a configurable
//! strategy.
//!
//! The primary-then-fallback shape follows `execution-router::venue_manager`'s
//! "best available venue" resolution — primary candidate first, degrade to
//! the next-best on unavailability — generalized here to a ranked list
//! instead of a single named primary.

use crate::context::Context;
use crate::types::{Product, Vendor};
use crate::vendor_scorer::VendorScorer;
use orchestrator_common::error::{CoreError, CoreResult};
use orchestrator_common::ids::{ProductId, VendorId};
use sqlx::Row;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    RoundRobin,
    LeastLoaded,
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    pub vendor_id: VendorId,
    pub considered: Vec<VendorId>,
    pub excluded_monopoly: Vec<VendorId>,
}

pub struct VendorSelector<'a> {
    ctx: &'a Context,
    strategy: SelectionStrategy,
}

impl<'a> VendorSelector<'a> {
    #[must_use]
    pub const fn new(ctx: &'a Context, strategy: SelectionStrategy) -> Self {
        Self { ctx, strategy }
    }

    /// Runs the full pipeline: stock -> active/working-hours -> capacity ->
    /// monopoly cap -> rank by score -> strategy tiebreak among the
    /// top-scoring group. `current_hour` (0-23) is resolved by the caller,
    /// since `Vendor` carries a local working-hours window with no stored
    /// timezone.
    pub async fn select(
        &self,
        product: &Product,
        quantity: i64,
        candidates: &[Vendor],
        current_hour: u8,
        exclude: &[VendorId],
    ) -> CoreResult<Option<SelectionOutcome>> {
        let in_stock = filter_in_stock(candidates, product.id, quantity);
        let open = filter_active_and_open(&in_stock, current_hour);
        let has_capacity = filter_has_capacity(&open, self.ctx.config.max_active_orders, self.ctx.config.max_pending_orders);
        let not_excluded: Vec<&Vendor> = has_capacity.into_iter().filter(|v| !exclude.contains(&v.id)).collect();

        if not_excluded.is_empty() {
            info!(product_id = %product.id, "no vendor candidates survive stock/hours/capacity filters");
            return Ok(None);
        }

        let (allowed, excluded_monopoly) = self.apply_monopoly_cap(product.id, &not_excluded).await?;
        if allowed.is_empty() {
            info!(product_id = %product.id, "all candidates excluded by monopoly cap with no fallback");
            return Ok(None);
        }

        let scorer = VendorScorer::new(self.ctx);
        let ids: Vec<VendorId> = allowed.iter().map(|v| v.id).collect();
        let ranked = scorer.top(&ids, ids.len()).await?;

        let Some(&top_score_id) = ranked.first() else {
            return Ok(None);
        };
        let top_score = scorer.score(top_score_id).await?.overall;
        let mut tied: Vec<VendorId> = Vec::new();
        for &id in &ranked {
            if scorer.score(id).await?.overall == top_score {
                tied.push(id);
            } else {
                break;
            }
        }

        let chosen = if tied.len() <= 1 {
            tied[0]
        } else {
            self.break_tie(product.id, &allowed, &tied).await?
        };

        Ok(Some(SelectionOutcome { vendor_id: chosen, considered: ranked, excluded_monopoly }))
    }

    async fn break_tie(&self, product_id: ProductId, allowed: &[&Vendor], tied: &[VendorId]) -> CoreResult<VendorId> {
        match self.strategy {
            SelectionStrategy::LeastLoaded => {
                let least = tied
                    .iter()
                    .filter_map(|id| allowed.iter().find(|v| v.id == *id))
                    .min_by_key(|v| v.active_orders_count)
                    .map(|v| v.id);
                Ok(least.unwrap_or(tied[0]))
            }
            SelectionStrategy::RoundRobin => {
                let counter = self.next_round_robin_counter(product_id).await?;
                let idx = (counter as usize) % tied.len();
                Ok(tied[idx])
            }
        }
    }

    /// Persistent per-product counter, incremented atomically so concurrent
    /// dispatches still cycle through tied vendors evenly.
    async fn next_round_robin_counter(&self, product_id: ProductId) -> CoreResult<i64> {
        let row = sqlx::query(
            "INSERT INTO vendor_round_robin_counters (product_id, counter)
             VALUES ($1, 0)
             ON CONFLICT (product_id) DO UPDATE SET counter = vendor_round_robin_counters.counter + 1
             RETURNING counter",
        )
        .bind(product_id.as_uuid())
        .fetch_one(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(row.get("counter"))
    }

    /// Excludes vendors that would hold more than `monopoly_threshold_pct`
    /// of this product's assignments over the trailing 30 days, unless doing
    /// so would empty the candidate set entirely (retain-if-would-empty).
    async fn apply_monopoly_cap<'v>(&self, product_id: ProductId, candidates: &[&'v Vendor]) -> CoreResult<(Vec<&'v Vendor>, Vec<VendorId>)> {
        let threshold = i64::from(self.ctx.config.monopoly_threshold_pct);
        let rows = sqlx::query(
            "SELECT vendor_id, COUNT(*) AS assignments
             FROM vendor_score_events
             WHERE kind = 'ASSIGNED' AND at >= now() - interval '30 days'
               AND data->>'product_id' = $1
             GROUP BY vendor_id",
        )
        .bind(product_id.as_uuid().to_string())
        .fetch_all(&self.ctx.db)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        let total: i64 = rows.iter().map(|r| r.get::<i64, _>("assignments")).sum();
        if total == 0 {
            return Ok((candidates.to_vec(), Vec::new()));
        }

        let mut over_cap = Vec::new();
        for row in &rows {
            let vendor_id: uuid::Uuid = row.get("vendor_id");
            let count: i64 = row.get("assignments");
            if (count * 100) / total > threshold {
                over_cap.push(VendorId::from_uuid(vendor_id));
            }
        }

        let filtered: Vec<&Vendor> = candidates.iter().copied().filter(|v| !over_cap.contains(&v.id)).collect();
        if filtered.is_empty() {
            // Retain-if-would-empty: a capped vendor is better than no vendor.
            Ok((candidates.to_vec(), Vec::new()))
        } else {
            let excluded: Vec<VendorId> = candidates.iter().filter(|v| over_cap.contains(&v.id)).map(|v| v.id).collect();
            Ok((filtered, excluded))
        }
    }
}

fn filter_in_stock<'v>(candidates: &'v [Vendor], product_id: ProductId, quantity: i64) -> Vec<&'v Vendor> {
    candidates
        .iter()
        .filter(|v| v.offer_for(product_id).is_some_and(|o| o.stock >= quantity))
        .collect()
}

fn filter_active_and_open<'v>(candidates: &[&'v Vendor], current_hour: u8) -> Vec<&'v Vendor> {
    candidates
        .iter()
        .copied()
        .filter(|v| v.is_active && is_within_working_hours(v.working_hours_start, v.working_hours_end, current_hour))
        .collect()
}

fn is_within_working_hours(start: u8, end: u8, current_hour: u8) -> bool {
    if start <= end {
        current_hour >= start && current_hour < end
    } else {
        // Window wraps past midnight, e.g. 22 -> 6.
        current_hour >= start || current_hour < end
    }
}

fn filter_has_capacity<'v>(candidates: &[&'v Vendor], max_active: u32, max_pending: u32) -> Vec<&'v Vendor> {
    candidates
        .iter()
        .copied()
        .filter(|v| v.active_orders_count < i64::from(max_active) && v.pending_orders_count < i64::from(max_pending))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VendorProductOffer;
    use orchestrator_common::ids::ProductId;
    use orchestrator_common::money::Money;

    fn vendor(id: VendorId, stock: i64, active: bool, start: u8, end: u8, pending: i64) -> Vendor {
        Vendor {
            id,
            offers: vec![VendorProductOffer { product_id: ProductId::new(), stock, unit_price: Money::new(10, 0) }],
            working_hours_start: start,
            working_hours_end: end,
            is_active: active,
            active_orders_count: 0,
            pending_orders_count: pending,
        }
    }

    #[test]
    fn working_hours_window_handles_wraparound() {
        assert!(is_within_working_hours(9, 18, 10));
        assert!(!is_within_working_hours(9, 18, 20));
        assert!(is_within_working_hours(22, 6, 23));
        assert!(is_within_working_hours(22, 6, 2));
        assert!(!is_within_working_hours(22, 6, 12));
    }

    #[test]
    fn capacity_filter_excludes_saturated_vendors() {
        let v1 = vendor(VendorId::new(), 10, true, 0, 23, 4);
        let v2 = vendor(VendorId::new(), 10, true, 0, 23, 5);
        let refs = vec![&v1, &v2];
        let filtered = filter_has_capacity(&refs, 10, 5);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, v1.id);
    }

    #[test]
    fn capacity_filter_excludes_vendor_at_max_active_orders() {
        let mut v1 = vendor(VendorId::new(), 10, true, 0, 23, 0);
        v1.active_orders_count = 10;
        let mut v2 = vendor(VendorId::new(), 10, true, 0, 23, 0);
        v2.active_orders_count = 9;
        let refs = vec![&v1, &v2];
        let filtered = filter_has_capacity(&refs, 10, 5);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, v2.id);
    }

    #[test]
    fn stock_filter_requires_sufficient_quantity() {
        let product_id = ProductId::new();
        let v = Vendor {
            id: VendorId::new(),
            offers: vec![VendorProductOffer { product_id, stock: 3, unit_price: Money::new(10, 0) }],
            working_hours_start: 0,
            working_hours_end: 23,
            is_active: true,
            active_orders_count: 0,
            pending_orders_count: 0,
        };
        let candidates = vec![v];
        assert_eq!(filter_in_stock(&candidates, product_id, 3).len(), 1);
        assert_eq!(filter_in_stock(&candidates, product_id, 4).len(), 0);
    }
}
