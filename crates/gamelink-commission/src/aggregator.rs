//! Monthly settlement aggregation
//!
//! A run takes the per-month lock, collects the month's pending records,
//! groups them by worker and commits one settlement per worker. Each
//! worker commit (settlement row plus that worker's record flips) is one
//! atomic store call, so a failed run leaves only whole workers settled.
//! Nothing is rolled back; [`SettlementAggregator::resume_month`] picks up
//! the workers that are still pending.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use gamelink_types::{
    CommissionError, CommissionRecord, MonthlySettlement, NewMonthlySettlement, PlayerId, RecordId, Result,
    SettlementBonus, SettlementMonth,
};

use crate::store::{CommissionStore, PageRequest, SettlementFilter, SettlementLock};

pub const SETTLEMENTS_CREATED_COUNTER: &str = "commission_settlements_created_total";
pub const SETTLEMENT_FAILURES_COUNTER: &str = "commission_settlement_failures_total";

/// One worker's sums over a month's pending records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerMonthTotals {
    pub player_id: PlayerId,
    pub order_count: i64,
    pub total_amount_cents: i64,
    pub total_commission_cents: i64,
    pub total_income_cents: i64,
    pub record_ids: Vec<RecordId>,
}

impl PlayerMonthTotals {
    fn empty(player_id: PlayerId) -> Self {
        Self {
            player_id,
            order_count: 0,
            total_amount_cents: 0,
            total_commission_cents: 0,
            total_income_cents: 0,
            record_ids: Vec::new(),
        }
    }

    fn add(&mut self, record: &CommissionRecord) -> Result<()> {
        let player_id = self.player_id;
        let overflow = || {
            CommissionError::validation(format!(
                "monthly totals for player {player_id} overflow at order {}",
                record.order_id
            ))
        };
        self.order_count = self.order_count.checked_add(1).ok_or_else(overflow)?;
        self.total_amount_cents = self
            .total_amount_cents
            .checked_add(record.total_amount_cents)
            .ok_or_else(overflow)?;
        self.total_commission_cents = self
            .total_commission_cents
            .checked_add(record.commission_cents)
            .ok_or_else(overflow)?;
        self.total_income_cents = self
            .total_income_cents
            .checked_add(record.player_income_cents)
            .ok_or_else(overflow)?;
        self.record_ids.push(record.id);
        Ok(())
    }

    pub fn into_settlement(self, month: SettlementMonth) -> (NewMonthlySettlement, Vec<RecordId>) {
        (
            NewMonthlySettlement {
                player_id: self.player_id,
                settlement_month: month,
                total_order_count: self.order_count,
                total_amount_cents: self.total_amount_cents,
                total_commission_cents: self.total_commission_cents,
                total_income_cents: self.total_income_cents,
            },
            self.record_ids,
        )
    }
}

/// Group records by worker, ordered by player id
///
/// Fails with `Validation` naming the worker when a sum leaves the `i64` range.
pub fn group_by_player(records: &[CommissionRecord]) -> Result<Vec<PlayerMonthTotals>> {
    let mut groups: BTreeMap<PlayerId, PlayerMonthTotals> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.player_id)
            .or_insert_with(|| PlayerMonthTotals::empty(record.player_id))
            .add(record)?;
    }
    Ok(groups.into_values().collect())
}

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRun {
    pub month: SettlementMonth,
    pub settlements: Vec<MonthlySettlement>,
    pub records_settled: usize,
    /// Workers with pending records who were already settled for the month
    /// (only possible on resume; their records stay pending)
    pub skipped_workers: Vec<PlayerId>,
}

/// Where a month stands, for operators deciding whether to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementProgress {
    pub month: SettlementMonth,
    pub settled_workers: i64,
    pub pending_records: usize,
    pub pending_workers: Vec<PlayerId>,
}

impl SettlementProgress {
    pub fn is_complete(&self) -> bool {
        self.settled_workers > 0 && self.pending_records == 0
    }

    /// Some workers settled while others still have pending records
    pub fn is_partial(&self) -> bool {
        self.settled_workers > 0 && self.pending_records > 0
    }
}

#[derive(Clone)]
pub struct SettlementAggregator {
    store: Arc<dyn CommissionStore>,
    lock: Arc<dyn SettlementLock>,
}

impl SettlementAggregator {
    pub fn new(store: Arc<dyn CommissionStore>, lock: Arc<dyn SettlementLock>) -> Self {
        Self { store, lock }
    }

    /// Settle a month that has no settlements yet
    pub async fn settle_month(&self, month: SettlementMonth) -> Result<SettlementRun> {
        self.with_lock(month, true).await
    }

    /// Settle the workers of a month whose records are still pending
    pub async fn resume_month(&self, month: SettlementMonth) -> Result<SettlementRun> {
        self.with_lock(month, false).await
    }

    pub async fn progress(&self, month: SettlementMonth) -> Result<SettlementProgress> {
        let settled = self
            .store
            .list_settlements(
                &SettlementFilter {
                    month: Some(month),
                    ..Default::default()
                },
                PageRequest::first(1),
            )
            .await?;
        let pending = self.store.pending_records_for_month(month).await?;
        let pending_workers = group_by_player(&pending)?.into_iter().map(|g| g.player_id).collect();

        Ok(SettlementProgress {
            month,
            settled_workers: settled.total,
            pending_records: pending.len(),
            pending_workers,
        })
    }

    /// Write bonus and rank fields and recompute the final income
    pub async fn apply_bonus(
        &self,
        player_id: PlayerId,
        month: SettlementMonth,
        bonus: SettlementBonus,
    ) -> Result<MonthlySettlement> {
        if bonus.bonus_cents < 0 {
            return Err(CommissionError::validation(format!(
                "bonus must not be negative, got {}",
                bonus.bonus_cents
            )));
        }
        for (name, rank) in [
            ("income rank", bonus.income_rank),
            ("order rank", bonus.order_rank),
            ("quality rank", bonus.quality_rank),
        ] {
            if matches!(rank, Some(r) if r < 1) {
                return Err(CommissionError::validation(format!("{name} must be at least 1")));
            }
        }

        let mut settlement = self
            .store
            .get_settlement(player_id, month)
            .await?
            .ok_or_else(|| CommissionError::not_found("monthly settlement", format!("{player_id}/{month}")))?;

        settlement.final_income_cents = settlement
            .total_income_cents
            .checked_add(bonus.bonus_cents)
            .ok_or_else(|| CommissionError::validation("final income overflows"))?;
        settlement.bonus_cents = bonus.bonus_cents;
        settlement.income_rank = bonus.income_rank;
        settlement.order_rank = bonus.order_rank;
        settlement.quality_rank = bonus.quality_rank;

        let updated = self.store.update_settlement(&settlement).await?;
        info!(
            player_id = %player_id,
            month = %month,
            bonus_cents = updated.bonus_cents,
            "Settlement bonus applied"
        );
        Ok(updated)
    }

    async fn with_lock(&self, month: SettlementMonth, precheck: bool) -> Result<SettlementRun> {
        if !self.lock.try_acquire(month).await? {
            return Err(CommissionError::SettlementInProgress { month });
        }

        let result = self.run(month, precheck).await;

        if let Err(e) = self.lock.release(month).await {
            warn!(month = %month, "Failed to release settlement lock: {}", e);
        }
        result
    }

    async fn run(&self, month: SettlementMonth, precheck: bool) -> Result<SettlementRun> {
        if precheck && self.store.month_has_settlements(month).await? {
            return Err(CommissionError::AlreadySettled { month });
        }

        let pending = self.store.pending_records_for_month(month).await?;
        if pending.is_empty() {
            return Err(CommissionError::NoRecordsToSettle { month });
        }

        let groups = group_by_player(&pending)?;
        info!(
            month = %month,
            records = pending.len(),
            workers = groups.len(),
            "Starting monthly settlement"
        );

        let mut remaining = pending.len();
        let mut settlements = Vec::with_capacity(groups.len());
        let mut skipped_workers = Vec::new();
        let settled_at = Utc::now();

        for group in groups {
            let player_id = group.player_id;
            let worker_records = group.record_ids.len();
            let (settlement, record_ids) = group.into_settlement(month);

            match self
                .store
                .commit_worker_settlement(settlement, &record_ids, settled_at)
                .await
            {
                Ok(created) => {
                    metrics::counter!(SETTLEMENTS_CREATED_COUNTER).increment(1);
                    remaining -= worker_records;
                    settlements.push(created);
                }
                Err(CommissionError::AlreadySettled { .. }) if !precheck => {
                    warn!(
                        player_id = %player_id,
                        month = %month,
                        records = worker_records,
                        "Worker already settled for month, leaving late records pending"
                    );
                    remaining -= worker_records;
                    skipped_workers.push(player_id);
                }
                Err(e) => {
                    metrics::counter!(SETTLEMENT_FAILURES_COUNTER).increment(1);
                    error!(
                        player_id = %player_id,
                        month = %month,
                        settled_workers = settlements.len(),
                        "Settlement aborted: {}",
                        e
                    );
                    return Err(CommissionError::SettlementAborted {
                        month,
                        player_id,
                        pending_records: remaining,
                        settled_workers: settlements.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let records_settled = settlements.iter().map(|s| s.total_order_count as usize).sum();
        info!(
            month = %month,
            workers = settlements.len(),
            records = records_settled,
            "Monthly settlement complete"
        );

        Ok(SettlementRun {
            month,
            settlements,
            records_settled,
            skipped_workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCommissionStore, InMemorySettlementLock};
    use gamelink_types::{CommissionRate, NewCommissionRecord, OrderId};

    fn month() -> SettlementMonth {
        "2024-11".parse().unwrap()
    }

    async fn seed(store: &InMemoryCommissionStore, order: u64, player: u64, total: i64) {
        let split = CommissionRate::FALLBACK.split(total).unwrap();
        store
            .insert_record(NewCommissionRecord {
                order_id: OrderId(order),
                player_id: PlayerId(player),
                total_amount_cents: total,
                commission_rate: CommissionRate::FALLBACK,
                commission_cents: split.commission_cents,
                player_income_cents: split.player_income_cents,
                settlement_month: month(),
            })
            .await
            .unwrap();
    }

    fn aggregator(store: &InMemoryCommissionStore) -> SettlementAggregator {
        SettlementAggregator::new(Arc::new(store.clone()), Arc::new(InMemorySettlementLock::new()))
    }

    #[tokio::test]
    async fn test_group_by_player_sums() {
        let store = InMemoryCommissionStore::new();
        seed(&store, 1, 6, 40_000).await;
        seed(&store, 2, 5, 50_000).await;
        seed(&store, 3, 5, 30_000).await;

        let groups = group_by_player(&store.all_records().await).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].player_id, PlayerId(5));
        assert_eq!(groups[0].order_count, 2);
        assert_eq!(groups[0].total_amount_cents, 80_000);
        assert_eq!(groups[0].total_commission_cents, 16_000);
        assert_eq!(groups[0].total_income_cents, 64_000);
        assert_eq!(groups[1].record_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_overflowing_worker_totals_abort_before_commit() {
        let store = InMemoryCommissionStore::new();
        let huge = i64::MAX / 2 + 1;
        seed(&store, 1, 5, huge).await;
        seed(&store, 2, 5, huge).await;

        let err = aggregator(&store).settle_month(month()).await.unwrap_err();
        match err {
            CommissionError::Validation(msg) => assert!(msg.contains("player 5"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(store.all_settlements().await.is_empty());
        assert!(store
            .all_records()
            .await
            .iter()
            .all(|r| r.settlement_status == gamelink_types::SettlementStatus::Pending));
    }

    #[tokio::test]
    async fn test_empty_month_has_no_records_to_settle() {
        let store = InMemoryCommissionStore::new();
        let err = aggregator(&store).settle_month(month()).await.unwrap_err();
        assert_eq!(err, CommissionError::NoRecordsToSettle { month: month() });
    }

    #[tokio::test]
    async fn test_progress_after_settlement() {
        let store = InMemoryCommissionStore::new();
        seed(&store, 1, 5, 10_000).await;
        seed(&store, 2, 6, 10_000).await;
        let aggregator = aggregator(&store);

        let before = aggregator.progress(month()).await.unwrap();
        assert_eq!(before.pending_workers, vec![PlayerId(5), PlayerId(6)]);
        assert!(!before.is_complete());

        aggregator.settle_month(month()).await.unwrap();
        let after = aggregator.progress(month()).await.unwrap();
        assert_eq!(after.settled_workers, 2);
        assert_eq!(after.pending_records, 0);
        assert!(after.is_complete());
    }

    #[tokio::test]
    async fn test_apply_bonus_recomputes_final_income() {
        let store = InMemoryCommissionStore::new();
        seed(&store, 1, 5, 50_000).await;
        let aggregator = aggregator(&store);
        aggregator.settle_month(month()).await.unwrap();

        let updated = aggregator
            .apply_bonus(
                PlayerId(5),
                month(),
                SettlementBonus {
                    bonus_cents: 5_000,
                    income_rank: Some(1),
                    order_rank: Some(3),
                    quality_rank: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.total_income_cents, 40_000);
        assert_eq!(updated.final_income_cents, 45_000);
        assert_eq!(updated.income_rank, Some(1));
    }

    #[tokio::test]
    async fn test_apply_bonus_rejects_negative_and_missing() {
        let store = InMemoryCommissionStore::new();
        let aggregator = aggregator(&store);

        let negative = SettlementBonus {
            bonus_cents: -1,
            ..Default::default()
        };
        let err = aggregator.apply_bonus(PlayerId(5), month(), negative).await.unwrap_err();
        assert!(matches!(err, CommissionError::Validation(_)));

        let err = aggregator
            .apply_bonus(PlayerId(5), month(), SettlementBonus::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
