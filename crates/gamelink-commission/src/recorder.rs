//! Persisting one commission record per order
//!
//! The existence check up front only produces a cheap early answer. The
//! at-most-once guarantee comes from the store's unique order id: a
//! concurrent loser gets `AlreadyRecorded` from `insert_record`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use gamelink_types::{CommissionError, CommissionRecord, NewCommissionRecord, OrderId, Result, SettlementMonth};

use crate::calculator::CommissionCalculator;
use crate::resolver::RateStrategy;
use crate::store::CommissionStore;

#[derive(Clone)]
pub struct CommissionRecorder {
    store: Arc<dyn CommissionStore>,
    calculator: CommissionCalculator,
}

impl CommissionRecorder {
    pub fn new(store: Arc<dyn CommissionStore>, calculator: CommissionCalculator) -> Self {
        Self { store, calculator }
    }

    /// Record an order in the current UTC month
    pub async fn record(&self, order_id: OrderId) -> Result<CommissionRecord> {
        self.record_at(order_id, Utc::now()).await
    }

    /// Record an order in the month containing `now`
    pub async fn record_at(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<CommissionRecord> {
        self.record_in_month(order_id, SettlementMonth::of(now)).await
    }

    /// Record an order into an explicit settlement month
    pub async fn record_in_month(&self, order_id: OrderId, month: SettlementMonth) -> Result<CommissionRecord> {
        self.record_with(order_id, month, &RateStrategy::MostSpecific).await
    }

    pub async fn record_with(
        &self,
        order_id: OrderId,
        month: SettlementMonth,
        strategy: &RateStrategy,
    ) -> Result<CommissionRecord> {
        if self.store.get_record_by_order(order_id).await?.is_some() {
            return Err(CommissionError::AlreadyRecorded { order_id });
        }

        let order = self.calculator.load_order(order_id).await?;
        let player_id = order
            .assigned_player()
            .ok_or_else(|| CommissionError::validation(format!("order {order_id} has no player assigned")))?;
        let calc = self.calculator.calculate_order(&order, strategy).await?;

        let record = self
            .store
            .insert_record(NewCommissionRecord {
                order_id,
                player_id,
                total_amount_cents: calc.total_amount_cents,
                commission_rate: calc.commission_rate,
                commission_cents: calc.commission_cents,
                player_income_cents: calc.player_income_cents,
                settlement_month: month,
            })
            .await?;

        info!(
            order_id = %order_id,
            player_id = %player_id,
            month = %month,
            rate = %record.commission_rate,
            commission_cents = record.commission_cents,
            "Commission recorded"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCommissionStore, InMemoryOrders};
    use crate::resolver::RateResolver;
    use chrono::TimeZone;
    use gamelink_types::{Order, PlayerId};

    async fn setup(orders: Vec<Order>) -> (InMemoryCommissionStore, CommissionRecorder) {
        let store = InMemoryCommissionStore::new();
        let lookup = InMemoryOrders::new();
        for order in orders {
            lookup.insert(order).await;
        }
        let shared: Arc<dyn CommissionStore> = Arc::new(store.clone());
        let calculator = CommissionCalculator::new(Arc::new(lookup), RateResolver::new(shared.clone()));
        (store, CommissionRecorder::new(shared, calculator))
    }

    fn order(id: u64, player: Option<u64>) -> Order {
        Order {
            id: OrderId(id),
            game_id: None,
            player_id: player.map(PlayerId),
            total_amount_cents: 50_000,
        }
    }

    #[tokio::test]
    async fn test_month_comes_from_the_given_instant() {
        let (_, recorder) = setup(vec![order(1, Some(5))]).await;
        let late_november = Utc.with_ymd_and_hms(2024, 11, 30, 23, 59, 59).unwrap();

        let record = recorder.record_at(OrderId(1), late_november).await.unwrap();
        assert_eq!(record.settlement_month.to_string(), "2024-11");
        assert_eq!(record.commission_cents, 10_000);
        assert_eq!(record.player_income_cents, 40_000);
    }

    #[tokio::test]
    async fn test_zero_player_is_rejected_without_write() {
        let (store, recorder) = setup(vec![order(1, Some(0))]).await;

        let err = recorder.record(OrderId(1)).await.unwrap_err();
        assert!(err.to_string().contains("no player assigned"));
        assert!(store.all_records().await.is_empty());
    }
}
