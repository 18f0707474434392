//! Order commission calculation
//!
//! Pure integer-cents arithmetic over a resolved rate; see
//! [`gamelink_types::CommissionRate::split`].

use std::sync::Arc;

use tracing::debug;

use gamelink_types::{CommissionCalculation, Order, OrderId, Result};

use crate::resolver::{RateResolver, RateStrategy};
use crate::store::OrderLookup;

#[derive(Clone)]
pub struct CommissionCalculator {
    orders: Arc<dyn OrderLookup>,
    resolver: RateResolver,
}

impl CommissionCalculator {
    pub fn new(orders: Arc<dyn OrderLookup>, resolver: RateResolver) -> Self {
        Self { orders, resolver }
    }

    /// Price an order with the order-scoped strategy
    pub async fn calculate(&self, order_id: OrderId) -> Result<CommissionCalculation> {
        self.calculate_with(order_id, &RateStrategy::MostSpecific).await
    }

    /// Load the order and price it with `strategy`
    pub async fn calculate_with(&self, order_id: OrderId, strategy: &RateStrategy) -> Result<CommissionCalculation> {
        let order = self.load_order(order_id).await?;
        self.calculate_order(&order, strategy).await
    }

    pub async fn load_order(&self, order_id: OrderId) -> Result<Order> {
        self.orders.get_order(order_id).await
    }

    /// Price an already loaded order
    pub async fn calculate_order(&self, order: &Order, strategy: &RateStrategy) -> Result<CommissionCalculation> {
        let (applied, candidates) = self.resolver.resolve_with(strategy, &order.rule_scope()).await?;
        let split = applied.rate.split(order.total_amount_cents)?;

        debug!(
            order_id = %order.id,
            rate = %applied.rate,
            commission_cents = split.commission_cents,
            "Calculated order commission"
        );

        Ok(CommissionCalculation {
            order_id: order.id,
            total_amount_cents: split.total_amount_cents,
            commission_rate: applied.rate,
            commission_cents: split.commission_cents,
            player_income_cents: split.player_income_cents,
            applied,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCommissionStore, InMemoryOrders};
    use gamelink_types::{CommissionError, GameId, PlayerId};

    async fn calculator_with(order: Order) -> CommissionCalculator {
        let orders = InMemoryOrders::new();
        orders.insert(order).await;
        let resolver = RateResolver::new(Arc::new(InMemoryCommissionStore::new()));
        CommissionCalculator::new(Arc::new(orders), resolver)
    }

    #[tokio::test]
    async fn test_fallback_split() {
        let calculator = calculator_with(Order {
            id: OrderId(1),
            game_id: Some(GameId(3)),
            player_id: Some(PlayerId(5)),
            total_amount_cents: 12_345,
        })
        .await;

        let calc = calculator.calculate(OrderId(1)).await.unwrap();
        assert_eq!(calc.commission_rate.percent(), 20);
        assert_eq!(calc.commission_cents, 2_469);
        assert_eq!(calc.player_income_cents, 9_876);
        assert!(calc.applied.is_fallback());
        assert!(calc.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let calculator = calculator_with(Order {
            id: OrderId(1),
            game_id: None,
            player_id: None,
            total_amount_cents: 100,
        })
        .await;

        let err = calculator.calculate(OrderId(2)).await.unwrap_err();
        assert!(matches!(err, CommissionError::NotFound { entity: "order", .. }));
    }

    #[tokio::test]
    async fn test_negative_total_rejected() {
        let calculator = calculator_with(Order {
            id: OrderId(1),
            game_id: None,
            player_id: Some(PlayerId(5)),
            total_amount_cents: -5,
        })
        .await;

        let err = calculator.calculate(OrderId(1)).await.unwrap_err();
        assert!(matches!(err, CommissionError::Validation(_)));
    }
}
