//! Read-only view of the order service's `orders` table

use sqlx::PgPool;

use gamelink_commission::OrderLookup;
use gamelink_types::{CommissionError, Order, OrderId, Result};

use crate::models::db_id;
use crate::{DbError, DbOrder};

#[derive(Clone)]
pub struct PgOrderLookup {
    pool: PgPool,
}

impl PgOrderLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderLookup for PgOrderLookup {
    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        let row = sqlx::query_as::<_, DbOrder>(
            r#"
            SELECT id::BIGINT AS id,
                   game_id::BIGINT AS game_id,
                   player_id::BIGINT AS player_id,
                   price_cents::BIGINT AS total_amount_cents
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(db_id(order_id.get())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CommissionError::not_found("order", order_id))?;

        Ok(row.try_into()?)
    }
}
