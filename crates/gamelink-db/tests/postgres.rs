//! Live PostgreSQL checks for the constraint-backed guards.
//!
//! Skipped unless `DATABASE_URL` points at a scratch database.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use gamelink_commission::{CommissionStore, OrderLookup};
use gamelink_db::{PgCommissionStore, PgOrderLookup};
use gamelink_types::{
    CommissionError, CommissionRate, NewCommissionRecord, NewMonthlySettlement, OrderId, PlayerId, SettlementMonth,
    SettlementStatus,
};

async fn pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("connect");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id BIGSERIAL PRIMARY KEY,
            game_id BIGINT,
            player_id BIGINT,
            price_cents BIGINT NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("orders table");
    Some(pool)
}

/// Ids far apart per run so reruns against the same database do not collide
fn unique_base() -> u64 {
    (Utc::now().timestamp_micros() as u64) % 1_000_000_000_000
}

fn record(order_id: u64, player_id: u64, month: SettlementMonth) -> NewCommissionRecord {
    let rate = CommissionRate::FALLBACK;
    let split = rate.split(10_000).unwrap();
    NewCommissionRecord {
        order_id: OrderId(order_id),
        player_id: PlayerId(player_id),
        total_amount_cents: 10_000,
        commission_rate: rate,
        commission_cents: split.commission_cents,
        player_income_cents: split.player_income_cents,
        settlement_month: month,
    }
}

#[tokio::test]
async fn test_duplicate_order_is_already_recorded() {
    let Some(pool) = pool().await else { return };
    let store = PgCommissionStore::new(pool);
    let base = unique_base();
    let month = SettlementMonth::new(2024, 11).unwrap();

    store.insert_record(record(base, base, month)).await.unwrap();
    let err = store.insert_record(record(base, base, month)).await.unwrap_err();
    assert!(matches!(err, CommissionError::AlreadyRecorded { .. }));
}

#[tokio::test]
async fn test_worker_commit_is_single_shot() {
    let Some(pool) = pool().await else { return };
    let store = Arc::new(PgCommissionStore::new(pool));
    let base = unique_base();
    let player = PlayerId(base);
    let month = SettlementMonth::new(2024, 11).unwrap();

    let first = store.insert_record(record(base + 1, base, month)).await.unwrap();
    let second = store.insert_record(record(base + 2, base, month)).await.unwrap();
    let ids = [first.id, second.id];

    let settlement = NewMonthlySettlement {
        player_id: player,
        settlement_month: month,
        total_order_count: 2,
        total_amount_cents: 20_000,
        total_commission_cents: 4_000,
        total_income_cents: 16_000,
    };

    let created = store
        .commit_worker_settlement(settlement.clone(), &ids, Utc::now())
        .await
        .unwrap();
    assert_eq!(created.final_income_cents, 16_000);
    assert_eq!(created.bonus_cents, 0);

    let settled = store.get_record_by_order(OrderId(base + 1)).await.unwrap().unwrap();
    assert_eq!(settled.settlement_status, SettlementStatus::Settled);
    assert!(settled.settled_at.is_some());

    let err = store
        .commit_worker_settlement(settlement, &ids, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, CommissionError::AlreadySettled { .. }));
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let Some(pool) = pool().await else { return };
    let orders = PgOrderLookup::new(pool);

    let err = orders.get_order(OrderId(i64::MAX as u64)).await.unwrap_err();
    assert!(err.is_not_found());
}
