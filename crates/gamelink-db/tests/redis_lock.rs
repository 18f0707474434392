//! Live Redis checks for the settlement lock.
//!
//! Skipped unless `REDIS_URL` points at a scratch instance.

use std::time::Duration;

use chrono::Utc;
use deadpool_redis::{Config as RedisConfig, Pool as RedisPool, Runtime};

use gamelink_commission::SettlementLock;
use gamelink_db::RedisSettlementLock;
use gamelink_types::SettlementMonth;

fn pool() -> Option<RedisPool> {
    let url = std::env::var("REDIS_URL").ok()?;
    Some(
        RedisConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .expect("redis pool"),
    )
}

/// A far-future month per run so reruns do not see each other's keys
fn scratch_month(offset: i64) -> SettlementMonth {
    let seed = Utc::now().timestamp_micros() + offset;
    let year = 5000 + (seed % 4000) as i32;
    let month = 1 + ((seed / 4000) % 12) as u32;
    SettlementMonth::new(year, month).unwrap()
}

async fn get(pool: &RedisPool, key: &str) -> Option<String> {
    let mut conn = pool.get().await.unwrap();
    deadpool_redis::redis::cmd("GET").arg(key).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
async fn test_second_acquire_is_refused_until_release() {
    let Some(pool) = pool() else { return };
    let month = scratch_month(0);
    let first = RedisSettlementLock::new(pool.clone(), Duration::from_secs(60));
    let second = RedisSettlementLock::new(pool.clone(), Duration::from_secs(60));

    assert!(first.try_acquire(month).await.unwrap());
    assert!(!second.try_acquire(month).await.unwrap());

    // Releasing a lock this instance never took leaves the holder's key
    second.release(month).await.unwrap();
    assert!(get(&pool, &RedisSettlementLock::lock_key(month)).await.is_some());

    first.release(month).await.unwrap();
    assert!(get(&pool, &RedisSettlementLock::lock_key(month)).await.is_none());
    assert!(second.try_acquire(month).await.unwrap());
    second.release(month).await.unwrap();
}

#[tokio::test]
async fn test_stale_holder_does_not_delete_new_holders_key() {
    let Some(pool) = pool() else { return };
    let month = scratch_month(7);
    let key = RedisSettlementLock::lock_key(month);
    let stale = RedisSettlementLock::new(pool.clone(), Duration::from_secs(60));

    assert!(stale.try_acquire(month).await.unwrap());

    // Simulate expiry followed by another process taking the lock
    {
        let mut conn = pool.get().await.unwrap();
        let _: () = deadpool_redis::redis::cmd("SET")
            .arg(&key)
            .arg("other-holder")
            .arg("EX")
            .arg(60)
            .query_async(&mut conn)
            .await
            .unwrap();
    }

    stale.release(month).await.unwrap();
    assert_eq!(get(&pool, &key).await.as_deref(), Some("other-holder"));

    let mut conn = pool.get().await.unwrap();
    let _: i64 = deadpool_redis::redis::cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();
}
