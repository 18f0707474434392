//! GameLink Database Layer
//!
//! PostgreSQL and Redis implementations of the commission engine's
//! storage seams.
//!
//! # Architecture
//!
//! - **PostgreSQL**: commission rules, records, monthly settlements and
//!   ranking configs; orders are read from the order service's table
//! - **Redis**: the per-month settlement lock
//!
//! Idempotency is enforced by the unique constraints in `migrations/`, so
//! concurrent writers across processes still record each order once and
//! settle each (player, month) pair once.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod repos;

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Config as RedisConfig, Pool as RedisPool, Runtime};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use gamelink_commission::CommissionService;

pub use cache::RedisSettlementLock;
pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use models::*;
pub use repos::*;

/// Database connection pools
pub struct Database {
    /// PostgreSQL connection pool
    pub pg: PgPool,
    /// Redis connection pool
    pub redis: RedisPool,
}

impl Database {
    /// Connect to PostgreSQL and Redis
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        info!("Connecting to Redis: {}", config.redis_url_masked());

        let redis = RedisConfig::from_url(&config.redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| DbError::Connection(format!("Redis: {}", e)))?;

        let mut conn = redis
            .get()
            .await
            .map_err(|e| DbError::Connection(format!("Redis pool: {}", e)))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Connection(format!("Redis ping: {}", e)))?;

        info!("Connected to Redis");

        Ok(Self { pg, redis })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check for both connections
    pub async fn health_check(&self) -> DbResult<HealthStatus> {
        let pg_ok = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();

        let redis_ok = async {
            let mut conn = self.redis.get().await.ok()?;
            let result: Result<String, _> = deadpool_redis::redis::cmd("PING").query_async(&mut conn).await;
            result.ok()
        }
        .await
        .is_some();

        Ok(HealthStatus {
            postgres: pg_ok,
            redis: redis_ok,
            healthy: pg_ok && redis_ok,
        })
    }

    pub fn commission_store(&self) -> PgCommissionStore {
        PgCommissionStore::new(self.pg.clone())
    }

    pub fn order_lookup(&self) -> PgOrderLookup {
        PgOrderLookup::new(self.pg.clone())
    }

    pub fn ranking_configs(&self) -> RankingConfigRepo {
        RankingConfigRepo::new(self.pg.clone())
    }

    pub fn settlement_lock(&self, ttl: Duration) -> RedisSettlementLock {
        RedisSettlementLock::new(self.redis.clone(), ttl)
    }

    /// Engine wired to these pools
    pub fn commission_service(&self, lock_ttl: Duration) -> CommissionService {
        CommissionService::new(
            Arc::new(self.commission_store()),
            Arc::new(self.order_lookup()),
            Arc::new(self.settlement_lock(lock_ttl)),
            Arc::new(self.ranking_configs()),
        )
    }
}

/// Health status of database connections
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub postgres: bool,
    pub redis: bool,
    pub healthy: bool,
}
