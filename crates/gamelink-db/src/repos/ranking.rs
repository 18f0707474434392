//! Ranking commission config repository

use sqlx::{PgPool, Postgres, QueryBuilder};

use gamelink_commission::{Page, PageRequest, RankingConfigFilter, RankingConfigStore};
use gamelink_types::{
    CommissionError, NewRankingCommissionConfig, RankingCommissionConfig, RankingConfigId, RankingType, Result,
    SettlementMonth,
};

use crate::models::{convert_all, db_id};
use crate::{DbError, DbRankingCommissionConfig, DbResult};

const CONFIG_COLUMNS: &str =
    "id, name, ranking_type, period, month, rules_json, description, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct RankingConfigRepo {
    pool: PgPool,
}

impl RankingConfigRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RankingConfigFilter) {
        qb.push(" WHERE TRUE");
        if let Some(ranking_type) = filter.ranking_type {
            qb.push(" AND ranking_type = ").push_bind(ranking_type.as_str());
        }
        if let Some(month) = filter.month {
            qb.push(" AND month = ").push_bind(month.to_string());
        }
        if let Some(is_active) = filter.is_active {
            qb.push(" AND is_active = ").push_bind(is_active);
        }
    }

    async fn insert_row(&self, config: &NewRankingCommissionConfig) -> DbResult<DbRankingCommissionConfig> {
        let row = sqlx::query_as::<_, DbRankingCommissionConfig>(&format!(
            r#"
            INSERT INTO ranking_commission_configs
                (name, ranking_type, period, month, rules_json, description, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(&config.name)
        .bind(config.ranking_type.as_str())
        .bind(&config.period)
        .bind(config.month.to_string())
        .bind(&config.rules_json)
        .bind(&config.description)
        .bind(config.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from_query)?;
        Ok(row)
    }
}

#[async_trait::async_trait]
impl RankingConfigStore for RankingConfigRepo {
    async fn create_config(&self, config: NewRankingCommissionConfig) -> Result<RankingCommissionConfig> {
        Ok(self.insert_row(&config).await?.try_into()?)
    }

    async fn get_config(&self, id: RankingConfigId) -> Result<Option<RankingCommissionConfig>> {
        let row = sqlx::query_as::<_, DbRankingCommissionConfig>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM ranking_commission_configs WHERE id = $1"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(row.map(RankingCommissionConfig::try_from).transpose()?)
    }

    async fn active_config_for_month(
        &self,
        ranking_type: RankingType,
        month: SettlementMonth,
    ) -> Result<Option<RankingCommissionConfig>> {
        let row = sqlx::query_as::<_, DbRankingCommissionConfig>(&format!(
            r#"
            SELECT {CONFIG_COLUMNS}
            FROM ranking_commission_configs
            WHERE ranking_type = $1 AND month = $2 AND is_active
            ORDER BY id DESC
            LIMIT 1
            "#
        ))
        .bind(ranking_type.as_str())
        .bind(month.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(row.map(RankingCommissionConfig::try_from).transpose()?)
    }

    async fn list_configs(
        &self,
        filter: &RankingConfigFilter,
        page: PageRequest,
    ) -> Result<Page<RankingCommissionConfig>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ranking_commission_configs");
        Self::push_filter(&mut count, filter);
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {CONFIG_COLUMNS} FROM ranking_commission_configs"));
        Self::push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC");
        qb.push(" LIMIT ").push_bind(page.limit());
        qb.push(" OFFSET ").push_bind(page.offset());
        let rows: Vec<DbRankingCommissionConfig> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn update_config(&self, config: &RankingCommissionConfig) -> Result<RankingCommissionConfig> {
        let row = sqlx::query_as::<_, DbRankingCommissionConfig>(&format!(
            r#"
            UPDATE ranking_commission_configs
            SET name = $2, ranking_type = $3, month = $4, rules_json = $5,
                description = $6, is_active = $7, updated_at = NOW()
            WHERE id = $1
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(db_id(config.id.get())?)
        .bind(&config.name)
        .bind(config.ranking_type.as_str())
        .bind(config.month.to_string())
        .bind(&config.rules_json)
        .bind(&config.description)
        .bind(config.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CommissionError::not_found("ranking config", config.id))?;
        Ok(row.try_into()?)
    }

    async fn delete_config(&self, id: RankingConfigId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ranking_commission_configs WHERE id = $1")
            .bind(db_id(id.get())?)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected() > 0)
    }
}
