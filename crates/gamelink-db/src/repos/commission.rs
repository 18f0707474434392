//! Commission rule, record and settlement repository
//!
//! Implements [`CommissionStore`] over PostgreSQL. The idempotency guards
//! are the table constraints from the migration: a duplicate order id or
//! (player, month) pair surfaces as a unique violation and is mapped to
//! `AlreadyRecorded` / `AlreadySettled`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use gamelink_commission::{
    CommissionStore, MonthlyStats, Page, PageRequest, PlayerTotals, RecordFilter, RuleFilter, SettlementFilter,
};
use gamelink_types::{
    CommissionError, CommissionRecord, CommissionRule, MonthlySettlement, NewCommissionRecord, NewCommissionRule,
    NewMonthlySettlement, OrderId, PlayerId, RecordId, Result, RuleId, RuleScope, SettlementMonth,
};

use crate::error::{RECORD_ORDER_UNIQUE, SETTLEMENT_PLAYER_MONTH_UNIQUE};
use crate::models::{convert_all, db_id};
use crate::{DbCommissionRecord, DbCommissionRule, DbError, DbMonthlySettlement, DbResult};

const RULE_COLUMNS: &str = "id, name, description, rule_type, rate, game_id, player_id, service_type, \
                            is_active, created_at, updated_at";

const RECORD_COLUMNS: &str = "id, order_id, player_id, total_amount_cents, commission_rate, commission_cents, \
                              player_income_cents, settlement_status, settlement_month, settled_at, \
                              created_at, updated_at";

const SETTLEMENT_COLUMNS: &str = "id, player_id, settlement_month, total_order_count, total_amount_cents, \
                                  total_commission_cents, total_income_cents, bonus_cents, final_income_cents, \
                                  status, income_rank, order_rank, quality_rank, created_at, updated_at, settled_at";

#[derive(Clone)]
pub struct PgCommissionStore {
    pool: PgPool,
}

impl PgCommissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Filters
    // =========================================================================

    fn push_rule_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RuleFilter) -> DbResult<()> {
        qb.push(" WHERE TRUE");
        if let Some(rule_type) = filter.rule_type {
            qb.push(" AND rule_type = ").push_bind(rule_type.as_str());
        }
        if let Some(game_id) = filter.game_id {
            qb.push(" AND game_id = ").push_bind(db_id(game_id.get())?);
        }
        if let Some(player_id) = filter.player_id {
            qb.push(" AND player_id = ").push_bind(db_id(player_id.get())?);
        }
        if let Some(is_active) = filter.is_active {
            qb.push(" AND is_active = ").push_bind(is_active);
        }
        Ok(())
    }

    fn push_record_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) -> DbResult<()> {
        qb.push(" WHERE TRUE");
        if let Some(order_id) = filter.order_id {
            qb.push(" AND order_id = ").push_bind(db_id(order_id.get())?);
        }
        if let Some(player_id) = filter.player_id {
            qb.push(" AND player_id = ").push_bind(db_id(player_id.get())?);
        }
        if let Some(status) = filter.status {
            qb.push(" AND settlement_status = ").push_bind(status.as_str());
        }
        if let Some(month) = filter.month {
            qb.push(" AND settlement_month = ").push_bind(month.to_string());
        }
        if let Some(from) = filter.created_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.created_to {
            qb.push(" AND created_at < ").push_bind(to);
        }
        Ok(())
    }

    fn push_settlement_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &SettlementFilter) -> DbResult<()> {
        qb.push(" WHERE TRUE");
        if let Some(player_id) = filter.player_id {
            qb.push(" AND player_id = ").push_bind(db_id(player_id.get())?);
        }
        if let Some(month) = filter.month {
            qb.push(" AND settlement_month = ").push_bind(month.to_string());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        Ok(())
    }

    fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: PageRequest) {
        qb.push(" LIMIT ").push_bind(page.limit());
        qb.push(" OFFSET ").push_bind(page.offset());
    }

    // =========================================================================
    // Rules
    // =========================================================================

    async fn insert_rule_row(&self, rule: &NewCommissionRule) -> DbResult<DbCommissionRule> {
        let row = sqlx::query_as::<_, DbCommissionRule>(&format!(
            r#"
            INSERT INTO commission_rules
                (name, description, rule_type, rate, game_id, player_id, service_type, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.rule_type.as_str())
        .bind(rule.rate.percent() as i16)
        .bind(rule.scope.game_id.map(|g| db_id(g.get())).transpose()?)
        .bind(rule.scope.player_id.map(|p| db_id(p.get())).transpose()?)
        .bind(&rule.scope.service_type)
        .bind(rule.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from_query)?;
        Ok(row)
    }

    async fn find_scoped_rule_row(&self, scope: &RuleScope) -> DbResult<Option<DbCommissionRule>> {
        // Every dimension a rule sets must equal the query's value; a NULL
        // query value never equals a set column.
        let row = sqlx::query_as::<_, DbCommissionRule>(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM commission_rules
            WHERE is_active
              AND (game_id IS NOT NULL OR player_id IS NOT NULL OR service_type IS NOT NULL)
              AND (game_id IS NULL OR game_id = $1)
              AND (player_id IS NULL OR player_id = $2)
              AND (service_type IS NULL OR service_type = $3)
            ORDER BY (player_id IS NOT NULL) DESC,
                     (game_id IS NOT NULL) DESC,
                     (service_type IS NOT NULL) DESC,
                     id ASC
            LIMIT 1
            "#
        ))
        .bind(scope.game_id.map(|g| db_id(g.get())).transpose()?)
        .bind(scope.player_id.map(|p| db_id(p.get())).transpose()?)
        .bind(&scope.service_type)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // =========================================================================
    // Records
    // =========================================================================

    async fn insert_record_row(&self, record: &NewCommissionRecord) -> DbResult<DbCommissionRecord> {
        let row = sqlx::query_as::<_, DbCommissionRecord>(&format!(
            r#"
            INSERT INTO commission_records
                (order_id, player_id, total_amount_cents, commission_rate, commission_cents,
                 player_income_cents, settlement_status, settlement_month)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(db_id(record.order_id.get())?)
        .bind(db_id(record.player_id.get())?)
        .bind(record.total_amount_cents)
        .bind(record.commission_rate.percent() as i16)
        .bind(record.commission_cents)
        .bind(record.player_income_cents)
        .bind(record.settlement_month.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from_query)?;
        Ok(row)
    }

    // =========================================================================
    // Settlements
    // =========================================================================

    async fn commit_worker_rows(
        &self,
        settlement: &NewMonthlySettlement,
        record_ids: &[RecordId],
        settled_at: DateTime<Utc>,
    ) -> DbResult<DbMonthlySettlement> {
        let ids = record_ids
            .iter()
            .map(|id| db_id(id.get()))
            .collect::<DbResult<Vec<i64>>>()?;
        let player_id = db_id(settlement.player_id.get())?;

        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, DbMonthlySettlement>(&format!(
            r#"
            INSERT INTO monthly_settlements
                (player_id, settlement_month, total_order_count, total_amount_cents,
                 total_commission_cents, total_income_cents, bonus_cents, final_income_cents,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $6, 'pending', $7, $7)
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(player_id)
        .bind(settlement.settlement_month.to_string())
        .bind(settlement.total_order_count)
        .bind(settlement.total_amount_cents)
        .bind(settlement.total_commission_cents)
        .bind(settlement.total_income_cents)
        .bind(settled_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::from_query)?;

        let flipped = sqlx::query(
            r#"
            UPDATE commission_records
            SET settlement_status = 'settled', settled_at = $1, updated_at = $1
            WHERE id = ANY($2) AND player_id = $3 AND settlement_status = 'pending'
            "#,
        )
        .bind(settled_at)
        .bind(ids.as_slice())
        .bind(player_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if flipped != ids.len() as u64 {
            // Dropping the transaction rolls the settlement back.
            return Err(DbError::Conflict(format!(
                "expected to settle {} records for player {}, matched {}",
                ids.len(),
                settlement.player_id,
                flipped
            )));
        }

        tx.commit().await?;
        debug!(
            player_id = %settlement.player_id,
            month = %settlement.settlement_month,
            records = ids.len(),
            "Committed worker settlement"
        );
        Ok(created)
    }
}

/// `AlreadyRecorded` / `AlreadySettled` for the matching unique violation
fn idempotency_error(e: DbError, on_duplicate: impl FnOnce() -> CommissionError, constraint: &str) -> CommissionError {
    match e {
        DbError::Duplicate(ref name) if name == constraint => on_duplicate(),
        other => other.into(),
    }
}

#[async_trait::async_trait]
impl CommissionStore for PgCommissionStore {
    async fn create_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule> {
        Ok(self.insert_rule_row(&rule).await?.try_into()?)
    }

    async fn get_rule(&self, id: RuleId) -> Result<Option<CommissionRule>> {
        let row = sqlx::query_as::<_, DbCommissionRule>(&format!(
            "SELECT {RULE_COLUMNS} FROM commission_rules WHERE id = $1"
        ))
        .bind(db_id(id.get())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(row.map(CommissionRule::try_from).transpose()?)
    }

    async fn get_default_rule(&self) -> Result<Option<CommissionRule>> {
        let row = sqlx::query_as::<_, DbCommissionRule>(&format!(
            r#"
            SELECT {RULE_COLUMNS}
            FROM commission_rules
            WHERE rule_type = 'default' AND is_active
              AND game_id IS NULL AND player_id IS NULL AND service_type IS NULL
            ORDER BY id
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(row.map(CommissionRule::try_from).transpose()?)
    }

    async fn find_scoped_rule(&self, scope: &RuleScope) -> Result<Option<CommissionRule>> {
        let row = self.find_scoped_rule_row(scope).await?;
        Ok(row.map(CommissionRule::try_from).transpose()?)
    }

    async fn list_rules(&self, filter: &RuleFilter, page: PageRequest) -> Result<Page<CommissionRule>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM commission_rules");
        Self::push_rule_filter(&mut count, filter)?;
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RULE_COLUMNS} FROM commission_rules"));
        Self::push_rule_filter(&mut qb, filter)?;
        qb.push(" ORDER BY created_at DESC, id DESC");
        Self::push_page(&mut qb, page);
        let rows: Vec<DbCommissionRule> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn update_rule(&self, rule: &CommissionRule) -> Result<CommissionRule> {
        let row = sqlx::query_as::<_, DbCommissionRule>(&format!(
            r#"
            UPDATE commission_rules
            SET name = $2, description = $3, rate = $4, is_active = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {RULE_COLUMNS}
            "#
        ))
        .bind(db_id(rule.id.get())?)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.rate.percent() as i16)
        .bind(rule.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from_query)?
        .ok_or_else(|| CommissionError::not_found("commission rule", rule.id))?;
        Ok(row.try_into()?)
    }

    async fn delete_rule(&self, id: RuleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM commission_rules WHERE id = $1")
            .bind(db_id(id.get())?)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_record(&self, record: NewCommissionRecord) -> Result<CommissionRecord> {
        let order_id = record.order_id;
        let row = self.insert_record_row(&record).await.map_err(|e| {
            idempotency_error(e, || CommissionError::AlreadyRecorded { order_id }, RECORD_ORDER_UNIQUE)
        })?;
        Ok(row.try_into()?)
    }

    async fn get_record_by_order(&self, order_id: OrderId) -> Result<Option<CommissionRecord>> {
        let row = sqlx::query_as::<_, DbCommissionRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM commission_records WHERE order_id = $1"
        ))
        .bind(db_id(order_id.get())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(row.map(CommissionRecord::try_from).transpose()?)
    }

    async fn list_records(&self, filter: &RecordFilter, page: PageRequest) -> Result<Page<CommissionRecord>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM commission_records");
        Self::push_record_filter(&mut count, filter)?;
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {RECORD_COLUMNS} FROM commission_records"));
        Self::push_record_filter(&mut qb, filter)?;
        qb.push(" ORDER BY created_at DESC, id DESC");
        Self::push_page(&mut qb, page);
        let rows: Vec<DbCommissionRecord> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn pending_records_for_month(&self, month: SettlementMonth) -> Result<Vec<CommissionRecord>> {
        let rows = sqlx::query_as::<_, DbCommissionRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM commission_records
            WHERE settlement_month = $1 AND settlement_status = 'pending'
            ORDER BY id
            "#
        ))
        .bind(month.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(convert_all(rows)?)
    }

    async fn monthly_stats(&self, month: SettlementMonth) -> Result<MonthlyStats> {
        let (total_orders, total_income, total_commission, total_player_income): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(total_amount_cents), 0)::BIGINT,
                       COALESCE(SUM(commission_cents), 0)::BIGINT,
                       COALESCE(SUM(player_income_cents), 0)::BIGINT
                FROM commission_records
                WHERE settlement_month = $1 AND settlement_status = 'settled'
                "#,
            )
            .bind(month.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(MonthlyStats {
            total_orders,
            total_income,
            total_commission,
            total_player_income,
        })
    }

    async fn player_monthly_income(&self, player_id: PlayerId, month: SettlementMonth) -> Result<i64> {
        let (income,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(player_income_cents), 0)::BIGINT
            FROM commission_records
            WHERE player_id = $1 AND settlement_month = $2
            "#,
        )
        .bind(db_id(player_id.get())?)
        .bind(month.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(income)
    }

    async fn player_totals(&self, player_id: PlayerId) -> Result<PlayerTotals> {
        let (total_orders, total_commission, total_income): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(commission_cents), 0)::BIGINT,
                   COALESCE(SUM(player_income_cents), 0)::BIGINT
            FROM commission_records
            WHERE player_id = $1
            "#,
        )
        .bind(db_id(player_id.get())?)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(PlayerTotals {
            total_orders,
            total_commission,
            total_income,
        })
    }

    async fn month_has_settlements(&self, month: SettlementMonth) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM monthly_settlements WHERE settlement_month = $1)")
                .bind(month.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::from)?;
        Ok(exists)
    }

    async fn get_settlement(&self, player_id: PlayerId, month: SettlementMonth) -> Result<Option<MonthlySettlement>> {
        let row = sqlx::query_as::<_, DbMonthlySettlement>(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM monthly_settlements WHERE player_id = $1 AND settlement_month = $2"
        ))
        .bind(db_id(player_id.get())?)
        .bind(month.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(row.map(MonthlySettlement::try_from).transpose()?)
    }

    async fn list_settlements(&self, filter: &SettlementFilter, page: PageRequest) -> Result<Page<MonthlySettlement>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM monthly_settlements");
        Self::push_settlement_filter(&mut count, filter)?;
        let (total,): (i64,) = count
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {SETTLEMENT_COLUMNS} FROM monthly_settlements"));
        Self::push_settlement_filter(&mut qb, filter)?;
        qb.push(" ORDER BY settlement_month DESC, created_at DESC, id DESC");
        Self::push_page(&mut qb, page);
        let rows: Vec<DbMonthlySettlement> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        Ok(Page {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn commit_worker_settlement(
        &self,
        settlement: NewMonthlySettlement,
        record_ids: &[RecordId],
        settled_at: DateTime<Utc>,
    ) -> Result<MonthlySettlement> {
        let month = settlement.settlement_month;
        let row = self
            .commit_worker_rows(&settlement, record_ids, settled_at)
            .await
            .map_err(|e| idempotency_error(e, || CommissionError::AlreadySettled { month }, SETTLEMENT_PLAYER_MONTH_UNIQUE))?;
        Ok(row.try_into()?)
    }

    async fn update_settlement(&self, settlement: &MonthlySettlement) -> Result<MonthlySettlement> {
        let row = sqlx::query_as::<_, DbMonthlySettlement>(&format!(
            r#"
            UPDATE monthly_settlements
            SET bonus_cents = $2, final_income_cents = $3, status = $4,
                income_rank = $5, order_rank = $6, quality_rank = $7,
                settled_at = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(db_id(settlement.id.get())?)
        .bind(settlement.bonus_cents)
        .bind(settlement.final_income_cents)
        .bind(settlement.status.as_str())
        .bind(settlement.income_rank)
        .bind(settlement.order_rank)
        .bind(settlement.quality_rank)
        .bind(settlement.settled_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?
        .ok_or_else(|| CommissionError::not_found("monthly settlement", settlement.id))?;
        Ok(row.try_into()?)
    }
}
