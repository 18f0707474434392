//! Database models - mapped from PostgreSQL tables
//!
//! Rows keep the raw column types; conversion into the domain types
//! validates ids, rates, months and status strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use gamelink_types::{
    CommissionRate, CommissionRecord, CommissionRule, GameId, MonthlySettlement, Order, OrderId, PlayerId,
    RankingCommissionConfig, RankingConfigId, RecordId, RuleId, RuleScope, SettlementId, SettlementMonth,
};

use crate::{DbError, DbResult};

// ============================================================================
// Conversion helpers
// ============================================================================

/// Domain id to BIGINT
pub(crate) fn db_id(id: u64) -> DbResult<i64> {
    i64::try_from(id).map_err(|_| DbError::InvalidInput(format!("id {id} exceeds BIGINT range")))
}

fn domain_id(raw: i64, column: &str) -> DbResult<u64> {
    u64::try_from(raw).map_err(|_| DbError::Serialization(format!("negative {column}: {raw}")))
}

fn optional_id(raw: Option<i64>, column: &str) -> DbResult<Option<u64>> {
    raw.map(|v| domain_id(v, column)).transpose()
}

fn rate(raw: i16) -> DbResult<CommissionRate> {
    CommissionRate::new(raw as i64).map_err(|e| DbError::Serialization(e.to_string()))
}

fn month(raw: &str) -> DbResult<SettlementMonth> {
    raw.trim()
        .parse()
        .map_err(|e: gamelink_types::CommissionError| DbError::Serialization(e.to_string()))
}

fn parse_enum<T: std::str::FromStr<Err = gamelink_types::CommissionError>>(raw: &str) -> DbResult<T> {
    raw.parse().map_err(|e: gamelink_types::CommissionError| DbError::Serialization(e.to_string()))
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbCommissionRule {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub rule_type: String,
    pub rate: i16,
    pub game_id: Option<i64>,
    pub player_id: Option<i64>,
    pub service_type: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbCommissionRule> for CommissionRule {
    type Error = DbError;

    fn try_from(row: DbCommissionRule) -> DbResult<Self> {
        Ok(Self {
            id: RuleId(domain_id(row.id, "rule id")?),
            name: row.name,
            description: row.description,
            rule_type: parse_enum(&row.rule_type)?,
            rate: rate(row.rate)?,
            is_active: row.is_active,
            scope: RuleScope::new(
                optional_id(row.game_id, "game_id")?.map(GameId),
                optional_id(row.player_id, "player_id")?.map(PlayerId),
                row.service_type,
            ),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbCommissionRecord {
    pub id: i64,
    pub order_id: i64,
    pub player_id: i64,
    pub total_amount_cents: i64,
    pub commission_rate: i16,
    pub commission_cents: i64,
    pub player_income_cents: i64,
    pub settlement_status: String,
    pub settlement_month: String,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbCommissionRecord> for CommissionRecord {
    type Error = DbError;

    fn try_from(row: DbCommissionRecord) -> DbResult<Self> {
        Ok(Self {
            id: RecordId(domain_id(row.id, "record id")?),
            order_id: OrderId(domain_id(row.order_id, "order_id")?),
            player_id: PlayerId(domain_id(row.player_id, "player_id")?),
            total_amount_cents: row.total_amount_cents,
            commission_rate: rate(row.commission_rate)?,
            commission_cents: row.commission_cents,
            player_income_cents: row.player_income_cents,
            settlement_status: parse_enum(&row.settlement_status)?,
            settlement_month: month(&row.settlement_month)?,
            settled_at: row.settled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Settlements
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbMonthlySettlement {
    pub id: i64,
    pub player_id: i64,
    pub settlement_month: String,
    pub total_order_count: i64,
    pub total_amount_cents: i64,
    pub total_commission_cents: i64,
    pub total_income_cents: i64,
    pub bonus_cents: i64,
    pub final_income_cents: i64,
    pub status: String,
    pub income_rank: Option<i32>,
    pub order_rank: Option<i32>,
    pub quality_rank: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbMonthlySettlement> for MonthlySettlement {
    type Error = DbError;

    fn try_from(row: DbMonthlySettlement) -> DbResult<Self> {
        Ok(Self {
            id: SettlementId(domain_id(row.id, "settlement id")?),
            player_id: PlayerId(domain_id(row.player_id, "player_id")?),
            settlement_month: month(&row.settlement_month)?,
            total_order_count: row.total_order_count,
            total_amount_cents: row.total_amount_cents,
            total_commission_cents: row.total_commission_cents,
            total_income_cents: row.total_income_cents,
            bonus_cents: row.bonus_cents,
            final_income_cents: row.final_income_cents,
            status: parse_enum(&row.status)?,
            income_rank: row.income_rank,
            order_rank: row.order_rank,
            quality_rank: row.quality_rank,
            created_at: row.created_at,
            updated_at: row.updated_at,
            settled_at: row.settled_at,
        })
    }
}

// ============================================================================
// Ranking configs
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbRankingCommissionConfig {
    pub id: i64,
    pub name: String,
    pub ranking_type: String,
    pub period: String,
    pub month: String,
    pub rules_json: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRankingCommissionConfig> for RankingCommissionConfig {
    type Error = DbError;

    fn try_from(row: DbRankingCommissionConfig) -> DbResult<Self> {
        Ok(Self {
            id: RankingConfigId(domain_id(row.id, "ranking config id")?),
            name: row.name,
            ranking_type: parse_enum(&row.ranking_type)?,
            period: row.period,
            month: month(&row.month)?,
            rules_json: row.rules_json,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// Orders (read-only view of the order service's table)
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbOrder {
    pub id: i64,
    pub game_id: Option<i64>,
    pub player_id: Option<i64>,
    pub total_amount_cents: i64,
}

impl TryFrom<DbOrder> for Order {
    type Error = DbError;

    fn try_from(row: DbOrder) -> DbResult<Self> {
        Ok(Self {
            id: OrderId(domain_id(row.id, "order id")?),
            game_id: optional_id(row.game_id, "game_id")?.map(GameId),
            player_id: optional_id(row.player_id, "player_id")?.map(PlayerId),
            total_amount_cents: row.total_amount_cents,
        })
    }
}

/// Collect rows into domain values, failing on the first bad row
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> DbResult<Vec<T>>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamelink_types::{RuleType, SettlementStatus};

    #[test]
    fn test_record_row_converts() {
        let now = Utc::now();
        let row = DbCommissionRecord {
            id: 1,
            order_id: 42,
            player_id: 5,
            total_amount_cents: 50_000,
            commission_rate: 20,
            commission_cents: 10_000,
            player_income_cents: 40_000,
            settlement_status: "pending".to_string(),
            settlement_month: "2024-11".to_string(),
            settled_at: None,
            created_at: now,
            updated_at: now,
        };
        let record = CommissionRecord::try_from(row).unwrap();
        assert_eq!(record.order_id, OrderId(42));
        assert_eq!(record.settlement_status, SettlementStatus::Pending);
        assert_eq!(record.settlement_month.to_string(), "2024-11");
    }

    #[test]
    fn test_rule_row_rejects_bad_values() {
        let now = Utc::now();
        let mut row = DbCommissionRule {
            id: 1,
            name: "platform".to_string(),
            description: String::new(),
            rule_type: "default".to_string(),
            rate: 20,
            game_id: None,
            player_id: None,
            service_type: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(CommissionRule::try_from(row.clone()).unwrap().rule_type, RuleType::Default);

        row.rate = 120;
        assert!(CommissionRule::try_from(row.clone()).is_err());

        row.rate = 20;
        row.rule_type = "vip".to_string();
        assert!(CommissionRule::try_from(row).is_err());
    }

    #[test]
    fn test_zero_player_order_is_kept_for_the_guard() {
        let order = Order::try_from(DbOrder {
            id: 7,
            game_id: Some(1),
            player_id: Some(0),
            total_amount_cents: 100,
        })
        .unwrap();
        assert_eq!(order.assigned_player(), None);
    }

    #[test]
    fn test_db_id_bounds() {
        assert_eq!(db_id(5).unwrap(), 5);
        assert!(db_id(u64::MAX).is_err());
    }
}
