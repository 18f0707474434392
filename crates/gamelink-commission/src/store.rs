//! Storage seams consumed by the engine
//!
//! The engine holds no mutable state of its own; everything lives behind
//! these traits. Implementations must back the idempotency guards with
//! storage-level uniqueness, not with a prior read:
//!
//! - `insert_record` fails with `AlreadyRecorded` when a record for the
//!   order exists (unique order id).
//! - `commit_worker_settlement` fails with `AlreadySettled` when a
//!   settlement for the (player, month) pair exists, and creates the
//!   settlement and flips the worker's records in one atomic step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gamelink_types::{
    CommissionRecord, CommissionRule, MonthlySettlement, MonthlySettlementStatus, NewCommissionRecord,
    NewCommissionRule, NewMonthlySettlement, NewRankingCommissionConfig, Order, OrderId, PlayerId,
    RankingCommissionConfig, RankingConfigId, RankingType, RecordId, Result, RuleId, RuleScope, RuleType,
    SettlementMonth, SettlementStatus,
};

/// Default page size when the caller passes none
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound on a single page
pub const MAX_PAGE_SIZE: i64 = 100;

/// Normalized 1-based pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// `page < 1` becomes 1, `page_size < 1` becomes the default, oversized pages are capped
    pub fn new(page: i64, page_size: i64) -> Self {
        let page = page.max(1);
        let page_size = if page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };
        Self { page, page_size }
    }

    pub fn first(page_size: i64) -> Self {
        Self::new(1, page_size)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus the unpaged total
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub rule_type: Option<RuleType>,
    pub game_id: Option<gamelink_types::GameId>,
    pub player_id: Option<PlayerId>,
    pub is_active: Option<bool>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &CommissionRule) -> bool {
        self.rule_type.map_or(true, |t| rule.rule_type == t)
            && self.game_id.map_or(true, |g| rule.scope.game_id == Some(g))
            && self.player_id.map_or(true, |p| rule.scope.player_id == Some(p))
            && self.is_active.map_or(true, |a| rule.is_active == a)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub order_id: Option<OrderId>,
    pub player_id: Option<PlayerId>,
    pub status: Option<SettlementStatus>,
    pub month: Option<SettlementMonth>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
}

impl RecordFilter {
    pub fn for_player(player_id: PlayerId) -> Self {
        Self {
            player_id: Some(player_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &CommissionRecord) -> bool {
        self.order_id.map_or(true, |o| record.order_id == o)
            && self.player_id.map_or(true, |p| record.player_id == p)
            && self.status.map_or(true, |s| record.settlement_status == s)
            && self.month.map_or(true, |m| record.settlement_month == m)
            && self.created_from.map_or(true, |from| record.created_at >= from)
            && self.created_to.map_or(true, |to| record.created_at < to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementFilter {
    pub player_id: Option<PlayerId>,
    pub month: Option<SettlementMonth>,
    pub status: Option<MonthlySettlementStatus>,
}

impl SettlementFilter {
    pub fn matches(&self, settlement: &MonthlySettlement) -> bool {
        self.player_id.map_or(true, |p| settlement.player_id == p)
            && self.month.map_or(true, |m| settlement.settlement_month == m)
            && self.status.map_or(true, |s| settlement.status == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RankingConfigFilter {
    pub ranking_type: Option<RankingType>,
    pub month: Option<SettlementMonth>,
    pub is_active: Option<bool>,
}

impl RankingConfigFilter {
    pub fn matches(&self, config: &RankingCommissionConfig) -> bool {
        self.ranking_type.map_or(true, |t| config.ranking_type == t)
            && self.month.map_or(true, |m| config.month == m)
            && self.is_active.map_or(true, |a| config.is_active == a)
    }
}

/// Sums over the settled records of a month
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyStats {
    pub total_orders: i64,
    pub total_income: i64,
    pub total_commission: i64,
    pub total_player_income: i64,
}

/// Sums over all of one player's records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTotals {
    pub total_orders: i64,
    pub total_commission: i64,
    pub total_income: i64,
}

/// Rule, record and settlement persistence
#[async_trait::async_trait]
pub trait CommissionStore: Send + Sync {
    // Rules

    async fn create_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule>;

    async fn get_rule(&self, id: RuleId) -> Result<Option<CommissionRule>>;

    /// The active, unscoped `default`-type rule
    async fn get_default_rule(&self) -> Result<Option<CommissionRule>>;

    /// Most specific active rule whose scope applies to `scope`
    /// (player > game > service type, first match wins on ties)
    async fn find_scoped_rule(&self, scope: &RuleScope) -> Result<Option<CommissionRule>>;

    async fn list_rules(&self, filter: &RuleFilter, page: PageRequest) -> Result<Page<CommissionRule>>;

    async fn update_rule(&self, rule: &CommissionRule) -> Result<CommissionRule>;

    /// Returns false when the rule did not exist
    async fn delete_rule(&self, id: RuleId) -> Result<bool>;

    // Records

    async fn insert_record(&self, record: NewCommissionRecord) -> Result<CommissionRecord>;

    async fn get_record_by_order(&self, order_id: OrderId) -> Result<Option<CommissionRecord>>;

    async fn list_records(&self, filter: &RecordFilter, page: PageRequest) -> Result<Page<CommissionRecord>>;

    /// Every pending record of the month, unpaged
    async fn pending_records_for_month(&self, month: SettlementMonth) -> Result<Vec<CommissionRecord>>;

    async fn monthly_stats(&self, month: SettlementMonth) -> Result<MonthlyStats>;

    async fn player_monthly_income(&self, player_id: PlayerId, month: SettlementMonth) -> Result<i64>;

    async fn player_totals(&self, player_id: PlayerId) -> Result<PlayerTotals>;

    // Settlements

    async fn month_has_settlements(&self, month: SettlementMonth) -> Result<bool>;

    async fn get_settlement(&self, player_id: PlayerId, month: SettlementMonth) -> Result<Option<MonthlySettlement>>;

    async fn list_settlements(&self, filter: &SettlementFilter, page: PageRequest) -> Result<Page<MonthlySettlement>>;

    /// Create the settlement and flip `record_ids` from pending to settled atomically
    async fn commit_worker_settlement(
        &self,
        settlement: NewMonthlySettlement,
        record_ids: &[RecordId],
        settled_at: DateTime<Utc>,
    ) -> Result<MonthlySettlement>;

    async fn update_settlement(&self, settlement: &MonthlySettlement) -> Result<MonthlySettlement>;
}

/// Read-only order access owned by the order service
#[async_trait::async_trait]
pub trait OrderLookup: Send + Sync {
    /// Fails with `NotFound` when the order does not exist
    async fn get_order(&self, order_id: OrderId) -> Result<Order>;
}

/// Ranking commission config persistence
///
/// Tier JSON is stored as given; callers validate it before writing.
#[async_trait::async_trait]
pub trait RankingConfigStore: Send + Sync {
    async fn create_config(&self, config: NewRankingCommissionConfig) -> Result<RankingCommissionConfig>;

    async fn get_config(&self, id: RankingConfigId) -> Result<Option<RankingCommissionConfig>>;

    /// Latest active config of the given type for the month
    async fn active_config_for_month(
        &self,
        ranking_type: RankingType,
        month: SettlementMonth,
    ) -> Result<Option<RankingCommissionConfig>>;

    async fn list_configs(
        &self,
        filter: &RankingConfigFilter,
        page: PageRequest,
    ) -> Result<Page<RankingCommissionConfig>>;

    async fn update_config(&self, config: &RankingCommissionConfig) -> Result<RankingCommissionConfig>;

    /// Returns false when the config did not exist
    async fn delete_config(&self, id: RankingConfigId) -> Result<bool>;
}

/// Single-flight guard so only one settlement run per month executes
#[async_trait::async_trait]
pub trait SettlementLock: Send + Sync {
    /// Returns false when another holder has the month
    async fn try_acquire(&self, month: SettlementMonth) -> Result<bool>;

    async fn release(&self, month: SettlementMonth) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_normalizes() {
        let page = PageRequest::new(0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.offset(), 0);

        let page = PageRequest::new(3, 10);
        assert_eq!(page.offset(), 20);
        assert_eq!(page.limit(), 10);

        assert_eq!(PageRequest::new(1, 10_000).page_size, MAX_PAGE_SIZE);
    }
}
