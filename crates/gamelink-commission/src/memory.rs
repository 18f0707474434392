//! In-process implementations of the storage seams
//!
//! Used by tests and by single-node tooling. All state lives behind one
//! lock so `commit_worker_settlement` is atomic the same way a database
//! transaction is.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use gamelink_types::{
    CommissionError, CommissionRecord, CommissionRule, MonthlySettlement, MonthlySettlementStatus,
    NewCommissionRecord, NewCommissionRule, NewMonthlySettlement, NewRankingCommissionConfig, Order, OrderId,
    PlayerId, RankingCommissionConfig, RankingConfigId, RankingType, RecordId, Result, RuleId, RuleScope,
    SettlementId, SettlementMonth, SettlementStatus,
};

use crate::store::{
    CommissionStore, MonthlyStats, OrderLookup, Page, PageRequest, PlayerTotals, RankingConfigFilter,
    RankingConfigStore, RecordFilter, RuleFilter, SettlementFilter, SettlementLock,
};

#[derive(Default)]
struct State {
    next_rule_id: u64,
    rules: BTreeMap<RuleId, CommissionRule>,
    next_record_id: u64,
    records: BTreeMap<RecordId, CommissionRecord>,
    next_settlement_id: u64,
    settlements: BTreeMap<SettlementId, MonthlySettlement>,
}

fn paginate<T: Clone>(mut items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len() as i64;
    let start = (page.offset() as usize).min(items.len());
    let end = (start + page.limit() as usize).min(items.len());
    Page {
        items: items.drain(start..end).collect(),
        total,
    }
}

/// Commission store kept entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryCommissionStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCommissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, oldest first
    pub async fn all_records(&self) -> Vec<CommissionRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    /// Snapshot of every settlement, oldest first
    pub async fn all_settlements(&self) -> Vec<MonthlySettlement> {
        self.state.read().await.settlements.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl CommissionStore for InMemoryCommissionStore {
    async fn create_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule> {
        let mut state = self.state.write().await;
        state.next_rule_id += 1;
        let now = Utc::now();
        let rule = CommissionRule {
            id: RuleId(state.next_rule_id),
            name: rule.name,
            description: rule.description,
            rule_type: rule.rule_type,
            rate: rule.rate,
            is_active: rule.is_active,
            scope: rule.scope,
            created_at: now,
            updated_at: now,
        };
        state.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, id: RuleId) -> Result<Option<CommissionRule>> {
        Ok(self.state.read().await.rules.get(&id).cloned())
    }

    async fn get_default_rule(&self) -> Result<Option<CommissionRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .values()
            .find(|r| r.is_active && r.is_default())
            .cloned())
    }

    async fn find_scoped_rule(&self, scope: &RuleScope) -> Result<Option<CommissionRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .values()
            .filter(|r| r.is_active && r.scope.applies_to(scope))
            .max_by_key(|r| (r.scope.specificity(), Reverse(r.id)))
            .cloned())
    }

    async fn list_rules(&self, filter: &RuleFilter, page: PageRequest) -> Result<Page<CommissionRule>> {
        let state = self.state.read().await;
        let mut rules: Vec<CommissionRule> = state.rules.values().filter(|r| filter.matches(r)).cloned().collect();
        rules.sort_by_key(|r| Reverse((r.created_at, r.id)));
        Ok(paginate(rules, page))
    }

    async fn update_rule(&self, rule: &CommissionRule) -> Result<CommissionRule> {
        let mut state = self.state.write().await;
        let stored = state
            .rules
            .get_mut(&rule.id)
            .ok_or_else(|| CommissionError::not_found("commission rule", rule.id))?;
        *stored = CommissionRule {
            updated_at: Utc::now(),
            ..rule.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_rule(&self, id: RuleId) -> Result<bool> {
        Ok(self.state.write().await.rules.remove(&id).is_some())
    }

    async fn insert_record(&self, record: NewCommissionRecord) -> Result<CommissionRecord> {
        let mut state = self.state.write().await;
        if state.records.values().any(|r| r.order_id == record.order_id) {
            return Err(CommissionError::AlreadyRecorded {
                order_id: record.order_id,
            });
        }

        state.next_record_id += 1;
        let now = Utc::now();
        let record = CommissionRecord {
            id: RecordId(state.next_record_id),
            order_id: record.order_id,
            player_id: record.player_id,
            total_amount_cents: record.total_amount_cents,
            commission_rate: record.commission_rate,
            commission_cents: record.commission_cents,
            player_income_cents: record.player_income_cents,
            settlement_status: SettlementStatus::Pending,
            settlement_month: record.settlement_month,
            settled_at: None,
            created_at: now,
            updated_at: now,
        };
        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_record_by_order(&self, order_id: OrderId) -> Result<Option<CommissionRecord>> {
        let state = self.state.read().await;
        Ok(state.records.values().find(|r| r.order_id == order_id).cloned())
    }

    async fn list_records(&self, filter: &RecordFilter, page: PageRequest) -> Result<Page<CommissionRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<CommissionRecord> =
            state.records.values().filter(|r| filter.matches(r)).cloned().collect();
        records.sort_by_key(|r| Reverse((r.created_at, r.id)));
        Ok(paginate(records, page))
    }

    async fn pending_records_for_month(&self, month: SettlementMonth) -> Result<Vec<CommissionRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.settlement_month == month && r.settlement_status == SettlementStatus::Pending)
            .cloned()
            .collect())
    }

    async fn monthly_stats(&self, month: SettlementMonth) -> Result<MonthlyStats> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.settlement_month == month && r.settlement_status == SettlementStatus::Settled)
            .try_fold(MonthlyStats::default(), |acc, r| {
                Some(MonthlyStats {
                    total_orders: acc.total_orders.checked_add(1)?,
                    total_income: acc.total_income.checked_add(r.total_amount_cents)?,
                    total_commission: acc.total_commission.checked_add(r.commission_cents)?,
                    total_player_income: acc.total_player_income.checked_add(r.player_income_cents)?,
                })
            })
            .ok_or_else(|| CommissionError::storage(format!("platform totals for {month} overflow")))?)
    }

    async fn player_monthly_income(&self, player_id: PlayerId, month: SettlementMonth) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.player_id == player_id && r.settlement_month == month)
            .try_fold(0i64, |acc, r| acc.checked_add(r.player_income_cents))
            .ok_or_else(|| CommissionError::storage(format!("income of player {player_id} for {month} overflows")))?)
    }

    async fn player_totals(&self, player_id: PlayerId) -> Result<PlayerTotals> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.player_id == player_id)
            .try_fold(PlayerTotals::default(), |acc, r| {
                Some(PlayerTotals {
                    total_orders: acc.total_orders.checked_add(1)?,
                    total_commission: acc.total_commission.checked_add(r.commission_cents)?,
                    total_income: acc.total_income.checked_add(r.player_income_cents)?,
                })
            })
            .ok_or_else(|| CommissionError::storage(format!("totals of player {player_id} overflow")))?)
    }

    async fn month_has_settlements(&self, month: SettlementMonth) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.settlements.values().any(|s| s.settlement_month == month))
    }

    async fn get_settlement(&self, player_id: PlayerId, month: SettlementMonth) -> Result<Option<MonthlySettlement>> {
        let state = self.state.read().await;
        Ok(state
            .settlements
            .values()
            .find(|s| s.player_id == player_id && s.settlement_month == month)
            .cloned())
    }

    async fn list_settlements(&self, filter: &SettlementFilter, page: PageRequest) -> Result<Page<MonthlySettlement>> {
        let state = self.state.read().await;
        let mut settlements: Vec<MonthlySettlement> =
            state.settlements.values().filter(|s| filter.matches(s)).cloned().collect();
        settlements.sort_by_key(|s| Reverse((s.settlement_month, s.created_at, s.id)));
        Ok(paginate(settlements, page))
    }

    async fn commit_worker_settlement(
        &self,
        settlement: NewMonthlySettlement,
        record_ids: &[RecordId],
        settled_at: DateTime<Utc>,
    ) -> Result<MonthlySettlement> {
        let mut state = self.state.write().await;

        if state
            .settlements
            .values()
            .any(|s| s.player_id == settlement.player_id && s.settlement_month == settlement.settlement_month)
        {
            return Err(CommissionError::AlreadySettled {
                month: settlement.settlement_month,
            });
        }

        // Validate every record before touching anything.
        for id in record_ids {
            let record = state
                .records
                .get(id)
                .ok_or_else(|| CommissionError::not_found("commission record", id))?;
            if record.settlement_status != SettlementStatus::Pending || record.player_id != settlement.player_id {
                return Err(CommissionError::storage(format!(
                    "record {id} is not a pending record of player {}",
                    settlement.player_id
                )));
            }
        }

        state.next_settlement_id += 1;
        let created = MonthlySettlement {
            id: SettlementId(state.next_settlement_id),
            player_id: settlement.player_id,
            settlement_month: settlement.settlement_month,
            total_order_count: settlement.total_order_count,
            total_amount_cents: settlement.total_amount_cents,
            total_commission_cents: settlement.total_commission_cents,
            total_income_cents: settlement.total_income_cents,
            bonus_cents: 0,
            final_income_cents: settlement.total_income_cents,
            status: MonthlySettlementStatus::Pending,
            income_rank: None,
            order_rank: None,
            quality_rank: None,
            created_at: settled_at,
            updated_at: settled_at,
            settled_at: None,
        };
        state.settlements.insert(created.id, created.clone());

        for id in record_ids {
            if let Some(record) = state.records.get_mut(id) {
                record.settlement_status = SettlementStatus::Settled;
                record.settled_at = Some(settled_at);
                record.updated_at = settled_at;
            }
        }

        debug!(
            player_id = %created.player_id,
            month = %created.settlement_month,
            records = record_ids.len(),
            "Committed worker settlement"
        );
        Ok(created)
    }

    async fn update_settlement(&self, settlement: &MonthlySettlement) -> Result<MonthlySettlement> {
        let mut state = self.state.write().await;
        let stored = state
            .settlements
            .get_mut(&settlement.id)
            .ok_or_else(|| CommissionError::not_found("monthly settlement", settlement.id))?;
        *stored = MonthlySettlement {
            updated_at: Utc::now(),
            ..settlement.clone()
        };
        Ok(stored.clone())
    }
}

/// Ranking commission configs kept in memory
#[derive(Clone, Default)]
pub struct InMemoryRankingConfigs {
    configs: Arc<RwLock<BTreeMap<RankingConfigId, RankingCommissionConfig>>>,
}

impl InMemoryRankingConfigs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RankingConfigStore for InMemoryRankingConfigs {
    async fn create_config(&self, config: NewRankingCommissionConfig) -> Result<RankingCommissionConfig> {
        let mut configs = self.configs.write().await;
        let next = configs.keys().next_back().map_or(1, |id| id.get() + 1);
        let now = Utc::now();
        let created = RankingCommissionConfig {
            id: RankingConfigId(next),
            name: config.name,
            ranking_type: config.ranking_type,
            period: config.period,
            month: config.month,
            rules_json: config.rules_json,
            description: config.description,
            is_active: config.is_active,
            created_at: now,
            updated_at: now,
        };
        configs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_config(&self, id: RankingConfigId) -> Result<Option<RankingCommissionConfig>> {
        Ok(self.configs.read().await.get(&id).cloned())
    }

    async fn active_config_for_month(
        &self,
        ranking_type: RankingType,
        month: SettlementMonth,
    ) -> Result<Option<RankingCommissionConfig>> {
        let configs = self.configs.read().await;
        Ok(configs
            .values()
            .rev()
            .find(|c| c.is_active && c.ranking_type == ranking_type && c.month == month)
            .cloned())
    }

    async fn list_configs(
        &self,
        filter: &RankingConfigFilter,
        page: PageRequest,
    ) -> Result<Page<RankingCommissionConfig>> {
        let configs = self.configs.read().await;
        let matching: Vec<RankingCommissionConfig> =
            configs.values().rev().filter(|c| filter.matches(c)).cloned().collect();
        Ok(paginate(matching, page))
    }

    async fn update_config(&self, config: &RankingCommissionConfig) -> Result<RankingCommissionConfig> {
        let mut configs = self.configs.write().await;
        let stored = configs
            .get_mut(&config.id)
            .ok_or_else(|| CommissionError::not_found("ranking commission config", config.id))?;
        *stored = RankingCommissionConfig {
            updated_at: Utc::now(),
            ..config.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_config(&self, id: RankingConfigId) -> Result<bool> {
        Ok(self.configs.write().await.remove(&id).is_some())
    }
}

/// Order lookup over a fixed set of orders
#[derive(Clone, Default)]
pub struct InMemoryOrders {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }
}

#[async_trait::async_trait]
impl OrderLookup for InMemoryOrders {
    async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.orders
            .read()
            .await
            .get(&order_id)
            .cloned()
            .ok_or_else(|| CommissionError::not_found("order", order_id))
    }
}

/// Process-local month lock
#[derive(Clone, Default)]
pub struct InMemorySettlementLock {
    held: Arc<Mutex<HashSet<SettlementMonth>>>,
}

impl InMemorySettlementLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SettlementLock for InMemorySettlementLock {
    async fn try_acquire(&self, month: SettlementMonth) -> Result<bool> {
        Ok(self.held.lock().await.insert(month))
    }

    async fn release(&self, month: SettlementMonth) -> Result<()> {
        self.held.lock().await.remove(&month);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamelink_types::{CommissionRate, GameId, RuleType};

    fn new_rule(name: &str, rate: i64, scope: RuleScope, rule_type: RuleType) -> NewCommissionRule {
        NewCommissionRule {
            name: name.to_string(),
            description: String::new(),
            rule_type,
            rate: CommissionRate::new(rate).unwrap(),
            is_active: true,
            scope,
        }
    }

    fn new_record(order: u64, player: u64) -> NewCommissionRecord {
        NewCommissionRecord {
            order_id: OrderId(order),
            player_id: PlayerId(player),
            total_amount_cents: 10_000,
            commission_rate: CommissionRate::FALLBACK,
            commission_cents: 2_000,
            player_income_cents: 8_000,
            settlement_month: "2024-11".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_scoped_lookup_prefers_player_over_game() {
        let store = InMemoryCommissionStore::new();
        store
            .create_rule(new_rule("game", 15, RuleScope::new(Some(GameId(1)), None, None), RuleType::Special))
            .await
            .unwrap();
        let player_rule = store
            .create_rule(new_rule("player", 12, RuleScope::new(None, Some(PlayerId(5)), None), RuleType::Special))
            .await
            .unwrap();

        let query = RuleScope::new(Some(GameId(1)), Some(PlayerId(5)), None);
        let found = store.find_scoped_rule(&query).await.unwrap().unwrap();
        assert_eq!(found.id, player_rule.id);
    }

    #[tokio::test]
    async fn test_scoped_lookup_ignores_inactive_and_default() {
        let store = InMemoryCommissionStore::new();
        store
            .create_rule(new_rule("default", 20, RuleScope::default(), RuleType::Default))
            .await
            .unwrap();
        let mut inactive = store
            .create_rule(new_rule("game", 15, RuleScope::new(Some(GameId(1)), None, None), RuleType::Special))
            .await
            .unwrap();
        inactive.is_active = false;
        store.update_rule(&inactive).await.unwrap();

        let query = RuleScope::new(Some(GameId(1)), None, None);
        assert!(store.find_scoped_rule(&query).await.unwrap().is_none());
        assert!(store.get_default_rule().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_record_is_rejected_by_store() {
        let store = InMemoryCommissionStore::new();
        store.insert_record(new_record(1, 5)).await.unwrap();
        let err = store.insert_record(new_record(1, 5)).await.unwrap_err();
        assert_eq!(err, CommissionError::AlreadyRecorded { order_id: OrderId(1) });
    }

    #[tokio::test]
    async fn test_commit_rejects_second_settlement_for_worker_month() {
        let store = InMemoryCommissionStore::new();
        let record = store.insert_record(new_record(1, 5)).await.unwrap();
        let settlement = NewMonthlySettlement {
            player_id: PlayerId(5),
            settlement_month: record.settlement_month,
            total_order_count: 1,
            total_amount_cents: 10_000,
            total_commission_cents: 2_000,
            total_income_cents: 8_000,
        };

        store
            .commit_worker_settlement(settlement.clone(), &[record.id], Utc::now())
            .await
            .unwrap();
        let err = store
            .commit_worker_settlement(settlement, &[], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CommissionError::AlreadySettled { .. }));
    }

    #[tokio::test]
    async fn test_overflowing_totals_are_errors() {
        let store = InMemoryCommissionStore::new();
        let huge = i64::MAX / 2 + 1;
        for order in [1, 2] {
            let mut record = new_record(order, 5);
            record.total_amount_cents = huge;
            record.commission_cents = 0;
            record.player_income_cents = huge;
            store.insert_record(record).await.unwrap();
        }

        let err = store.player_totals(PlayerId(5)).await.unwrap_err();
        assert!(matches!(err, CommissionError::Storage(_)));
        let month = "2024-11".parse().unwrap();
        assert!(store.player_monthly_income(PlayerId(5), month).await.is_err());
    }

    #[tokio::test]
    async fn test_lock_is_single_flight_per_month() {
        let lock = InMemorySettlementLock::new();
        let month: SettlementMonth = "2024-11".parse().unwrap();
        assert!(lock.try_acquire(month).await.unwrap());
        assert!(!lock.try_acquire(month).await.unwrap());
        assert!(lock.try_acquire(month.next()).await.unwrap());
        lock.release(month).await.unwrap();
        assert!(lock.try_acquire(month).await.unwrap());
    }
}
