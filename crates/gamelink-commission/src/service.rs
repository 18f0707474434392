//! `CommissionService`: the engine's public operations in one place
//!
//! Wires the resolver, calculator, recorder, aggregator, reports and the
//! two admin surfaces over shared store handles. Holds no state of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use gamelink_types::{
    AppliedRate, CommissionCalculation, CommissionRecord, CommissionRule, MonthlySettlement, OrderId, PlayerId,
    RankingCommissionConfig, RankingConfigId, RankingType, Result, RuleId, RuleScope, SettlementBonus,
    SettlementMonth,
};

use crate::aggregator::{SettlementAggregator, SettlementProgress, SettlementRun};
use crate::calculator::CommissionCalculator;
use crate::memory::{InMemoryCommissionStore, InMemoryOrders, InMemoryRankingConfigs, InMemorySettlementLock};
use crate::ranking::{CreateRankingConfigRequest, RankingConfigAdmin, UpdateRankingConfigRequest};
use crate::recorder::CommissionRecorder;
use crate::reporting::{CommissionReports, PlatformStats, PlayerCommissionSummary};
use crate::resolver::{RateResolver, RateStrategy};
use crate::rules::{CreateRuleRequest, RuleAdmin, UpdateRuleRequest};
use crate::store::{
    CommissionStore, OrderLookup, Page, PageRequest, RankingConfigFilter, RankingConfigStore, RecordFilter,
    RuleFilter, SettlementFilter, SettlementLock,
};

#[derive(Clone)]
pub struct CommissionService {
    resolver: RateResolver,
    calculator: CommissionCalculator,
    recorder: CommissionRecorder,
    aggregator: SettlementAggregator,
    reports: CommissionReports,
    rules: RuleAdmin,
    rankings: RankingConfigAdmin,
}

impl CommissionService {
    pub fn new(
        store: Arc<dyn CommissionStore>,
        orders: Arc<dyn OrderLookup>,
        lock: Arc<dyn SettlementLock>,
        rankings: Arc<dyn RankingConfigStore>,
    ) -> Self {
        let resolver = RateResolver::new(store.clone());
        let calculator = CommissionCalculator::new(orders, resolver.clone());
        Self {
            recorder: CommissionRecorder::new(store.clone(), calculator.clone()),
            aggregator: SettlementAggregator::new(store.clone(), lock),
            reports: CommissionReports::new(store.clone()),
            rules: RuleAdmin::new(store),
            rankings: RankingConfigAdmin::new(rankings),
            resolver,
            calculator,
        }
    }

    /// Service over in-memory stores with a process-local settlement lock
    pub fn in_memory(store: InMemoryCommissionStore, orders: InMemoryOrders) -> Self {
        Self::new(
            Arc::new(store),
            Arc::new(orders),
            Arc::new(InMemorySettlementLock::new()),
            Arc::new(InMemoryRankingConfigs::new()),
        )
    }

    // ------------------------------------------------------------------
    // Rates and calculation
    // ------------------------------------------------------------------

    pub async fn resolve_rate(&self, scope: &RuleScope) -> Result<AppliedRate> {
        self.resolver.resolve(scope).await
    }

    pub async fn calculate_commission(&self, order_id: OrderId) -> Result<CommissionCalculation> {
        self.calculator.calculate(order_id).await
    }

    pub async fn calculate_commission_with(
        &self,
        order_id: OrderId,
        strategy: &RateStrategy,
    ) -> Result<CommissionCalculation> {
        self.calculator.calculate_with(order_id, strategy).await
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record in the current UTC month
    pub async fn record_commission(&self, order_id: OrderId) -> Result<CommissionRecord> {
        self.recorder.record(order_id).await
    }

    pub async fn record_commission_at(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<CommissionRecord> {
        self.recorder.record_at(order_id, now).await
    }

    pub async fn record_commission_in_month(
        &self,
        order_id: OrderId,
        month: SettlementMonth,
    ) -> Result<CommissionRecord> {
        self.recorder.record_in_month(order_id, month).await
    }

    pub async fn record_commission_with(
        &self,
        order_id: OrderId,
        month: SettlementMonth,
        strategy: &RateStrategy,
    ) -> Result<CommissionRecord> {
        self.recorder.record_with(order_id, month, strategy).await
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    pub async fn settle_month(&self, month: SettlementMonth) -> Result<SettlementRun> {
        self.aggregator.settle_month(month).await
    }

    pub async fn resume_settlement(&self, month: SettlementMonth) -> Result<SettlementRun> {
        self.aggregator.resume_month(month).await
    }

    pub async fn settlement_progress(&self, month: SettlementMonth) -> Result<SettlementProgress> {
        self.aggregator.progress(month).await
    }

    pub async fn apply_settlement_bonus(
        &self,
        player_id: PlayerId,
        month: SettlementMonth,
        bonus: SettlementBonus,
    ) -> Result<MonthlySettlement> {
        self.aggregator.apply_bonus(player_id, month, bonus).await
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub async fn get_player_commission_summary(
        &self,
        player_id: PlayerId,
        month: SettlementMonth,
    ) -> Result<PlayerCommissionSummary> {
        self.reports.player_summary(player_id, month).await
    }

    pub async fn get_commission_records(
        &self,
        player_id: PlayerId,
        page: i64,
        page_size: i64,
    ) -> Result<Page<CommissionRecord>> {
        self.reports
            .player_records(player_id, PageRequest::new(page, page_size))
            .await
    }

    pub async fn list_commission_records(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<Page<CommissionRecord>> {
        self.reports.records(filter, page).await
    }

    pub async fn get_monthly_settlements(
        &self,
        player_id: PlayerId,
        page: i64,
        page_size: i64,
    ) -> Result<Page<MonthlySettlement>> {
        self.reports
            .player_settlements(player_id, PageRequest::new(page, page_size))
            .await
    }

    pub async fn list_monthly_settlements(
        &self,
        filter: &SettlementFilter,
        page: PageRequest,
    ) -> Result<Page<MonthlySettlement>> {
        self.reports.settlements(filter, page).await
    }

    pub async fn get_platform_stats(&self, month: SettlementMonth) -> Result<PlatformStats> {
        self.reports.platform_stats(month).await
    }

    // ------------------------------------------------------------------
    // Rule administration
    // ------------------------------------------------------------------

    pub async fn create_commission_rule(&self, request: CreateRuleRequest) -> Result<CommissionRule> {
        self.rules.create(request).await
    }

    pub async fn update_commission_rule(&self, id: RuleId, request: UpdateRuleRequest) -> Result<CommissionRule> {
        self.rules.update(id, request).await
    }

    pub async fn get_commission_rule(&self, id: RuleId) -> Result<CommissionRule> {
        self.rules.get(id).await
    }

    pub async fn list_commission_rules(&self, filter: &RuleFilter, page: PageRequest) -> Result<Page<CommissionRule>> {
        self.rules.list(filter, page).await
    }

    pub async fn delete_commission_rule(&self, id: RuleId) -> Result<()> {
        self.rules.delete(id).await
    }

    // ------------------------------------------------------------------
    // Ranking commission configs
    // ------------------------------------------------------------------

    pub async fn create_ranking_config(&self, request: CreateRankingConfigRequest) -> Result<RankingCommissionConfig> {
        self.rankings.create(request).await
    }

    pub async fn update_ranking_config(
        &self,
        id: RankingConfigId,
        request: UpdateRankingConfigRequest,
    ) -> Result<RankingCommissionConfig> {
        self.rankings.update(id, request).await
    }

    pub async fn get_ranking_config(&self, id: RankingConfigId) -> Result<RankingCommissionConfig> {
        self.rankings.get(id).await
    }

    pub async fn list_ranking_configs(
        &self,
        filter: &RankingConfigFilter,
        page: PageRequest,
    ) -> Result<Page<RankingCommissionConfig>> {
        self.rankings.list(filter, page).await
    }

    pub async fn delete_ranking_config(&self, id: RankingConfigId) -> Result<()> {
        self.rankings.delete(id).await
    }

    pub async fn ranking_rate_for_rank(
        &self,
        ranking_type: RankingType,
        month: SettlementMonth,
        rank: i32,
    ) -> Result<Option<AppliedRate>> {
        self.rankings.rate_for_rank(ranking_type, month, rank).await
    }
}
