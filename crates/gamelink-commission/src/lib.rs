//! GameLink Commission - Commission calculation and monthly settlement
//!
//! The engine prices completed orders, records one commission row per
//! order and rolls each worker's records into a monthly settlement.
//!
//! ```text
//! Order ──> RateResolver ──> CommissionCalculator ──> CommissionRecorder
//!                                                          │ pending records
//!                                                          v
//!                                              SettlementAggregator ──> MonthlySettlement
//! ```
//!
//! All state lives behind the traits in [`store`]; the `gamelink-db` crate
//! provides PostgreSQL/Redis implementations and [`memory`] provides
//! in-process ones.

pub mod aggregator;
pub mod calculator;
pub mod memory;
pub mod ranking;
pub mod recorder;
pub mod reporting;
pub mod resolver;
pub mod rules;
pub mod service;
pub mod store;

pub use aggregator::{group_by_player, PlayerMonthTotals, SettlementAggregator, SettlementProgress, SettlementRun};
pub use calculator::CommissionCalculator;
pub use memory::{InMemoryCommissionStore, InMemoryOrders, InMemoryRankingConfigs, InMemorySettlementLock};
pub use ranking::{
    find_rate_for_rank, parse_tiers, ranges_overlap, ranking_rate_for, validate_tiers, CreateRankingConfigRequest,
    RankingConfigAdmin, UpdateRankingConfigRequest,
};
pub use recorder::CommissionRecorder;
pub use reporting::{CommissionReports, PlatformStats, PlayerCommissionSummary};
pub use resolver::{select_lowest_rate, RateResolver, RateStrategy};
pub use rules::{CreateRuleRequest, RuleAdmin, UpdateRuleRequest};
pub use service::CommissionService;
pub use store::{
    CommissionStore, MonthlyStats, OrderLookup, Page, PageRequest, PlayerTotals, RankingConfigFilter,
    RankingConfigStore, RecordFilter, RuleFilter, SettlementFilter, SettlementLock,
};

pub use gamelink_types;
