//! Read-only commission reports

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gamelink_types::{CommissionRecord, MonthlySettlement, PlayerId, Result, SettlementMonth};

use crate::store::{CommissionStore, MonthlyStats, Page, PageRequest, RecordFilter, SettlementFilter};

/// A worker's earnings overview
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCommissionSummary {
    /// Income from records stamped with the requested month
    pub monthly_income: i64,
    /// Across all of the worker's records
    pub total_commission: i64,
    pub total_income: i64,
    pub total_orders: i64,
}

/// Totals over the settled records of a month
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_orders: i64,
    pub total_income: i64,
    pub total_commission: i64,
    pub total_player_income: i64,
}

impl From<MonthlyStats> for PlatformStats {
    fn from(stats: MonthlyStats) -> Self {
        Self {
            total_orders: stats.total_orders,
            total_income: stats.total_income,
            total_commission: stats.total_commission,
            total_player_income: stats.total_player_income,
        }
    }
}

#[derive(Clone)]
pub struct CommissionReports {
    store: Arc<dyn CommissionStore>,
}

impl CommissionReports {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self { store }
    }

    pub async fn player_summary(&self, player_id: PlayerId, month: SettlementMonth) -> Result<PlayerCommissionSummary> {
        let monthly_income = self.store.player_monthly_income(player_id, month).await?;
        let totals = self.store.player_totals(player_id).await?;

        Ok(PlayerCommissionSummary {
            monthly_income,
            total_commission: totals.total_commission,
            total_income: totals.total_income,
            total_orders: totals.total_orders,
        })
    }

    pub async fn player_records(&self, player_id: PlayerId, page: PageRequest) -> Result<Page<CommissionRecord>> {
        self.store.list_records(&RecordFilter::for_player(player_id), page).await
    }

    pub async fn records(&self, filter: &RecordFilter, page: PageRequest) -> Result<Page<CommissionRecord>> {
        self.store.list_records(filter, page).await
    }

    pub async fn player_settlements(&self, player_id: PlayerId, page: PageRequest) -> Result<Page<MonthlySettlement>> {
        let filter = SettlementFilter {
            player_id: Some(player_id),
            ..Default::default()
        };
        self.store.list_settlements(&filter, page).await
    }

    pub async fn settlements(&self, filter: &SettlementFilter, page: PageRequest) -> Result<Page<MonthlySettlement>> {
        self.store.list_settlements(filter, page).await
    }

    pub async fn platform_stats(&self, month: SettlementMonth) -> Result<PlatformStats> {
        Ok(self.store.monthly_stats(month).await?.into())
    }
}
