//! Monthly settlement scheduler
//!
//! Settles the previous month once per month at the configured day and
//! hour (UTC). A failed run is logged and left for an operator to inspect
//! with `progress` and finish with `resume`; the scheduler never retries.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tracing::{error, info, warn};

use gamelink_commission::{CommissionService, SettlementRun};
use gamelink_types::{CommissionError, Result, SettlementMonth};

use crate::config::SettlementConfig;

/// First run strictly after `now` on `day` at `hour`:00 UTC
pub fn next_run_after(now: DateTime<Utc>, day: u32, hour: u32) -> Option<DateTime<Utc>> {
    let this_month = Utc.with_ymd_and_hms(now.year(), now.month(), day, hour, 0, 0).single()?;
    if this_month > now {
        return Some(this_month);
    }
    let next = SettlementMonth::of(now).next();
    Utc.with_ymd_and_hms(next.year(), next.month(), day, hour, 0, 0).single()
}

pub struct SettlementScheduler {
    service: CommissionService,
    run_day: u32,
    run_hour: u32,
}

impl SettlementScheduler {
    pub fn new(service: CommissionService, config: &SettlementConfig) -> Self {
        Self {
            service,
            run_day: config.run_day,
            run_hour: config.run_hour_utc,
        }
    }

    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_run_after(now, self.run_day, self.run_hour)
    }

    /// Settle the month before the one containing `at`
    pub async fn run_for(&self, at: DateTime<Utc>) -> Result<SettlementRun> {
        let month = SettlementMonth::of(at).previous();
        info!(month = %month, "Running scheduled settlement");
        self.service.settle_month(month).await
    }

    /// One scheduled run; outcomes are logged, never retried
    pub async fn tick(&self, at: DateTime<Utc>) {
        match self.run_for(at).await {
            Ok(run) => info!(
                month = %run.month,
                workers = run.settlements.len(),
                records = run.records_settled,
                "Scheduled settlement complete"
            ),
            Err(e) if e.is_idempotent_noop() => info!(error = %e, "Month already settled"),
            Err(CommissionError::NoRecordsToSettle { month }) => {
                info!(month = %month, "No pending records to settle")
            }
            Err(CommissionError::SettlementInProgress { month }) => {
                warn!(month = %month, "Settlement already running elsewhere")
            }
            Err(e) => error!(error = %e, code = e.error_code(), "Scheduled settlement failed"),
        }
    }

    /// Sleep until each run time and settle, until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        loop {
            let now = Utc::now();
            let Some(next) = self.next_run(now) else {
                error!(
                    day = self.run_day,
                    hour = self.run_hour,
                    "Cannot compute next settlement run, scheduler stopping"
                );
                return;
            };
            info!(next_run = %next, "Next settlement scheduled");

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(wait) => self.tick(next).await,
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamelink_commission::{InMemoryCommissionStore, InMemoryOrders};
    use gamelink_types::{Order, OrderId, PlayerId};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_next_run_same_month_when_ahead() {
        assert_eq!(next_run_after(at(2024, 12, 1, 1), 1, 2), Some(at(2024, 12, 1, 2)));
    }

    #[test]
    fn test_next_run_rolls_to_next_month() {
        assert_eq!(next_run_after(at(2024, 11, 15, 9), 1, 2), Some(at(2024, 12, 1, 2)));
        // Exactly at the run time counts as passed
        assert_eq!(next_run_after(at(2024, 12, 1, 2), 1, 2), Some(at(2025, 1, 1, 2)));
    }

    #[tokio::test]
    async fn test_run_settles_previous_month() {
        let store = InMemoryCommissionStore::new();
        let orders = InMemoryOrders::new();
        orders
            .insert(Order {
                id: OrderId(1),
                game_id: None,
                player_id: Some(PlayerId(7)),
                total_amount_cents: 10_000,
            })
            .await;
        let service = CommissionService::in_memory(store.clone(), orders);
        let november: SettlementMonth = "2024-11".parse().unwrap();
        service.record_commission_in_month(OrderId(1), november).await.unwrap();

        let scheduler = SettlementScheduler::new(service, &SettlementConfig::default());
        let run = scheduler.run_for(at(2024, 12, 1, 2)).await.unwrap();

        assert_eq!(run.month, november);
        assert_eq!(run.settlements.len(), 1);
        assert_eq!(run.settlements[0].total_income_cents, 8_000);

        // A second run is logged and swallowed
        scheduler.tick(at(2024, 12, 1, 2)).await;
        assert_eq!(store.all_settlements().await.len(), 1);
    }
}
