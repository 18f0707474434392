//! GameLink Settlement Service
//!
//! Operator CLI for the commission engine plus the long-running monthly
//! settlement scheduler.
//!
//! # Usage
//!
//! ```bash
//! # Apply migrations
//! gamelink-settlement migrate
//!
//! # Record an order's commission in an explicit month
//! gamelink-settlement record --order 1024 --month 2024-11
//!
//! # Settle, inspect and finish a month
//! gamelink-settlement settle --month 2024-11
//! gamelink-settlement progress --month 2024-11
//! gamelink-settlement resume --month 2024-11
//!
//! # Run the scheduler with environment overrides
//! GAMELINK__SETTLEMENT__RUN_HOUR_UTC=3 gamelink-settlement serve
//! ```

mod config;
mod scheduler;

use std::net::SocketAddr;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gamelink_commission::CommissionService;
use gamelink_db::Database;
use gamelink_types::{OrderId, PlayerId, SettlementMonth};

use crate::config::{LoggingConfig, MetricsConfig, ServiceConfig};
use crate::scheduler::SettlementScheduler;

// =============================================================================
// CLI Arguments
// =============================================================================

/// GameLink commission settlement
#[derive(Parser, Debug)]
#[command(name = "gamelink-settlement")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "GAMELINK_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GAMELINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "GAMELINK_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations
    Migrate,
    /// Check PostgreSQL and Redis connectivity
    Health,
    /// Price an order without recording it
    Calculate {
        #[arg(long)]
        order: u64,
    },
    /// Record an order's commission (current UTC month unless given)
    Record {
        #[arg(long)]
        order: u64,
        #[arg(long)]
        month: Option<SettlementMonth>,
    },
    /// Settle a month (previous month unless given)
    Settle {
        #[arg(long)]
        month: Option<SettlementMonth>,
    },
    /// Finish a partially settled month
    Resume {
        #[arg(long)]
        month: SettlementMonth,
    },
    /// Show settled workers and pending records for a month
    Progress {
        #[arg(long)]
        month: SettlementMonth,
    },
    /// Platform totals over a month's settled records
    Stats {
        #[arg(long)]
        month: SettlementMonth,
    },
    /// A worker's earnings summary
    Summary {
        #[arg(long)]
        player: u64,
        #[arg(long)]
        month: Option<SettlementMonth>,
    },
    /// Print when the scheduler would next run
    NextRun,
    /// Run the monthly settlement scheduler until interrupted
    Serve,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut service_config = ServiceConfig::load(args.config.as_deref())?;

    if let Some(level) = args.log_level {
        service_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        service_config.logging.format = format;
    }
    if let Some(db_url) = args.database_url {
        service_config.database.postgres_url = db_url;
    }
    if let Some(redis_url) = args.redis_url {
        service_config.database.redis_url = redis_url;
    }

    init_logging(&service_config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting GameLink settlement"
    );

    let scheduler_settings = service_config.settlement.clone();

    if let Command::NextRun = args.command {
        let next = scheduler::next_run_after(
            Utc::now(),
            scheduler_settings.run_day,
            scheduler_settings.run_hour_utc,
        );
        return print_json(&next);
    }

    let db = init_database(&service_config).await?;
    let service = db.commission_service(scheduler_settings.lock_ttl());

    match args.command {
        Command::Migrate => db.migrate().await?,
        Command::Health => print_json(&health_report(&db).await?)?,
        Command::Calculate { order } => {
            print_json(&service.calculate_commission(OrderId(order)).await?)?;
        }
        Command::Record { order, month } => {
            let record = match month {
                Some(month) => service.record_commission_in_month(OrderId(order), month).await?,
                None => service.record_commission(OrderId(order)).await?,
            };
            print_json(&record)?;
        }
        Command::Settle { month } => {
            let month = month.unwrap_or_else(|| SettlementMonth::current().previous());
            print_json(&service.settle_month(month).await?)?;
        }
        Command::Resume { month } => print_json(&service.resume_settlement(month).await?)?,
        Command::Progress { month } => print_json(&service.settlement_progress(month).await?)?,
        Command::Stats { month } => print_json(&service.get_platform_stats(month).await?)?,
        Command::Summary { player, month } => {
            let month = month.unwrap_or_else(SettlementMonth::current);
            print_json(&service.get_player_commission_summary(PlayerId(player), month).await?)?;
        }
        Command::Serve => serve(service, &service_config).await?,
        Command::NextRun => {}
    }

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber.with(fmt::layer().json().with_target(true)).init();
        }
        _ => {
            subscriber.with(fmt::layer().pretty().with_target(true)).init();
        }
    }

    Ok(())
}

/// Connect and verify both pools
async fn init_database(config: &ServiceConfig) -> anyhow::Result<Database> {
    tracing::info!("Connecting to database...");

    let db = Database::connect(&config.database).await?;

    let health = db.health_check().await?;
    if !health.healthy {
        anyhow::bail!(
            "Database health check failed (postgres: {}, redis: {})",
            health.postgres,
            health.redis
        );
    }

    tracing::info!(
        postgres = health.postgres,
        redis = health.redis,
        "Database health check passed"
    );

    Ok(db)
}

/// Install the Prometheus exporter with its own HTTP listener
fn start_metrics_exporter(config: &MetricsConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(port = config.port, "Metrics exporter started");
    Ok(())
}

async fn serve(service: CommissionService, config: &ServiceConfig) -> anyhow::Result<()> {
    if config.metrics.enabled {
        start_metrics_exporter(&config.metrics)?;
    }

    if !config.settlement.scheduler_enabled {
        tracing::warn!("Scheduler disabled, waiting for shutdown");
        shutdown_signal().await;
        return Ok(());
    }

    tracing::info!(
        day = config.settlement.run_day,
        hour_utc = config.settlement.run_hour_utc,
        "Monthly settlement scheduler started"
    );

    SettlementScheduler::new(service, &config.settlement)
        .run(shutdown_signal())
        .await;

    tracing::info!("Scheduler stopped");
    Ok(())
}

#[derive(Serialize)]
struct HealthReport {
    postgres: bool,
    redis: bool,
    healthy: bool,
}

async fn health_report(db: &Database) -> anyhow::Result<HealthReport> {
    let status = db.health_check().await?;
    Ok(HealthReport {
        postgres: status.postgres,
        redis: status.redis,
        healthy: status.healthy,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["gamelink-settlement", "record", "--order", "42", "--month", "2024-11"]);
        match args.command {
            Command::Record { order, month } => {
                assert_eq!(order, 42);
                assert_eq!(month.map(|m| m.to_string()).as_deref(), Some("2024-11"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_month() {
        assert!(Args::try_parse_from(["gamelink-settlement", "resume", "--month", "2024-13"]).is_err());
    }
}
