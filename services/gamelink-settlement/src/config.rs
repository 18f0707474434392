//! Service Configuration
//!
//! Layered from an optional file, `config/default`, `config/local` and
//! `GAMELINK__`-prefixed environment variables, in that order.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use gamelink_db::DatabaseConfig;

/// Settlement service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub settlement: SettlementConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Prometheus exporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// Monthly settlement scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Run the scheduler loop in `serve`
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,

    /// Day of month the previous month is settled (1..=28)
    #[serde(default = "default_run_day")]
    pub run_day: u32,

    /// Hour of day, UTC
    #[serde(default = "default_run_hour")]
    pub run_hour_utc: u32,

    /// Expiry of the per-month settlement lock
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            scheduler_enabled: true,
            run_day: default_run_day(),
            run_hour_utc: default_run_hour(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

impl SettlementConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=28).contains(&self.run_day) {
            anyhow::bail!("settlement.run_day must be between 1 and 28, got {}", self.run_day);
        }
        if self.run_hour_utc > 23 {
            anyhow::bail!("settlement.run_hour_utc must be between 0 and 23, got {}", self.run_hour_utc);
        }
        if self.lock_ttl_secs == 0 {
            anyhow::bail!("settlement.lock_ttl_secs must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// Default Functions
// =============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_run_day() -> u32 {
    1
}

fn default_run_hour() -> u32 {
    2
}

fn default_lock_ttl() -> u64 {
    gamelink_db::cache::ttl::SETTLEMENT_LOCK.as_secs()
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl ServiceConfig {
    /// Load configuration from files and environment
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("GAMELINK")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.settlement.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_monthly_schedule() {
        let config = ServiceConfig::default();
        assert_eq!(config.settlement.run_day, 1);
        assert_eq!(config.settlement.run_hour_utc, 2);
        assert!(config.settlement.validate().is_ok());
        assert_eq!(config.settlement.lock_ttl(), gamelink_db::cache::ttl::SETTLEMENT_LOCK);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_rejects_out_of_range_schedule() {
        let mut settlement = SettlementConfig::default();
        settlement.run_day = 31;
        assert!(settlement.validate().is_err());

        let mut settlement = SettlementConfig::default();
        settlement.run_hour_utc = 24;
        assert!(settlement.validate().is_err());
    }
}
