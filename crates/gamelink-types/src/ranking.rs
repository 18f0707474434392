//! Ranking commission tiers
//!
//! A tier maps a contiguous range of ranking positions to a commission
//! rate. Tiers are stored as a JSON array inside a config row, e.g.
//! `[{"rankStart":1,"rankEnd":3,"commissionRate":10}]`.
//!
//! Fields stay raw integers here so that out-of-range input survives
//! decoding and is rejected by validation with a proper message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CommissionError, RankingConfigId, Result, SettlementMonth};

/// One rank range and its commission rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingCommissionRule {
    pub rank_start: i32,
    pub rank_end: i32,
    pub commission_rate: i32,
}

impl RankingCommissionRule {
    pub const fn new(rank_start: i32, rank_end: i32, commission_rate: i32) -> Self {
        Self {
            rank_start,
            rank_end,
            commission_rate,
        }
    }

    pub fn contains(&self, rank: i32) -> bool {
        rank >= self.rank_start && rank <= self.rank_end
    }
}

/// Which leaderboard a ranking config applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingType {
    Income,
    OrderCount,
}

impl RankingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::OrderCount => "order_count",
        }
    }
}

impl fmt::Display for RankingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankingType {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "income" => Ok(Self::Income),
            "order_count" => Ok(Self::OrderCount),
            other => Err(CommissionError::validation(format!("unknown ranking type {other:?}"))),
        }
    }
}

/// Config row holding a month's tier table as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingCommissionConfig {
    pub id: RankingConfigId,
    pub name: String,
    pub ranking_type: RankingType,
    /// Ranking period label (currently always `monthly`)
    pub period: String,
    pub month: SettlementMonth,
    pub rules_json: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a ranking config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRankingCommissionConfig {
    pub name: String,
    pub ranking_type: RankingType,
    pub period: String,
    pub month: SettlementMonth,
    pub rules_json: String,
    pub description: String,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_json_shape() {
        let tier: RankingCommissionRule =
            serde_json::from_str(r#"{"rankStart":1,"rankEnd":3,"commissionRate":10}"#).unwrap();
        assert_eq!(tier, RankingCommissionRule::new(1, 3, 10));
        assert!(tier.contains(1) && tier.contains(3));
        assert!(!tier.contains(4));
    }

    #[test]
    fn test_ranking_type_strings() {
        assert_eq!("order_count".parse::<RankingType>().unwrap(), RankingType::OrderCount);
        assert_eq!(RankingType::Income.to_string(), "income");
    }
}
