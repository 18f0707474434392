//! Whole-percent commission rates and the platform/worker split
//!
//! A rate is an integer number of percentage points in `[0, 100]`. The
//! split of an order total is computed in integer cents:
//!
//! ```text
//! commission = floor(total * rate / 100)
//! income     = total - commission
//! ```
//!
//! Income is never re-multiplied, so `commission + income == total` holds
//! exactly for every valid input.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CommissionError, Result};

/// Commission rate in whole percentage points (0..=100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct CommissionRate(u8);

impl CommissionRate {
    /// All-to-worker boundary
    pub const ZERO: Self = Self(0);

    /// All-to-platform boundary
    pub const FULL: Self = Self(100);

    /// Last-resort platform rate used when no rule is configured at all
    pub const FALLBACK: Self = Self(20);

    /// Validate a raw percentage
    pub fn new(percent: i64) -> Result<Self> {
        if !(0..=100).contains(&percent) {
            return Err(CommissionError::validation(format!(
                "commission rate must be between 0 and 100, got {percent}"
            )));
        }
        Ok(Self(percent as u8))
    }

    /// Percentage points
    pub fn percent(&self) -> u8 {
        self.0
    }

    /// Split an order total (cents) into platform commission and worker income
    pub fn split(&self, total_amount_cents: i64) -> Result<CommissionSplit> {
        if total_amount_cents < 0 {
            return Err(CommissionError::validation(format!(
                "order total must not be negative, got {total_amount_cents}"
            )));
        }

        // i128 keeps `total * 100` from overflowing for any i64 total.
        let commission = (total_amount_cents as i128 * self.0 as i128) / 100;
        let commission_cents = commission as i64;

        Ok(CommissionSplit {
            total_amount_cents,
            commission_cents,
            player_income_cents: total_amount_cents - commission_cents,
        })
    }
}

impl TryFrom<i64> for CommissionRate {
    type Error = CommissionError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CommissionRate> for i64 {
    fn from(rate: CommissionRate) -> Self {
        rate.0 as i64
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Result of splitting an order total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionSplit {
    pub total_amount_cents: i64,
    pub commission_cents: i64,
    pub player_income_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_bounds() {
        assert!(CommissionRate::new(0).is_ok());
        assert!(CommissionRate::new(100).is_ok());
        assert!(CommissionRate::new(-1).is_err());
        assert!(CommissionRate::new(101).is_err());
    }

    #[test]
    fn test_split_floors_commission() {
        let rate = CommissionRate::new(15).unwrap();
        let split = rate.split(999).unwrap();
        // 999 * 15 / 100 = 149.85
        assert_eq!(split.commission_cents, 149);
        assert_eq!(split.player_income_cents, 850);
    }

    #[test]
    fn test_split_sum_invariant() {
        for percent in 0..=100 {
            let rate = CommissionRate::new(percent).unwrap();
            for total in [0_i64, 1, 7, 99, 100, 101, 12_345, 50_000, 9_999_999] {
                let split = rate.split(total).unwrap();
                assert_eq!(split.commission_cents + split.player_income_cents, total);
                assert_eq!(split.commission_cents, total * percent / 100);
            }
        }
    }

    #[test]
    fn test_boundary_rates() {
        let none = CommissionRate::ZERO.split(50_000).unwrap();
        assert_eq!(none.commission_cents, 0);
        assert_eq!(none.player_income_cents, 50_000);

        let all = CommissionRate::FULL.split(50_000).unwrap();
        assert_eq!(all.commission_cents, 50_000);
        assert_eq!(all.player_income_cents, 0);
    }

    #[test]
    fn test_large_total_does_not_overflow() {
        let split = CommissionRate::FULL.split(i64::MAX).unwrap();
        assert_eq!(split.commission_cents, i64::MAX);
        assert_eq!(split.player_income_cents, 0);
    }

    #[test]
    fn test_negative_total_rejected() {
        assert!(CommissionRate::FALLBACK.split(-1).is_err());
    }

    #[test]
    fn test_serde_validates() {
        let rate: CommissionRate = serde_json::from_str("20").unwrap();
        assert_eq!(rate, CommissionRate::FALLBACK);
        assert!(serde_json::from_str::<CommissionRate>("150").is_err());
    }
}
