//! Settlement months (`YYYY-MM`)

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CommissionError, Result};

/// A calendar month used to bucket commission records and settlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SettlementMonth {
    year: i32,
    month: u32,
}

impl SettlementMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(CommissionError::validation(format!(
                "invalid settlement month {year:04}-{month:02}"
            )));
        }
        Ok(Self { year, month })
    }

    /// Month containing the given instant (UTC)
    pub fn of(instant: DateTime<Utc>) -> Self {
        Self {
            year: instant.year(),
            month: instant.month(),
        }
    }

    /// Current UTC month
    pub fn current() -> Self {
        Self::of(Utc::now())
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The month before this one
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// The month after this one
    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for SettlementMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for SettlementMonth {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CommissionError::validation(format!("month must be formatted YYYY-MM, got {s:?}"));

        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for SettlementMonth {
    type Error = CommissionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SettlementMonth> for String {
    fn from(month: SettlementMonth) -> Self {
        month.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_and_display() {
        let month: SettlementMonth = "2024-11".parse().unwrap();
        assert_eq!(month.year(), 2024);
        assert_eq!(month.month(), 11);
        assert_eq!(month.to_string(), "2024-11");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["2024-13", "2024-00", "2024-1", "24-11", "2024/11", "2024-1a", "", "2024-11-01"] {
            assert!(bad.parse::<SettlementMonth>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_previous_and_next_wrap_years() {
        let jan: SettlementMonth = "2025-01".parse().unwrap();
        assert_eq!(jan.previous().to_string(), "2024-12");
        assert_eq!(jan.previous().next(), jan);
    }

    #[test]
    fn test_of_instant() {
        let instant = Utc.with_ymd_and_hms(2024, 11, 30, 23, 59, 59).unwrap();
        assert_eq!(SettlementMonth::of(instant).to_string(), "2024-11");
    }

    #[test]
    fn test_serde_as_string() {
        let month: SettlementMonth = serde_json::from_str("\"2024-11\"").unwrap();
        assert_eq!(serde_json::to_string(&month).unwrap(), "\"2024-11\"");
        assert!(serde_json::from_str::<SettlementMonth>("\"nope\"").is_err());
    }
}
