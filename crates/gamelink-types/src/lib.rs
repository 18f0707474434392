//! GameLink Types - Canonical types for the commission & settlement engine
//!
//! This crate contains the foundational types shared by the engine, the
//! database layer and the operator service. It has zero dependencies on
//! other gamelink crates and defines:
//!
//! - Identity types (OrderId, PlayerId, GameId, RuleId, ...)
//! - Whole-percent commission rates and `YYYY-MM` settlement months
//! - Commission rules, per-order commission records, monthly settlements
//! - Ranking commission tiers and their config rows
//! - The engine-wide error taxonomy
//!
//! # Money
//!
//! All monetary fields are `i64` minor currency units (cents). Rates are
//! whole percentage points. No floating point is used anywhere in pricing.

pub mod identity;
pub mod rate;
pub mod month;
pub mod commission;
pub mod ranking;
pub mod error;

pub use identity::*;
pub use rate::*;
pub use month::*;
pub use commission::*;
pub use ranking::*;
pub use error::*;
