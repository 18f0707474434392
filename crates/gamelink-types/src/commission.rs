//! Commission rules, per-order records and monthly settlements
//!
//! Lifecycle summary:
//!
//! ```text
//! CommissionRule     created/updated by admins, read on every calculation
//! CommissionRecord   created once per order (pending) -> settled by the aggregator
//! MonthlySettlement  created once per (player, month) by the aggregator
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{
    CommissionError, CommissionRate, GameId, OrderId, PlayerId, RecordId, Result, RuleId,
    SettlementId, SettlementMonth,
};

// ============================================================================
// Rules
// ============================================================================

/// Kind of commission rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// The platform-wide rule (unscoped)
    Default,
    /// A negotiated rule for a game, player or service type
    Special,
    /// Rule applied to gift orders
    Gift,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Special => "special",
            Self::Gift => "gift",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" => Ok(Self::Default),
            "special" => Ok(Self::Special),
            "gift" => Ok(Self::Gift),
            other => Err(CommissionError::validation(format!("unknown rule type {other:?}"))),
        }
    }
}

/// Optional scoping of a rule (or of a lookup)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleScope {
    pub game_id: Option<GameId>,
    pub player_id: Option<PlayerId>,
    pub service_type: Option<String>,
}

impl RuleScope {
    pub fn new(game_id: Option<GameId>, player_id: Option<PlayerId>, service_type: Option<String>) -> Self {
        Self {
            game_id,
            player_id,
            service_type,
        }
    }

    pub fn is_unscoped(&self) -> bool {
        self.game_id.is_none() && self.player_id.is_none() && self.service_type.is_none()
    }

    /// Whether a rule with this scope applies to `query`.
    ///
    /// Every dimension the rule sets must equal the query's value; an
    /// unscoped rule never matches here (it is only reachable as the default).
    pub fn applies_to(&self, query: &RuleScope) -> bool {
        if self.is_unscoped() {
            return false;
        }
        let dim = |rule: Option<&str>, q: Option<&str>| rule.map_or(true, |r| q == Some(r));
        self.game_id.map_or(true, |g| query.game_id == Some(g))
            && self.player_id.map_or(true, |p| query.player_id == Some(p))
            && dim(self.service_type.as_deref(), query.service_type.as_deref())
    }

    /// Precedence key: player beats game beats service type
    pub fn specificity(&self) -> (bool, bool, bool) {
        (
            self.player_id.is_some(),
            self.game_id.is_some(),
            self.service_type.is_some(),
        )
    }
}

/// A revenue-share policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRule {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub rate: CommissionRate,
    pub is_active: bool,
    #[serde(flatten)]
    pub scope: RuleScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommissionRule {
    /// The platform default: a `default`-type rule with no scoping
    pub fn is_default(&self) -> bool {
        self.rule_type == RuleType::Default && self.scope.is_unscoped()
    }
}

/// Insert shape for a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommissionRule {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub rate: CommissionRate,
    pub is_active: bool,
    #[serde(flatten)]
    pub scope: RuleScope,
}

// ============================================================================
// Orders (collaborator view)
// ============================================================================

/// The slice of an order the engine needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub game_id: Option<GameId>,
    pub player_id: Option<PlayerId>,
    pub total_amount_cents: i64,
}

impl Order {
    /// Assigned worker; a zero id is treated as unassigned
    pub fn assigned_player(&self) -> Option<PlayerId> {
        self.player_id.filter(|p| p.get() != 0)
    }

    /// Lookup scope for rate resolution (service type is not threaded through)
    pub fn rule_scope(&self) -> RuleScope {
        RuleScope::new(self.game_id, self.assigned_player(), None)
    }
}

// ============================================================================
// Rate resolution results
// ============================================================================

/// Where an applied rate came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateSource {
    /// A rule scoped to the order's game/player/service type
    ScopedRule { rule_id: RuleId },
    /// The platform default rule
    DefaultRule { rule_id: RuleId },
    /// A caller-supplied candidate (service item, ranking discount, ...)
    Candidate { name: String },
    /// Hardcoded last resort; signals misconfiguration
    Fallback,
}

/// A resolved rate tagged with its origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRate {
    pub rate: CommissionRate,
    pub source: RateSource,
    pub detail: String,
}

impl AppliedRate {
    pub fn from_rule(rule: &CommissionRule) -> Self {
        let source = if rule.is_default() {
            RateSource::DefaultRule { rule_id: rule.id }
        } else {
            RateSource::ScopedRule { rule_id: rule.id }
        };
        Self {
            rate: rule.rate,
            source,
            detail: rule.name.clone(),
        }
    }

    pub fn candidate(name: impl Into<String>, rate: CommissionRate, detail: impl Into<String>) -> Self {
        Self {
            rate,
            source: RateSource::Candidate { name: name.into() },
            detail: detail.into(),
        }
    }

    pub fn fallback() -> Self {
        Self {
            rate: CommissionRate::FALLBACK,
            source: RateSource::Fallback,
            detail: format!("platform fallback {} commission", CommissionRate::FALLBACK),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == RateSource::Fallback
    }
}

/// Outcome of pricing one order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionCalculation {
    pub order_id: OrderId,
    pub total_amount_cents: i64,
    pub commission_rate: CommissionRate,
    pub commission_cents: i64,
    pub player_income_cents: i64,
    pub applied: AppliedRate,
    /// Every candidate considered (only populated by the lowest-rate strategy)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<AppliedRate>,
}

// ============================================================================
// Records
// ============================================================================

/// Settlement state of a commission record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Settled,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "settled" => Ok(Self::Settled),
            other => Err(CommissionError::validation(format!("unknown settlement status {other:?}"))),
        }
    }
}

/// Persisted commission outcome for exactly one order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionRecord {
    pub id: RecordId,
    pub order_id: OrderId,
    pub player_id: PlayerId,
    pub total_amount_cents: i64,
    pub commission_rate: CommissionRate,
    pub commission_cents: i64,
    pub player_income_cents: i64,
    pub settlement_status: SettlementStatus,
    pub settlement_month: SettlementMonth,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a record (always created pending)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommissionRecord {
    pub order_id: OrderId,
    pub player_id: PlayerId,
    pub total_amount_cents: i64,
    pub commission_rate: CommissionRate,
    pub commission_cents: i64,
    pub player_income_cents: i64,
    pub settlement_month: SettlementMonth,
}

// ============================================================================
// Monthly settlements
// ============================================================================

/// Payout state of a monthly settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthlySettlementStatus {
    Pending,
    Confirmed,
    Paid,
}

impl MonthlySettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Paid => "paid",
        }
    }
}

impl FromStr for MonthlySettlementStatus {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "paid" => Ok(Self::Paid),
            other => Err(CommissionError::validation(format!("unknown settlement status {other:?}"))),
        }
    }
}

/// One worker's rollup for one month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySettlement {
    pub id: SettlementId,
    pub player_id: PlayerId,
    pub settlement_month: SettlementMonth,
    pub total_order_count: i64,
    pub total_amount_cents: i64,
    pub total_commission_cents: i64,
    pub total_income_cents: i64,
    pub bonus_cents: i64,
    pub final_income_cents: i64,
    pub status: MonthlySettlementStatus,
    pub income_rank: Option<i32>,
    pub order_rank: Option<i32>,
    pub quality_rank: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Insert shape for a settlement produced by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMonthlySettlement {
    pub player_id: PlayerId,
    pub settlement_month: SettlementMonth,
    pub total_order_count: i64,
    pub total_amount_cents: i64,
    pub total_commission_cents: i64,
    pub total_income_cents: i64,
}

/// Bonus and ranking fields written by the external ranking process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBonus {
    pub bonus_cents: i64,
    pub income_rank: Option<i32>,
    pub order_rank: Option<i32>,
    pub quality_rank: Option<i32>,
}
