//! Rate resolution
//!
//! Two strategies are exposed and must be chosen explicitly:
//!
//! - [`RateStrategy::MostSpecific`]: the order-scoped path. Scoped rule,
//!   then the default rule, then the hardcoded fallback.
//! - [`RateStrategy::LowestCandidate`]: takes the lowest rate among the
//!   caller's candidates and the scoped rule (promotional and gift flows).
//!
//! Every resolved rate carries its [`RateSource`]. A `Fallback` result
//! means no default rule is configured and is logged and counted.

use std::sync::Arc;

use tracing::{debug, warn};

use gamelink_types::{AppliedRate, Result, RuleScope};

use crate::store::CommissionStore;

/// Counter incremented whenever the hardcoded fallback rate is applied
pub const FALLBACK_COUNTER: &str = "commission_rate_fallback_total";

/// How a rate is chosen for an order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RateStrategy {
    /// Most specific scoped rule, else default rule, else fallback
    #[default]
    MostSpecific,
    /// Lowest rate among these candidates plus the scoped rule (if any);
    /// with no candidates at all, the default rule, else fallback
    LowestCandidate(Vec<AppliedRate>),
}

/// Lowest rate among `candidates`, first one wins on ties.
///
/// An empty slice yields the fallback rate.
pub fn select_lowest_rate(candidates: &[AppliedRate]) -> AppliedRate {
    let mut iter = candidates.iter();
    let Some(first) = iter.next() else {
        return AppliedRate::fallback();
    };
    iter.fold(first, |lowest, c| if c.rate < lowest.rate { c } else { lowest })
        .clone()
}

/// Resolves the commission rate for a lookup scope
#[derive(Clone)]
pub struct RateResolver {
    store: Arc<dyn CommissionStore>,
}

impl RateResolver {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self { store }
    }

    /// Order-scoped resolution (scoped rule, default rule, fallback)
    pub async fn resolve(&self, scope: &RuleScope) -> Result<AppliedRate> {
        if let Some(rule) = self.store.find_scoped_rule(scope).await? {
            debug!(rule_id = %rule.id, rate = %rule.rate, "Resolved scoped commission rule");
            return Ok(AppliedRate::from_rule(&rule));
        }
        self.default_or_fallback().await
    }

    /// Resolve with an explicit strategy.
    ///
    /// Returns the applied rate and, for `LowestCandidate`, every candidate
    /// that was considered.
    pub async fn resolve_with(
        &self,
        strategy: &RateStrategy,
        scope: &RuleScope,
    ) -> Result<(AppliedRate, Vec<AppliedRate>)> {
        match strategy {
            RateStrategy::MostSpecific => Ok((self.resolve(scope).await?, Vec::new())),
            RateStrategy::LowestCandidate(extra) => {
                let mut candidates = extra.clone();
                if let Some(rule) = self.store.find_scoped_rule(scope).await? {
                    candidates.push(AppliedRate::from_rule(&rule));
                }
                if candidates.is_empty() {
                    candidates.push(self.default_or_fallback().await?);
                }

                let applied = select_lowest_rate(&candidates);
                debug!(
                    rate = %applied.rate,
                    candidates = candidates.len(),
                    "Selected lowest commission candidate"
                );
                Ok((applied, candidates))
            }
        }
    }

    async fn default_or_fallback(&self) -> Result<AppliedRate> {
        if let Some(rule) = self.store.get_default_rule().await? {
            return Ok(AppliedRate::from_rule(&rule));
        }

        warn!(
            rate = %gamelink_types::CommissionRate::FALLBACK,
            "No default commission rule configured, applying fallback rate"
        );
        metrics::counter!(FALLBACK_COUNTER).increment(1);
        Ok(AppliedRate::fallback())
    }
}
