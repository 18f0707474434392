//! Commission rule administration
//!
//! Invariants enforced here (and, for the default rule, again by the
//! database's partial unique index):
//!
//! - rate in `[0, 100]`, non-empty name
//! - a `default` rule carries no scope
//! - `special` and `gift` rules carry at least one scope field
//! - at most one active default rule

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use gamelink_types::{
    CommissionError, CommissionRate, CommissionRule, GameId, NewCommissionRule, PlayerId, Result, RuleId, RuleScope,
    RuleType,
};

use crate::store::{CommissionStore, Page, PageRequest, RuleFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Whole percentage points, validated into a `CommissionRate`
    pub rate: i64,
    #[serde(default)]
    pub game_id: Option<GameId>,
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    #[serde(default)]
    pub service_type: Option<String>,
}

/// Partial update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rate: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct RuleAdmin {
    store: Arc<dyn CommissionStore>,
}

impl RuleAdmin {
    pub fn new(store: Arc<dyn CommissionStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: CreateRuleRequest) -> Result<CommissionRule> {
        let rate = CommissionRate::new(request.rate)?;
        let name = validate_name(&request.name)?;
        let scope = RuleScope::new(request.game_id, request.player_id, request.service_type);

        if request.rule_type == RuleType::Default {
            if !scope.is_unscoped() {
                return Err(CommissionError::validation("default rule must not be scoped"));
            }
            self.ensure_no_other_default(None).await?;
        } else if scope.is_unscoped() {
            return Err(CommissionError::validation(format!(
                "{} rule needs a game, player or service type scope",
                request.rule_type
            )));
        }

        let rule = self
            .store
            .create_rule(NewCommissionRule {
                name,
                description: request.description,
                rule_type: request.rule_type,
                rate,
                is_active: true,
                scope,
            })
            .await?;

        info!(rule_id = %rule.id, rule_type = %rule.rule_type, rate = %rule.rate, "Commission rule created");
        Ok(rule)
    }

    pub async fn update(&self, id: RuleId, request: UpdateRuleRequest) -> Result<CommissionRule> {
        let mut rule = self.get(id).await?;

        if let Some(name) = request.name {
            rule.name = validate_name(&name)?;
        }
        if let Some(description) = request.description {
            rule.description = description;
        }
        if let Some(rate) = request.rate {
            rule.rate = CommissionRate::new(rate)?;
        }
        if let Some(is_active) = request.is_active {
            if is_active && !rule.is_active && rule.is_default() {
                self.ensure_no_other_default(Some(id)).await?;
            }
            rule.is_active = is_active;
        }

        let updated = self.store.update_rule(&rule).await?;
        info!(rule_id = %id, rate = %updated.rate, active = updated.is_active, "Commission rule updated");
        Ok(updated)
    }

    pub async fn get(&self, id: RuleId) -> Result<CommissionRule> {
        self.store
            .get_rule(id)
            .await?
            .ok_or_else(|| CommissionError::not_found("commission rule", id))
    }

    pub async fn list(&self, filter: &RuleFilter, page: PageRequest) -> Result<Page<CommissionRule>> {
        self.store.list_rules(filter, page).await
    }

    pub async fn delete(&self, id: RuleId) -> Result<()> {
        if !self.store.delete_rule(id).await? {
            return Err(CommissionError::not_found("commission rule", id));
        }
        info!(rule_id = %id, "Commission rule deleted");
        Ok(())
    }

    async fn ensure_no_other_default(&self, except: Option<RuleId>) -> Result<()> {
        match self.store.get_default_rule().await? {
            Some(existing) if Some(existing.id) != except => Err(CommissionError::validation(format!(
                "an active default rule already exists (rule {})",
                existing.id
            ))),
            _ => Ok(()),
        }
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CommissionError::validation("rule name must not be empty"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCommissionStore;

    fn admin() -> RuleAdmin {
        RuleAdmin::new(Arc::new(InMemoryCommissionStore::new()))
    }

    fn request(rule_type: RuleType, rate: i64) -> CreateRuleRequest {
        CreateRuleRequest {
            name: "platform".to_string(),
            description: String::new(),
            rule_type,
            rate,
            game_id: None,
            player_id: None,
            service_type: None,
        }
    }

    fn scoped(rule_type: RuleType, rate: i64) -> CreateRuleRequest {
        CreateRuleRequest {
            player_id: Some(PlayerId(5)),
            ..request(rule_type, rate)
        }
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_rate() {
        let admin = admin();
        assert!(matches!(
            admin.create(scoped(RuleType::Special, 101)).await,
            Err(CommissionError::Validation(_))
        ));
        assert!(matches!(
            admin.create(scoped(RuleType::Special, -1)).await,
            Err(CommissionError::Validation(_))
        ));
        assert!(admin.create(scoped(RuleType::Special, 100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_single_active_default() {
        let admin = admin();
        let first = admin.create(request(RuleType::Default, 20)).await.unwrap();
        assert!(admin.create(request(RuleType::Default, 15)).await.is_err());

        admin
            .update(
                first.id,
                UpdateRuleRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(admin.create(request(RuleType::Default, 15)).await.is_ok());
    }

    #[tokio::test]
    async fn test_scoped_default_rejected() {
        let mut req = request(RuleType::Default, 20);
        req.game_id = Some(GameId(1));
        assert!(admin().create(req).await.is_err());
    }

    #[tokio::test]
    async fn test_unscoped_special_and_gift_rejected() {
        let admin = admin();
        for rule_type in [RuleType::Special, RuleType::Gift] {
            assert!(matches!(
                admin.create(request(rule_type, 10)).await,
                Err(CommissionError::Validation(_))
            ));
        }

        let mut by_service = request(RuleType::Gift, 10);
        by_service.service_type = Some("coaching".to_string());
        assert!(admin.create(by_service).await.is_ok());
        assert!(admin.create(scoped(RuleType::Special, 10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_patches_fields_and_validates() {
        let admin = admin();
        let rule = admin.create(scoped(RuleType::Special, 20)).await.unwrap();

        let updated = admin
            .update(
                rule.id,
                UpdateRuleRequest {
                    rate: Some(12),
                    description: Some("negotiated".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.rate.percent(), 12);
        assert_eq!(updated.name, "platform");
        assert_eq!(updated.description, "negotiated");

        let bad = UpdateRuleRequest {
            rate: Some(150),
            ..Default::default()
        };
        assert!(matches!(admin.update(rule.id, bad).await, Err(CommissionError::Validation(_))));
        assert!(admin.update(RuleId(99), UpdateRuleRequest::default()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_rule() {
        let admin = admin();
        assert!(admin.delete(RuleId(1)).await.unwrap_err().is_not_found());
        let rule = admin.create(scoped(RuleType::Gift, 5)).await.unwrap();
        admin.delete(rule.id).await.unwrap();
        assert!(admin.get(rule.id).await.unwrap_err().is_not_found());
    }
}
