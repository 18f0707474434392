//! Ranking commission tiers: parsing, validation and lookup, plus the
//! admin surface for the config rows that hold them

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use gamelink_types::{
    AppliedRate, CommissionError, CommissionRate, NewRankingCommissionConfig, RankingCommissionConfig,
    RankingCommissionRule, RankingConfigId, RankingType, Result, SettlementMonth,
};

use crate::store::{Page, PageRequest, RankingConfigFilter, RankingConfigStore};

/// Period label stored on configs
pub const MONTHLY_PERIOD: &str = "monthly";

/// Decode a JSON tier array
pub fn parse_tiers(rules_json: &str) -> Result<Vec<RankingCommissionRule>> {
    serde_json::from_str(rules_json)
        .map_err(|e| CommissionError::validation(format!("invalid ranking tier JSON: {e}")))
}

/// Closed ranges `[a_start, a_end]` and `[b_start, b_end]` share a rank
pub fn ranges_overlap(a_start: i32, a_end: i32, b_start: i32, b_end: i32) -> bool {
    a_start <= b_end && b_start <= a_end
}

pub fn validate_tiers(tiers: &[RankingCommissionRule]) -> Result<()> {
    for tier in tiers {
        if tier.rank_start < 1 {
            return Err(CommissionError::validation(format!(
                "rank start must be at least 1, got {}",
                tier.rank_start
            )));
        }
        if tier.rank_end < tier.rank_start {
            return Err(CommissionError::validation(format!(
                "rank end {} is before rank start {}",
                tier.rank_end, tier.rank_start
            )));
        }
        if !(0..=100).contains(&tier.commission_rate) {
            return Err(CommissionError::validation(format!(
                "tier commission rate must be between 0 and 100, got {}",
                tier.commission_rate
            )));
        }
    }

    for (i, a) in tiers.iter().enumerate() {
        for b in &tiers[i + 1..] {
            if ranges_overlap(a.rank_start, a.rank_end, b.rank_start, b.rank_end) {
                return Err(CommissionError::validation(format!(
                    "rank ranges {}-{} and {}-{} overlap",
                    a.rank_start, a.rank_end, b.rank_start, b.rank_end
                )));
            }
        }
    }
    Ok(())
}

/// Parse and validate in one step
pub fn parse_and_validate(rules_json: &str) -> Result<Vec<RankingCommissionRule>> {
    let tiers = parse_tiers(rules_json)?;
    validate_tiers(&tiers)?;
    Ok(tiers)
}

/// Rate of the first tier containing `rank`, or 0 when none does
pub fn find_rate_for_rank(tiers: &[RankingCommissionRule], rank: i32) -> i32 {
    tiers
        .iter()
        .find(|t| t.contains(rank))
        .map_or(0, |t| t.commission_rate)
}

/// The config's tier rate for `rank` as a rate candidate.
///
/// `None` when the rank is outside every tier. Inactive configs never apply.
pub fn ranking_rate_for(config: &RankingCommissionConfig, rank: i32) -> Result<Option<AppliedRate>> {
    if !config.is_active {
        return Ok(None);
    }
    let tiers = parse_and_validate(&config.rules_json)?;
    let Some(tier) = tiers.iter().find(|t| t.contains(rank)) else {
        return Ok(None);
    };

    Ok(Some(AppliedRate::candidate(
        "ranking",
        CommissionRate::new(tier.commission_rate as i64)?,
        format!("{} rank {}", config.name, rank),
    )))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRankingConfigRequest {
    pub name: String,
    pub ranking_type: RankingType,
    pub month: SettlementMonth,
    pub rules_json: String,
    #[serde(default)]
    pub description: String,
}

/// Partial update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRankingConfigRequest {
    pub name: Option<String>,
    pub rules_json: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

/// Create, update and look up ranking commission configs.
///
/// Tier JSON is parsed and validated before anything is written.
#[derive(Clone)]
pub struct RankingConfigAdmin {
    store: Arc<dyn RankingConfigStore>,
}

impl RankingConfigAdmin {
    pub fn new(store: Arc<dyn RankingConfigStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, request: CreateRankingConfigRequest) -> Result<RankingCommissionConfig> {
        if request.name.trim().is_empty() {
            return Err(CommissionError::validation("ranking config name must not be empty"));
        }
        parse_and_validate(&request.rules_json)?;

        let config = self
            .store
            .create_config(NewRankingCommissionConfig {
                name: request.name.trim().to_string(),
                ranking_type: request.ranking_type,
                period: MONTHLY_PERIOD.to_string(),
                month: request.month,
                rules_json: request.rules_json,
                description: request.description,
                is_active: true,
            })
            .await?;

        info!(
            config_id = %config.id,
            ranking_type = %config.ranking_type,
            month = %config.month,
            "Ranking commission config created"
        );
        Ok(config)
    }

    pub async fn update(
        &self,
        id: RankingConfigId,
        request: UpdateRankingConfigRequest,
    ) -> Result<RankingCommissionConfig> {
        let mut config = self.get(id).await?;

        if let Some(name) = request.name {
            if name.trim().is_empty() {
                return Err(CommissionError::validation("ranking config name must not be empty"));
            }
            config.name = name.trim().to_string();
        }
        if let Some(rules_json) = request.rules_json {
            parse_and_validate(&rules_json)?;
            config.rules_json = rules_json;
        }
        if let Some(description) = request.description {
            config.description = description;
        }
        if let Some(is_active) = request.is_active {
            config.is_active = is_active;
        }

        self.store.update_config(&config).await
    }

    pub async fn get(&self, id: RankingConfigId) -> Result<RankingCommissionConfig> {
        self.store
            .get_config(id)
            .await?
            .ok_or_else(|| CommissionError::not_found("ranking commission config", id))
    }

    pub async fn active_for_month(
        &self,
        ranking_type: RankingType,
        month: SettlementMonth,
    ) -> Result<Option<RankingCommissionConfig>> {
        self.store.active_config_for_month(ranking_type, month).await
    }

    pub async fn list(
        &self,
        filter: &RankingConfigFilter,
        page: PageRequest,
    ) -> Result<Page<RankingCommissionConfig>> {
        self.store.list_configs(filter, page).await
    }

    pub async fn delete(&self, id: RankingConfigId) -> Result<()> {
        if !self.store.delete_config(id).await? {
            return Err(CommissionError::not_found("ranking commission config", id));
        }
        Ok(())
    }

    /// Rate candidate for a worker holding `rank` on the month's active
    /// leaderboard of `ranking_type`
    pub async fn rate_for_rank(
        &self,
        ranking_type: RankingType,
        month: SettlementMonth,
        rank: i32,
    ) -> Result<Option<AppliedRate>> {
        match self.active_for_month(ranking_type, month).await? {
            Some(config) => ranking_rate_for(&config, rank),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRankingConfigs;
    use chrono::Utc;

    fn tiers() -> Vec<RankingCommissionRule> {
        vec![
            RankingCommissionRule::new(1, 3, 10),
            RankingCommissionRule::new(4, 10, 15),
            RankingCommissionRule::new(11, 20, 18),
        ]
    }

    #[test]
    fn test_find_rate_for_rank() {
        let tiers = tiers();
        assert_eq!(find_rate_for_rank(&tiers, 1), 10);
        assert_eq!(find_rate_for_rank(&tiers, 5), 15);
        assert_eq!(find_rate_for_rank(&tiers, 15), 18);
        assert_eq!(find_rate_for_rank(&tiers, 100), 0);
        assert_eq!(find_rate_for_rank(&[], 1), 0);
    }

    #[test]
    fn test_validate_rejects_bad_tiers() {
        assert!(validate_tiers(&tiers()).is_ok());
        assert!(validate_tiers(&[]).is_ok());

        let overlap = [RankingCommissionRule::new(1, 5, 20), RankingCommissionRule::new(5, 10, 15)];
        assert!(validate_tiers(&overlap).is_err());
        assert!(validate_tiers(&[RankingCommissionRule::new(0, 3, 10)]).is_err());
        assert!(validate_tiers(&[RankingCommissionRule::new(1, 3, 150)]).is_err());
        assert!(validate_tiers(&[RankingCommissionRule::new(1, 3, -1)]).is_err());
        assert!(validate_tiers(&[RankingCommissionRule::new(5, 4, 10)]).is_err());
    }

    #[test]
    fn test_ranges_overlap() {
        assert!(ranges_overlap(1, 5, 5, 10));
        assert!(ranges_overlap(4, 6, 1, 10));
        assert!(!ranges_overlap(1, 3, 4, 10));
    }

    #[test]
    fn test_parse_tiers() {
        let parsed = parse_tiers(r#"[{"rankStart":1,"rankEnd":3,"commissionRate":10}]"#).unwrap();
        assert_eq!(parsed, vec![RankingCommissionRule::new(1, 3, 10)]);

        let err = parse_tiers("[{rankStart:1").unwrap_err();
        assert!(matches!(err, CommissionError::Validation(_)));
    }

    #[test]
    fn test_ranking_rate_for_config() {
        let now = Utc::now();
        let mut config = RankingCommissionConfig {
            id: RankingConfigId(1),
            name: "November income".to_string(),
            ranking_type: RankingType::Income,
            period: "monthly".to_string(),
            month: "2024-11".parse().unwrap(),
            rules_json: serde_json::to_string(&tiers()).unwrap(),
            description: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let applied = ranking_rate_for(&config, 5).unwrap().unwrap();
        assert_eq!(applied.rate.percent(), 15);
        assert_eq!(applied.detail, "November income rank 5");
        assert!(ranking_rate_for(&config, 100).unwrap().is_none());

        config.is_active = false;
        assert!(ranking_rate_for(&config, 5).unwrap().is_none());
    }

    fn create_request(rules_json: &str) -> CreateRankingConfigRequest {
        CreateRankingConfigRequest {
            name: "November income".to_string(),
            ranking_type: RankingType::Income,
            month: "2024-11".parse().unwrap(),
            rules_json: rules_json.to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_admin_validates_tiers_before_writing() {
        let admin = RankingConfigAdmin::new(Arc::new(InMemoryRankingConfigs::new()));
        let overlapping = r#"[{"rankStart":1,"rankEnd":5,"commissionRate":20},{"rankStart":5,"rankEnd":10,"commissionRate":15}]"#;

        assert!(admin.create(create_request(overlapping)).await.is_err());
        assert!(admin.create(create_request("not json")).await.is_err());
        let page = admin.list(&RankingConfigFilter::default(), PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 0);

        let tiers_json = serde_json::to_string(&tiers()).unwrap();
        let config = admin.create(create_request(&tiers_json)).await.unwrap();
        assert_eq!(config.period, MONTHLY_PERIOD);

        let bad_update = UpdateRankingConfigRequest {
            rules_json: Some(r#"[{"rankStart":0,"rankEnd":3,"commissionRate":10}]"#.to_string()),
            ..Default::default()
        };
        assert!(admin.update(config.id, bad_update).await.is_err());
        assert_eq!(admin.get(config.id).await.unwrap().rules_json, tiers_json);
    }

    #[tokio::test]
    async fn test_admin_rate_for_rank_uses_active_config() {
        let admin = RankingConfigAdmin::new(Arc::new(InMemoryRankingConfigs::new()));
        let month: SettlementMonth = "2024-11".parse().unwrap();
        let config = admin
            .create(create_request(&serde_json::to_string(&tiers()).unwrap()))
            .await
            .unwrap();

        let applied = admin.rate_for_rank(RankingType::Income, month, 2).await.unwrap().unwrap();
        assert_eq!(applied.rate.percent(), 10);
        assert!(admin
            .rate_for_rank(RankingType::OrderCount, month, 2)
            .await
            .unwrap()
            .is_none());

        admin.delete(config.id).await.unwrap();
        assert!(admin.rate_for_rank(RankingType::Income, month, 2).await.unwrap().is_none());
        assert!(admin.delete(config.id).await.unwrap_err().is_not_found());
    }
}
