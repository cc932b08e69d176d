use apiary_agent::AgentHandler;
use apiary_core::{AgentConfig, ApiaryError, ApiaryResult, TaskContext};
use async_trait::async_trait;
use tracing::info;

/// Splits a campaign budget across channels with an objective-driven
/// heuristic.
pub struct CampaignPlannerAgent {
    config: AgentConfig,
}

impl CampaignPlannerAgent {
    /// Default agent id.
    pub const ID: &'static str = "campaign-planner";

    /// Create the planner with its default configuration.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::new(Self::ID, 2)
                .with_capability("campaign.plan")
                .with_dependency("orchestrator"),
        }
    }
}

impl Default for CampaignPlannerAgent {
    fn default() -> Self {
        Self::new()
    }
}

// Channel weights per objective. Search converts, social reaches.
fn channel_weights(objective: &str) -> &'static [(&'static str, u32)] {
    match objective {
        "conversion" => &[("search", 50), ("social", 20), ("display", 15), ("email", 15)],
        "awareness" => &[("social", 40), ("display", 30), ("video", 20), ("search", 10)],
        _ => &[("search", 30), ("social", 30), ("display", 20), ("email", 20)],
    }
}

#[async_trait]
impl AgentHandler for CampaignPlannerAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        input: serde_json::Value,
        _ctx: &TaskContext,
    ) -> ApiaryResult<serde_json::Value> {
        let budget_cents = input
            .get("budget_cents")
            .and_then(|v| v.as_u64())
            .filter(|b| *b > 0)
            .ok_or_else(|| {
                ApiaryError::Validation("campaign.plan requires a positive 'budget_cents'".to_string())
            })?;
        let objective = input
            .get("objective")
            .and_then(|v| v.as_str())
            .unwrap_or("balanced");

        let weights = channel_weights(objective);
        let total_weight: u32 = weights.iter().map(|(_, w)| w).sum();

        let mut allocations = Vec::with_capacity(weights.len());
        let mut allocated = 0u64;
        for (i, (channel, weight)) in weights.iter().enumerate() {
            // The last channel absorbs the rounding remainder.
            let amount = if i == weights.len() - 1 {
                budget_cents - allocated
            } else {
                budget_cents * u64::from(*weight) / u64::from(total_weight)
            };
            allocated += amount;
            allocations.push(serde_json::json!({
                "channel": channel,
                "budget_cents": amount,
                "weight": weight,
            }));
        }

        info!(objective, budget_cents, channels = allocations.len(), "Campaign planned");
        Ok(serde_json::json!({
            "objective": objective,
            "budget_cents": budget_cents,
            "allocations": allocations,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocations_sum_to_budget() {
        let planner = CampaignPlannerAgent::new();
        let plan = planner
            .process(
                serde_json::json!({"budget_cents": 99_999, "objective": "conversion"}),
                &TaskContext::new(),
            )
            .await
            .unwrap();

        let total: u64 = plan["allocations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["budget_cents"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 99_999);
    }

    #[tokio::test]
    async fn test_conversion_objective_prefers_search() {
        let planner = CampaignPlannerAgent::new();
        let plan = planner
            .process(
                serde_json::json!({"budget_cents": 100_000, "objective": "conversion"}),
                &TaskContext::new(),
            )
            .await
            .unwrap();

        let first = &plan["allocations"][0];
        assert_eq!(first["channel"], "search");
        assert_eq!(first["budget_cents"], 50_000);
    }

    #[tokio::test]
    async fn test_missing_budget_is_validation_error() {
        let planner = CampaignPlannerAgent::new();
        let result = planner
            .process(serde_json::json!({"objective": "awareness"}), &TaskContext::new())
            .await;
        assert!(matches!(result, Err(ApiaryError::Validation(_))));

        let zero = planner
            .process(serde_json::json!({"budget_cents": 0}), &TaskContext::new())
            .await;
        assert!(matches!(zero, Err(ApiaryError::Validation(_))));
    }
}
