use apiary_agent::AgentHandler;
use apiary_core::{AgentConfig, ApiaryError, ApiaryResult, TaskContext};
use async_trait::async_trait;
use tracing::info;

/// Monte Carlo campaign-outcome simulation with a seeded generator, so the
/// same request always produces the same distribution.
pub struct SimulatorAgent {
    config: AgentConfig,
}

impl SimulatorAgent {
    /// Default agent id.
    pub const ID: &'static str = "simulator";

    /// Create the simulator with its default configuration.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::new(Self::ID, 3)
                .with_capability("campaign.simulate")
                .with_max_concurrency(2)
                .with_dependency("campaign-planner"),
        }
    }
}

impl Default for SimulatorAgent {
    fn default() -> Self {
        Self::new()
    }
}

// xorshift64: deterministic, dependency-free.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in [0, 1).
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[async_trait]
impl AgentHandler for SimulatorAgent {
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
                ApiaryError::Validation(
                    "campaign.simulate requires a positive 'budget_cents'".to_string(),
                )
            })?;
        let cpc_cents = input.get("cpc_cents").and_then(|v| v.as_u64()).unwrap_or(150);
        let conversion_rate = input
            .get("conversion_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.03);
        if !(0.0..=1.0).contains(&conversion_rate) {
            return Err(ApiaryError::Validation(
                "'conversion_rate' must be within [0, 1]".to_string(),
            ));
        }
        let iterations = input
            .get("iterations")
            .and_then(|v| v.as_u64())
            .unwrap_or(1_000)
            .clamp(1, 100_000);
        let seed = input.get("seed").and_then(|v| v.as_u64()).unwrap_or(42);

        let mut rng = Rng::new(seed);
        let expected_clicks = budget_cents as f64 / cpc_cents.max(1) as f64;

        let mut outcomes: Vec<f64> = (0..iterations)
            .map(|_| {
                // Jitter clicks +/-20% and the conversion rate +/-30%.
                let clicks = expected_clicks * (0.8 + 0.4 * rng.next_f64());
                let rate = conversion_rate * (0.7 + 0.6 * rng.next_f64());
                clicks * rate
            })
            .collect();
        outcomes.sort_by(|a, b| a.total_cmp(b));

        let mean = outcomes.iter().sum::<f64>() / outcomes.len() as f64;
        let p10 = outcomes[(outcomes.len() - 1) * 10 / 100];
        let p90 = outcomes[(outcomes.len() - 1) * 90 / 100];
        let cpa_cents = if mean > 0.0 {
            budget_cents as f64 / mean
        } else {
            0.0
        };

        info!(iterations, mean_conversions = mean, "Simulation finished");
        Ok(serde_json::json!({
            "iterations": iterations,
            "expected_clicks": expected_clicks,
            "conversions": { "mean": mean, "p10": p10, "p90": p90 },
            "cpa_cents": cpa_cents,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_distribution() {
        let simulator = SimulatorAgent::new();
        let request = serde_json::json!({
            "budget_cents": 100_000,
            "cpc_cents": 200,
            "conversion_rate": 0.05,
            "iterations": 500,
            "seed": 7,
        });

        let first = simulator.process(request.clone(), &TaskContext::new()).await.unwrap();
        let second = simulator.process(request, &TaskContext::new()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_distribution_is_ordered_and_plausible() {
        let simulator = SimulatorAgent::new();
        let output = simulator
            .process(
                serde_json::json!({"budget_cents": 100_000, "seed": 3}),
                &TaskContext::new(),
            )
            .await
            .unwrap();

        let mean = output["conversions"]["mean"].as_f64().unwrap();
        let p10 = output["conversions"]["p10"].as_f64().unwrap();
        let p90 = output["conversions"]["p90"].as_f64().unwrap();
        assert!(p10 <= mean && mean <= p90);
        assert!(mean > 0.0);
    }

    #[tokio::test]
    async fn test_invalid_conversion_rate_rejected() {
        let simulator = SimulatorAgent::new();
        let result = simulator
            .process(
                serde_json::json!({"budget_cents": 1_000, "conversion_rate": 1.5}),
                &TaskContext::new(),
            )
            .await;
        assert!(matches!(result, Err(ApiaryError::Validation(_))));
    }
}
