use apiary_agent::AgentHandler;
use apiary_core::{AgentConfig, ApiaryError, ApiaryResult, DomainEvent, TaskContext};
use apiary_pool::{PoolConfig, WarehouseClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

#[derive(Default, Clone)]
struct TaskCounts {
    completed: u64,
    failed: u64,
}

/// Aggregates swarm activity: counts `task.*` events per agent and joins the
/// live counts with warehouse rollups on request.
pub struct AnalystAgent {
    config: AgentConfig,
    warehouse: WarehouseClient,
    observed: Mutex<HashMap<String, TaskCounts>>,
}

impl AnalystAgent {
    /// Default agent id.
    pub const ID: &'static str = "analyst";

    /// Create the analyst with its default configuration and a small
    /// warehouse connection pool.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::new(Self::ID, 4)
                .with_capability("metrics.analyze")
                .with_dependency("orchestrator"),
            warehouse: WarehouseClient::new(PoolConfig {
                min_size: 1,
                max_size: 4,
                acquire_timeout_ms: 2_000,
            }),
            observed: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for AnalystAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentHandler for AnalystAgent {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        input: serde_json::Value,
        _ctx: &TaskContext,
    ) -> ApiaryResult<serde_json::Value> {
        let metric = input
            .get("metric")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ApiaryError::Validation("metrics.analyze requires a 'metric'".to_string())
            })?;

        let rollup = self.warehouse.query_rollup(metric).await?;

        let observed = self.observed.lock().clone();
        let mut per_agent: Vec<serde_json::Value> = observed
            .iter()
            .map(|(agent, counts)| {
                serde_json::json!({
                    "agent": agent,
                    "completed": counts.completed,
                    "failed": counts.failed,
                })
            })
            .collect();
        per_agent.sort_by_key(|v| v["agent"].as_str().map(String::from));

        let totals = observed.values().fold((0u64, 0u64), |acc, counts| {
            (acc.0 + counts.completed, acc.1 + counts.failed)
        });

        info!(metric, agents = per_agent.len(), "Metrics analyzed");
        Ok(serde_json::json!({
            "metric": metric,
            "warehouse": rollup,
            "observed": {
                "completed": totals.0,
                "failed": totals.1,
                "per_agent": per_agent,
            },
        }))
    }

    fn subscribed_events(&self) -> Vec<String> {
        vec!["task.*".to_string()]
    }

    async fn handle_event(&self, event: DomainEvent) -> ApiaryResult<()> {
        let Some(agent) = event.payload.get("agent").and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let mut observed = self.observed.lock();
        let counts = observed.entry(agent.to_string()).or_default();
        match event.event_type.as_str() {
            "task.completed" => counts.completed += 1,
            "task.failed" => counts.failed += 1,
            _ => {}
        }
        Ok(())
    }
}
