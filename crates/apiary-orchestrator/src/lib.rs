//! Scoring-based task routing, advisory load balancing, and health
//! classification.
//!
//! The [`Orchestrator`] never moves tasks itself: it reads the state other
//! agents publish to the shared registry and answers three questions —
//! which agent should take a task, which agents are over/under-loaded, and
//! how healthy each agent looks right now. It is itself an agent (tier 1,
//! capability `orchestrate`), so it lives in the swarm like any other worker
//! and answers the same questions as `route`/`balance`/`health` tasks.

use apiary_agent::AgentHandler;
use apiary_core::{
    AgentConfig, AgentState, AgentStatus, ApiaryError, ApiaryResult, TaskContext, TaskPriority,
};
use apiary_state::StateManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Health classification of one agent, derived statelessly from its
/// published state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    /// Registered, responsive, good metrics.
    Healthy,
    /// Operational but with a low success rate or deep queue.
    Degraded,
    /// Unregistered, offline, or in error.
    Unhealthy,
}

/// Advisory load-balance report. Never moves tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    /// Mean queue depth across considered agents.
    pub mean_depth: f64,
    /// Agents with queue depth above 1.5x the mean.
    pub overloaded: Vec<String>,
    /// Agents with queue depth below 0.5x the mean (only when mean > 1).
    pub underutilized: Vec<String>,
}

/// The routing and health agent.
pub struct Orchestrator {
    config: AgentConfig,
    state: Arc<StateManager>,
}

impl Orchestrator {
    /// Default agent id.
    pub const ID: &'static str = "orchestrator";

    /// Create the orchestrator over the shared registry.
    pub fn new(state: Arc<StateManager>) -> Self {
        Self {
            config: AgentConfig::new(Self::ID, 1)
                .with_capability("orchestrate")
                .with_max_concurrency(8),
            state,
        }
    }

    /// Pick the best agent for a task.
    ///
    /// Candidates must hold every required capability and must not be
    /// offline or in error. Fails with a `Routing` error when no candidate
    /// remains. Ties break deterministically: candidates are considered in
    /// id order and only a strictly higher score displaces the leader.
    pub fn route_task(
        &self,
        task_type: &str,
        priority: TaskPriority,
        capabilities: &[String],
    ) -> ApiaryResult<String> {
        // An empty capability list means "route by task type".
        let type_capability = [task_type.to_string()];
        let required: &[String] = if capabilities.is_empty() {
            &type_capability
        } else {
            capabilities
        };

        // Candidate ids come from the capability index, already in stable
        // sorted order; intersect across all required capabilities.
        let mut candidates = self.state.agents_with_capability(&required[0]);
        for capability in &required[1..] {
            let holders = self.state.agents_with_capability(capability);
            candidates.retain(|id| holders.contains(id));
        }

        let mut best: Option<(String, i64)> = None;
        for id in candidates {
            let Some(state) = self.state.get_agent(&id) else {
                continue;
            };
            if matches!(state.status, AgentStatus::Offline | AgentStatus::Error) {
                continue;
            }
            let Some(config) = self.state.agent_config(&id) else {
                continue;
            };
            let score = score_candidate(&config, &state, priority);
            debug!(agent = %id, score, task_type, "Routing candidate scored");
            match &best {
                Some((_, best_score)) if score <= *best_score => {}
                _ => best = Some((id, score)),
            }
        }

        best.map(|(id, _)| id).ok_or_else(|| {
            ApiaryError::Routing(format!(
                "no available agent for task type '{task_type}' (capabilities: {required:?})"
            ))
        })
    }

    /// Flag agents whose queue depth deviates from the mean. Advisory only.
    pub fn balance_load(&self) -> LoadReport {
        let agents = self.state.list_agents();
        if agents.is_empty() {
            return LoadReport {
                mean_depth: 0.0,
                overloaded: Vec::new(),
                underutilized: Vec::new(),
            };
        }

        let total: usize = agents.iter().map(|a| a.metrics.queue_depth).sum();
        let mean = total as f64 / agents.len() as f64;

        let overloaded = agents
            .iter()
            .filter(|a| (a.metrics.queue_depth as f64) > 1.5 * mean)
            .map(|a| a.id.clone())
            .collect();
        let underutilized = if mean > 1.0 {
            agents
                .iter()
                .filter(|a| (a.metrics.queue_depth as f64) < 0.5 * mean)
                .map(|a| a.id.clone())
                .collect()
        } else {
            Vec::new()
        };

        LoadReport {
            mean_depth: mean,
            overloaded,
            underutilized,
        }
    }

    /// Classify one agent from its published state.
    pub fn health_check(&self, id: &str) -> AgentHealth {
        match self.state.get_agent(id) {
            None => AgentHealth::Unhealthy,
            Some(state) => classify(&state),
        }
    }

    /// Classify every registered agent, in id order.
    pub fn health_report(&self) -> Vec<(String, AgentHealth)> {
        self.state
            .list_agents()
            .iter()
            .map(|state| (state.id.clone(), classify(state)))
            .collect()
    }
}

fn classify(state: &AgentState) -> AgentHealth {
    match state.status {
        AgentStatus::Offline | AgentStatus::Error => AgentHealth::Unhealthy,
        _ if state.metrics.success_rate < 0.9 || state.metrics.queue_depth > 10 => {
            AgentHealth::Degraded
        }
        _ => AgentHealth::Healthy,
    }
}

/// The routing score table. Higher is better.
fn score_candidate(config: &AgentConfig, state: &AgentState, priority: TaskPriority) -> i64 {
    let mut score: i64 = 100;
    score += match state.status {
        AgentStatus::Idle => 30,
        AgentStatus::Processing => 10,
        _ => 0,
    };
    score -= 5 * state.metrics.queue_depth as i64;
    score += (20.0 * state.metrics.success_rate).floor() as i64;
    if state.metrics.avg_processing_time_ms < 1_000.0 {
        score += 15;
    } else if state.metrics.avg_processing_time_ms < 5_000.0 {
        score += 10;
    }
    if priority == TaskPriority::Critical && config.tier == 1 {
        score += 20;
    }
    score
}

#[async_trait]
impl AgentHandler for Orchestrator {
    fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn process(
        &self,
        input: serde_json::Value,
        _ctx: &TaskContext,
    ) -> ApiaryResult<serde_json::Value> {
        let action = input
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApiaryError::Validation("missing 'action' field".to_string()))?;

        match action {
            "route" => {
                let task_type = input
                    .get("task_type")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ApiaryError::Validation("route requires 'task_type'".to_string())
                    })?;
                let priority = input
                    .get("priority")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()?
                    .unwrap_or(TaskPriority::Normal);
                let capabilities: Vec<String> = input
                    .get("capabilities")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()?
                    .unwrap_or_default();
                let agent = self.route_task(task_type, priority, &capabilities)?;
                Ok(serde_json::json!({ "agent": agent }))
            }
            "balance" => Ok(serde_json::to_value(self.balance_load())?),
            "health" => Ok(serde_json::to_value(self.health_report())?),
            other => Err(ApiaryError::Validation(format!(
                "unknown orchestrator action '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use apiary_core::AgentState;

    fn register(
        state: &StateManager,
        id: &str,
        tier: u8,
        capability: &str,
        status: AgentStatus,
        success_rate: f64,
        queue_depth: usize,
        avg_ms: f64,
    ) {
        state
            .register_agent(
                AgentConfig::new(id, tier).with_capability(capability),
                AgentState::new(id),
            )
            .unwrap();
        state
            .update_agent(id, |s| {
                s.status = status;
                s.metrics.success_rate = success_rate;
                s.metrics.queue_depth = queue_depth;
                s.metrics.avg_processing_time_ms = avg_ms;
            })
            .unwrap();
    }

    fn orchestrator() -> (Arc<StateManager>, Orchestrator) {
        let state = Arc::new(StateManager::new());
        let orchestrator = Orchestrator::new(Arc::clone(&state));
        (state, orchestrator)
    }

    #[test]
    fn test_idle_perfect_beats_busy_mediocre() {
        let (state, orchestrator) = orchestrator();
        register(&state, "idle-one", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);
        register(
            &state,
            "busy-one",
            2,
            "campaign.plan",
            AgentStatus::Processing,
            0.5,
            0,
            100.0,
        );

        let picked = orchestrator
            .route_task("campaign.plan", TaskPriority::Normal, &[])
            .unwrap();
        assert_eq!(picked, "idle-one");
    }

    #[test]
    fn test_queue_depth_penalty() {
        let (state, orchestrator) = orchestrator();
        register(&state, "deep", 2, "campaign.plan", AgentStatus::Idle, 1.0, 10, 100.0);
        register(&state, "shallow", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);

        let picked = orchestrator
            .route_task("campaign.plan", TaskPriority::Normal, &[])
            .unwrap();
        assert_eq!(picked, "shallow");
    }

    #[test]
    fn test_offline_and_error_agents_excluded() {
        let (state, orchestrator) = orchestrator();
        register(&state, "gone", 2, "campaign.plan", AgentStatus::Offline, 1.0, 0, 100.0);
        register(&state, "broken", 2, "campaign.plan", AgentStatus::Error, 1.0, 0, 100.0);

        let result = orchestrator.route_task("campaign.plan", TaskPriority::Normal, &[]);
        assert!(matches!(result, Err(ApiaryError::Routing(_))));
    }

    #[test]
    fn test_no_capability_holder_is_routing_error() {
        let (_state, orchestrator) = orchestrator();
        let result = orchestrator.route_task("campaign.plan", TaskPriority::Normal, &[]);
        assert!(matches!(result, Err(ApiaryError::Routing(_))));
    }

    #[test]
    fn test_critical_priority_prefers_tier_one() {
        let (state, orchestrator) = orchestrator();
        // Identical metrics; only the tier differs.
        register(&state, "frontline", 1, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);
        register(&state, "backline", 3, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);

        let normal = orchestrator
            .route_task("campaign.plan", TaskPriority::Normal, &[])
            .unwrap();
        // Equal scores: deterministic first-by-id wins.
        assert_eq!(normal, "backline");

        let critical = orchestrator
            .route_task("campaign.plan", TaskPriority::Critical, &[])
            .unwrap();
        assert_eq!(critical, "frontline");
    }

    #[test]
    fn test_tie_breaks_are_deterministic() {
        let (state, orchestrator) = orchestrator();
        register(&state, "bravo", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);
        register(&state, "alpha", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);

        for _ in 0..10 {
            let picked = orchestrator
                .route_task("campaign.plan", TaskPriority::Normal, &[])
                .unwrap();
            assert_eq!(picked, "alpha");
        }
    }

    #[test]
    fn test_processing_time_bonus_tiers() {
        let (state, orchestrator) = orchestrator();
        register(&state, "fast", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 500.0);
        register(&state, "medium", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 3_000.0);
        register(&state, "slow", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 8_000.0);

        let picked = orchestrator
            .route_task("campaign.plan", TaskPriority::Normal, &[])
            .unwrap();
        assert_eq!(picked, "fast");

        state.remove_agent("fast");
        let picked = orchestrator
            .route_task("campaign.plan", TaskPriority::Normal, &[])
            .unwrap();
        assert_eq!(picked, "medium");
    }

    #[test]
    fn test_explicit_capability_intersection() {
        let (state, orchestrator) = orchestrator();
        state
            .register_agent(
                AgentConfig::new("multi", 2)
                    .with_capability("campaign.plan")
                    .with_capability("campaign.simulate"),
                AgentState::new("multi"),
            )
            .unwrap();
        state.update_agent("multi", |s| s.status = AgentStatus::Idle).unwrap();
        register(&state, "single", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);

        let picked = orchestrator
            .route_task(
                "campaign.plan",
                TaskPriority::Normal,
                &["campaign.plan".to_string(), "campaign.simulate".to_string()],
            )
            .unwrap();
        assert_eq!(picked, "multi");
    }

    #[test]
    fn test_balance_load_thresholds() {
        let (state, orchestrator) = orchestrator();
        register(&state, "heavy", 2, "a", AgentStatus::Idle, 1.0, 8, 100.0);
        register(&state, "light", 2, "b", AgentStatus::Idle, 1.0, 1, 100.0);
        register(&state, "empty", 2, "c", AgentStatus::Idle, 1.0, 0, 100.0);

        let report = orchestrator.balance_load();
        assert!((report.mean_depth - 3.0).abs() < f64::EPSILON);
        assert_eq!(report.overloaded, vec!["heavy"]);
        assert_eq!(report.underutilized, vec!["empty", "light"]);
    }

    #[test]
    fn test_balance_load_quiet_swarm_flags_nothing() {
        let (state, orchestrator) = orchestrator();
        register(&state, "a", 2, "a", AgentStatus::Idle, 1.0, 1, 100.0);
        register(&state, "b", 2, "b", AgentStatus::Idle, 1.0, 0, 100.0);

        // Mean 0.5: the underutilized rule only applies when mean > 1.
        let report = orchestrator.balance_load();
        assert!(report.underutilized.is_empty());
    }

    #[test]
    fn test_health_classification() {
        let (state, orchestrator) = orchestrator();
        register(&state, "ok", 2, "a", AgentStatus::Idle, 1.0, 0, 100.0);
        register(&state, "shaky", 2, "b", AgentStatus::Idle, 0.85, 3, 100.0);
        register(&state, "swamped", 2, "c", AgentStatus::Processing, 1.0, 11, 100.0);
        // Offline trumps perfect metrics.
        register(&state, "dark", 2, "d", AgentStatus::Offline, 1.0, 0, 100.0);

        assert_eq!(orchestrator.health_check("ok"), AgentHealth::Healthy);
        assert_eq!(orchestrator.health_check("shaky"), AgentHealth::Degraded);
        assert_eq!(orchestrator.health_check("swamped"), AgentHealth::Degraded);
        assert_eq!(orchestrator.health_check("dark"), AgentHealth::Unhealthy);
        assert_eq!(orchestrator.health_check("ghost"), AgentHealth::Unhealthy);
    }

    #[tokio::test]
    async fn test_process_route_action() {
        let (state, orchestrator) = orchestrator();
        register(&state, "planner", 2, "campaign.plan", AgentStatus::Idle, 1.0, 0, 100.0);

        let answer = orchestrator
            .process(
                serde_json::json!({"action": "route", "task_type": "campaign.plan"}),
                &TaskContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(answer, serde_json::json!({"agent": "planner"}));
    }

    #[tokio::test]
    async fn test_process_rejects_unknown_action() {
        let (_state, orchestrator) = orchestrator();
        let result = orchestrator
            .process(serde_json::json!({"action": "dance"}), &TaskContext::new())
            .await;
        assert!(matches!(result, Err(ApiaryError::Validation(_))));
    }
}
