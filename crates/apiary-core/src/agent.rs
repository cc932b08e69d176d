use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable configuration of an agent. Built once, never mutated after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent id, e.g. `"campaign-planner"`.
    pub id: String,
    /// Dependency rank (1–5) controlling startup/shutdown order.
    pub tier: u8,
    /// Capability tags matched against task types by the router.
    pub capabilities: Vec<String>,
    /// Upper bound on concurrently executing tasks.
    pub max_concurrency: usize,
    /// Per-task deadline in milliseconds.
    pub timeout_ms: u64,
    /// Routing priority weight.
    pub priority: u32,
    /// Ids of agents that must be running before this one starts.
    pub dependencies: Vec<String>,
}

impl AgentConfig {
    /// Create a config with defaults: no capabilities, concurrency 4,
    /// 30 s task deadline, weight 1, no dependencies.
    pub fn new(id: impl Into<String>, tier: u8) -> Self {
        Self {
            id: id.into(),
            tier,
            capabilities: Vec::new(),
            max_concurrency: 4,
            timeout_ms: 30_000,
            priority: 1,
            dependencies: Vec::new(),
        }
    }

    /// Add a capability tag.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Set the concurrency bound.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the per-task deadline in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the routing priority weight.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare a dependency on another agent id.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// The per-task deadline as a [`std::time::Duration`].
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Live status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered and ready, nothing in flight.
    Idle,
    /// At least one task in flight.
    Processing,
    /// A fatal error was recorded; the agent is a recovery candidate.
    Error,
    /// Shut down or not yet initialized.
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Processing => write!(f, "processing"),
            AgentStatus::Error => write!(f, "error"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Rolling execution metrics published by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Total tasks that reached a terminal state on this agent.
    pub tasks_processed: u64,
    /// Running mean of task execution time in milliseconds.
    pub avg_processing_time_ms: f64,
    /// Running fraction of tasks that completed successfully.
    pub success_rate: f64,
    /// Tasks admitted but not yet finished.
    pub queue_depth: usize,
    /// Timestamp of the last terminal task.
    pub last_active: DateTime<Utc>,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self {
            tasks_processed: 0,
            avg_processing_time_ms: 0.0,
            success_rate: 1.0,
            queue_depth: 0,
            last_active: Utc::now(),
        }
    }
}

impl AgentMetrics {
    /// Fold one terminal task into the running mean and success rate.
    pub fn record_completion(&mut self, duration_ms: u64, success: bool) {
        self.tasks_processed += 1;
        let n = self.tasks_processed as f64;
        self.avg_processing_time_ms =
            (self.avg_processing_time_ms * (n - 1.0) + duration_ms as f64) / n;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (n - 1.0) + outcome) / n;
        self.last_active = Utc::now();
    }
}

/// The state an agent publishes to the shared registry.
///
/// Invariant: `current_task` is non-null iff `status == Processing`. Only the
/// owning agent mutates its own status and metrics; the coordinator may force
/// `Offline` during shutdown or removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// The agent id, matching its [`AgentConfig::id`].
    pub id: String,
    /// Current status.
    pub status: AgentStatus,
    /// A task currently in flight, if any.
    pub current_task: Option<Uuid>,
    /// Rolling metrics.
    pub metrics: AgentMetrics,
    /// The most recent fatal error, if any.
    pub last_error: Option<String>,
}

impl AgentState {
    /// A fresh offline state for the given agent id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Offline,
            current_task: None,
            metrics: AgentMetrics::default(),
            last_error: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = AgentConfig::new("simulator", 3)
            .with_capability("campaign.simulate")
            .with_max_concurrency(2)
            .with_timeout_ms(5_000)
            .with_priority(2)
            .with_dependency("campaign-planner");
        assert_eq!(config.tier, 3);
        assert_eq!(config.capabilities, vec!["campaign.simulate"]);
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.timeout(), std::time::Duration::from_millis(5_000));
        assert_eq!(config.dependencies, vec!["campaign-planner"]);
    }

    #[test]
    fn test_running_mean_and_success_rate() {
        let mut metrics = AgentMetrics::default();
        metrics.record_completion(100, true);
        metrics.record_completion(300, true);
        assert!((metrics.avg_processing_time_ms - 200.0).abs() < f64::EPSILON);
        assert!((metrics.success_rate - 1.0).abs() < f64::EPSILON);

        metrics.record_completion(200, false);
        assert!((metrics.avg_processing_time_ms - 200.0).abs() < f64::EPSILON);
        assert!((metrics.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.tasks_processed, 3);
    }

    #[test]
    fn test_fresh_state_is_offline() {
        let state = AgentState::new("analyst");
        assert_eq!(state.status, AgentStatus::Offline);
        assert!(state.current_task.is_none());
        assert!(state.last_error.is_none());
        assert!((state.metrics.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AgentStatus::Idle.to_string(), "idle");
        assert_eq!(AgentStatus::Offline.to_string(), "offline");
    }
}
