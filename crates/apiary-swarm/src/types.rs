use apiary_core::AgentStatus;
use apiary_orchestrator::AgentHealth;
use serde::{Deserialize, Serialize};

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Interval between health-loop ticks, in milliseconds.
    #[serde(default = "default_health_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Restart agents that report fatal errors.
    #[serde(default = "default_auto_recovery")]
    pub auto_recovery: bool,
    /// When set, only the listed agent ids are instantiated.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
}

fn default_health_interval_ms() -> u64 {
    5_000
}

fn default_auto_recovery() -> bool {
    true
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_interval_ms(),
            auto_recovery: default_auto_recovery(),
            allowlist: None,
        }
    }
}

/// Overall coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmPhase {
    /// Not started, or stopped.
    Stopped,
    /// `start()` in progress.
    Initializing,
    /// All agents healthy.
    Running,
    /// Under half of the agents unhealthy.
    Degraded,
    /// Half or more of the agents unhealthy, or startup failed.
    Error,
}

impl std::fmt::Display for SwarmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwarmPhase::Stopped => write!(f, "stopped"),
            SwarmPhase::Initializing => write!(f, "initializing"),
            SwarmPhase::Running => write!(f, "running"),
            SwarmPhase::Degraded => write!(f, "degraded"),
            SwarmPhase::Error => write!(f, "error"),
        }
    }
}

/// One agent's line in a [`SwarmStatus`] snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// Agent id.
    pub id: String,
    /// Dependency tier.
    pub tier: u8,
    /// Published status; `Offline` when deregistered.
    pub status: AgentStatus,
    /// Stateless health classification.
    pub health: AgentHealth,
    /// Admitted-but-unsettled tasks.
    pub queue_depth: usize,
}

/// Point-in-time swarm snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmStatus {
    /// Overall phase.
    pub phase: SwarmPhase,
    /// Milliseconds since `start()` completed; 0 when stopped.
    pub uptime_ms: u64,
    /// Per-agent snapshot in tier order.
    pub agents: Vec<AgentSnapshot>,
    /// Tasks accepted by the submission entry points.
    pub tasks_submitted: u64,
    /// Accepted tasks that settled successfully.
    pub tasks_completed: u64,
    /// Accepted tasks that settled as failures.
    pub tasks_failed: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SwarmConfig::default();
        assert_eq!(config.health_check_interval_ms, 5_000);
        assert!(config.auto_recovery);
        assert!(config.allowlist.is_none());
    }

    #[test]
    fn test_config_toml_round_trip() {
        let parsed: SwarmConfig = serde_json::from_value(serde_json::json!({
            "health_check_interval_ms": 250,
            "auto_recovery": false,
            "allowlist": ["orchestrator", "campaign-planner"],
        }))
        .unwrap();
        assert_eq!(parsed.health_check_interval_ms, 250);
        assert!(!parsed.auto_recovery);
        assert_eq!(parsed.allowlist.unwrap().len(), 2);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SwarmPhase::Running.to_string(), "running");
        assert_eq!(SwarmPhase::Degraded.to_string(), "degraded");
    }
}
