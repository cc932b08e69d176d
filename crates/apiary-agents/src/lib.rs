//! Concrete worker agents for the marketing swarm.
//!
//! Each agent is an opaque implementation of the uniform
//! [`AgentHandler`](apiary_agent::AgentHandler) contract; the orchestration
//! core never looks inside. The domain logic is deliberately lightweight —
//! heuristics and seeded simulation, no external services beyond the mocked
//! clients in `apiary-pool`.

/// Running-statistics agent over observed task events.
pub mod analyst;
/// Template-based ad-copy generation.
pub mod creative;
/// Channel-mix budget planning.
pub mod planner;
/// Seeded Monte Carlo campaign simulation.
pub mod simulator;

pub use analyst::AnalystAgent;
pub use creative::CreativeWriterAgent;
pub use planner::CampaignPlannerAgent;
pub use simulator::SimulatorAgent;

use apiary_agent::AgentHandler;
use std::sync::Arc;

/// The standard worker roster, tiers 2–4. The orchestrator (tier 1) is added
/// by the coordinator builder.
pub fn standard_roster() -> Vec<Arc<dyn AgentHandler>> {
    vec![
        Arc::new(CampaignPlannerAgent::new()),
        Arc::new(CreativeWriterAgent::new()),
        Arc::new(SimulatorAgent::new()),
        Arc::new(AnalystAgent::new()),
    ]
}
