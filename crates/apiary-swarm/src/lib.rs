//! The swarm coordinator: top-level lifecycle driver for a fixed set of
//! agents.
//!
//! The coordinator instantiates agents in dependency-tier order, runs a
//! periodic health loop that reclassifies the swarm from the current
//! snapshot, optionally auto-recovers agents that report fatal errors, and
//! exposes the task-submission entry points. It is a pure lifecycle driver:
//! agents receive only the shared state registry and event bus, never a
//! reference back to the coordinator.
//!
//! # Main types
//!
//! - [`SwarmCoordinator`] — lifecycle, health loop, recovery, submission.
//! - [`SwarmBuilder`] — assembles the roster and shared collaborators.
//! - [`SwarmConfig`] / [`SwarmPhase`] / [`SwarmStatus`] — configuration and
//!   observable state.

/// Coordinator, builder, and auto-recovery machinery.
pub mod coordinator;
/// Configuration and status types.
pub mod types;

pub use coordinator::{SwarmBuilder, SwarmCoordinator};
pub use types::{AgentSnapshot, SwarmConfig, SwarmPhase, SwarmStatus};
