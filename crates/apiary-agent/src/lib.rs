//! Per-agent task-queue and lifecycle machinery.
//!
//! Every worker in the swarm is an implementation of [`AgentHandler`] wrapped
//! in an [`AgentRuntime`]. The runtime owns the agent's bounded-concurrency
//! task queue, its lifecycle (initialize/shutdown), its published state and
//! metrics in the shared registry, and its event subscriptions.
//!
//! # Main types
//!
//! - [`AgentHandler`] — The uniform contract every concrete agent implements.
//! - [`AgentRuntime`] — Queue, lifecycle, and metrics machinery around a handler.

/// The uniform agent contract.
pub mod handler;
/// The runtime wrapping a handler.
pub mod runtime;

pub use handler::AgentHandler;
pub use runtime::AgentRuntime;
