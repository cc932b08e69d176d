//! Core types and error definitions for the Apiary swarm runtime.
//!
//! This crate provides the foundational types shared across all Apiary crates:
//! the task and result shapes, the agent configuration and published-state
//! types, the domain-event envelope, and the campaign/creative records kept in
//! the shared state registry.
//!
//! # Main types
//!
//! - [`ApiaryError`] — Unified error enum for all Apiary subsystems.
//! - [`ApiaryResult`] — Convenience alias for `Result<T, ApiaryError>`.
//! - [`Task`] / [`TaskResult`] — A unit of work and its always-returned outcome.
//! - [`AgentConfig`] / [`AgentState`] — An agent's immutable configuration and
//!   its live published state.
//! - [`DomainEvent`] — Immutable broadcast notification with a correlation id.
//! - [`Campaign`] / [`Creative`] — Domain records held by the state registry.

/// Agent configuration, status, and metrics types.
pub mod agent;
/// Campaign and creative domain records.
pub mod campaign;
/// Error taxonomy and result alias.
pub mod error;
/// Domain-event envelope and well-known event types.
pub mod event;
/// Task, task context, and task result types.
pub mod task;

pub use agent::{AgentConfig, AgentMetrics, AgentState, AgentStatus};
pub use campaign::{Campaign, CampaignStatus, Creative, CreativeStatus};
pub use error::{ApiaryError, ApiaryResult};
pub use event::{events, DomainEvent};
pub use task::{Task, TaskContext, TaskPriority, TaskResult, TaskStatus};
