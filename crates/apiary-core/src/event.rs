use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known event types emitted by the runtime itself.
pub mod events {
    /// An agent finished initializing and joined the swarm.
    pub const AGENT_JOINED: &str = "agent.joined";
    /// An agent shut down and left the swarm.
    pub const AGENT_LEFT: &str = "agent.left";
    /// An agent recorded a fatal error; auto-recovery listens for this.
    pub const AGENT_ERROR: &str = "agent.error";
    /// A task reached `Completed`.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// A task reached `Failed`.
    pub const TASK_FAILED: &str = "task.failed";
}

/// An immutable broadcast notification.
///
/// Events are stamped with a fresh id and timestamp at emission and are never
/// mutated afterwards. The `correlation_id` links the event to the chain of
/// tasks and events that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Dotted event type, e.g. `"task.completed"`.
    pub event_type: String,
    /// Id of the entity the event is about (task id, agent id, ...).
    pub aggregate_id: String,
    /// Kind of that entity, e.g. `"task"` or `"agent"`.
    pub aggregate_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Opaque token linking related tasks and events.
    pub correlation_id: Uuid,
}

impl DomainEvent {
    /// Create an event, stamping id and timestamp. A fresh correlation id is
    /// generated when `correlation_id` is `None`.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: correlation_id.unwrap_or_else(Uuid::new_v4),
        }
    }
}
