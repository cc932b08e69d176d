use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Scheduling priority of a task.
///
/// Priority influences which agent the router picks for a task; it never
/// reorders execution inside an agent's queue, which stays FIFO by arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// Default priority.
    Normal,
    /// Prefer faster agents.
    High,
    /// Prefer tier-1 agents.
    Critical,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// Status of a task. Transitions are monotonic: a task never returns to
/// `Pending`, and `Completed`/`Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created and accepted, not yet started.
    Pending,
    /// Currently executing on an agent.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with a failure (including timeout and shutdown).
    Failed,
}

impl TaskStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Correlation context attached to every task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Opaque token linking a chain of related tasks and events.
    pub correlation_id: Uuid,
    /// Arbitrary key-value metadata supplied by the submitter.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskContext {
    /// Create a context with a fresh correlation id and empty metadata.
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            metadata: HashMap::new(),
        }
    }

    /// Create a context continuing an existing correlation chain.
    pub fn with_correlation(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            metadata: HashMap::new(),
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of work submitted to exactly one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique id, assigned once at construction.
    pub id: Uuid,
    /// Task type, matched against agent capabilities by the router.
    pub task_type: String,
    /// Routing priority.
    pub priority: TaskPriority,
    /// Current status.
    pub status: TaskStatus,
    /// Typed payload handed to the agent's `process` hook.
    pub payload: serde_json::Value,
    /// Correlation context.
    pub context: TaskContext,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Times this task has been resubmitted. Stored for submitters; the
    /// runtime never consumes it.
    #[serde(default)]
    pub retry_count: u32,
    /// Retry budget. Stored for submitters; the runtime never consumes it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl Task {
    /// Create a pending task with a fresh id and correlation context.
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            payload,
            context: TaskContext::new(),
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: default_max_retries(),
        }
    }

    /// Set the routing priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Continue an existing correlation chain.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.context.correlation_id = correlation_id;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.metadata.insert(key.into(), value);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// The outcome of executing a task. Always returned, never panicked or
/// propagated as an error to the submitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task completed successfully.
    pub success: bool,
    /// Output produced by the agent on success.
    pub data: Option<serde_json::Value>,
    /// Failure description on error.
    pub error: Option<String>,
    /// Wall-clock execution time in milliseconds.
    pub processing_time_ms: u64,
}

impl TaskResult {
    /// A successful result.
    pub fn ok(data: serde_json::Value, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms,
        }
    }

    /// A failed result.
    pub fn failure(error: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time_ms,
        }
    }
}
