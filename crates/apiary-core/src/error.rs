use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the Apiary runtime.
///
/// Expected task failures ([`ApiaryError::Validation`] and
/// [`ApiaryError::Timeout`]) are folded into a failed
/// [`TaskResult`](crate::TaskResult) and leave the executing agent healthy.
/// Every other variant is the fatal channel: the runtime records it on the
/// agent's published state and emits an `agent.error` event.
#[derive(Debug, Error)]
pub enum ApiaryError {
    /// A task carried input the target agent could not accept.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No agent matched a routing request.
    #[error("Routing error: {0}")]
    Routing(String),

    /// An `initialize`/`shutdown` hook failed, or a lifecycle rule was violated.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// A task exceeded its per-task deadline.
    #[error("Task {task_id} timed out after {after_ms} ms")]
    Timeout {
        /// The task that missed its deadline.
        task_id: Uuid,
        /// The configured deadline in milliseconds.
        after_ms: u64,
    },

    /// An event handler failed; caught and logged at the handler boundary.
    #[error("Event handler error: {0}")]
    EventHandler(String),

    /// A state-registry operation failed (unknown agent, unknown task, ...).
    #[error("State error: {0}")]
    State(String),

    /// Configuration parsing or validation failed.
    #[error("Config error: {0}")]
    Config(String),

    /// A resource-pool acquire missed its deadline.
    #[error("Pool acquire timed out after {after_ms} ms")]
    PoolTimeout {
        /// The acquire timeout in milliseconds.
        after_ms: u64,
    },

    /// The resource pool has been closed.
    #[error("Pool is closed")]
    PoolClosed,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiaryError {
    /// Whether this error is an expected task failure rather than a fault in
    /// the agent itself. Expected failures become a failed `TaskResult`
    /// without touching the agent's health.
    pub fn is_expected_task_failure(&self) -> bool {
        matches!(self, ApiaryError::Validation(_) | ApiaryError::Timeout { .. })
    }
}

/// A convenience `Result` alias using [`ApiaryError`].
pub type ApiaryResult<T> = Result<T, ApiaryError>;
