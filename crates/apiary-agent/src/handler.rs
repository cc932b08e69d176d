use apiary_core::{AgentConfig, ApiaryResult, DomainEvent, TaskContext};
use async_trait::async_trait;

/// The uniform contract every concrete agent implements.
///
/// The orchestration core treats agent internals as opaque: it only ever
/// calls through this trait. `process` errors are converted into failed
/// task results by the runtime and never reach the submitter as errors;
/// `handle_event` errors are caught and logged at the subscription boundary.
#[async_trait]
pub trait AgentHandler: Send + Sync + 'static {
    /// The agent's immutable configuration.
    fn config(&self) -> &AgentConfig;

    /// Execute one task. Runs under the runtime's concurrency bound and
    /// per-task deadline.
    ///
    /// Return [`ApiaryError::Validation`](apiary_core::ApiaryError::Validation)
    /// for rejected input; any other error variant is treated as a fault in
    /// the agent and trips the fatal-error channel.
    async fn process(
        &self,
        input: serde_json::Value,
        ctx: &TaskContext,
    ) -> ApiaryResult<serde_json::Value>;

    /// Hook invoked during `initialize()`, before the agent goes idle.
    async fn on_initialize(&self) -> ApiaryResult<()> {
        Ok(())
    }

    /// Hook invoked during `shutdown()`, after in-flight tasks drain.
    async fn on_shutdown(&self) -> ApiaryResult<()> {
        Ok(())
    }

    /// Event patterns this agent subscribes to at initialization,
    /// e.g. `["task.*"]`.
    fn subscribed_events(&self) -> Vec<String> {
        Vec::new()
    }

    /// React to one subscribed event.
    async fn handle_event(&self, event: DomainEvent) -> ApiaryResult<()> {
        let _ = event;
        Ok(())
    }
}
