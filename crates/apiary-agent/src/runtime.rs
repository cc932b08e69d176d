use crate::handler::AgentHandler;
use apiary_bus::{EventBus, EventHandler, SubscriptionId};
use apiary_core::{
    events, AgentConfig, AgentState, AgentStatus, ApiaryError, ApiaryResult, DomainEvent, Task,
    TaskResult, TaskStatus,
};
use apiary_state::{StateManager, TaskPatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

const PHASE_STOPPED: u8 = 0;
const PHASE_INITIALIZING: u8 = 1;
const PHASE_RUNNING: u8 = 2;
const PHASE_SHUTTING_DOWN: u8 = 3;

/// The task-queue and lifecycle machinery around one [`AgentHandler`].
///
/// Tasks are admitted into a FIFO queue bounded by the config's
/// `max_concurrency` (a fair semaphore: arrival order is start order) and
/// executed under the config's per-task deadline. Task priority never
/// reorders this queue; it only influences which agent the router picks.
///
/// The runtime publishes the agent's state and metrics to the shared
/// [`StateManager`] and emits lifecycle events (`agent.joined`, `agent.left`,
/// `agent.error`, `task.completed`, `task.failed`) on the shared [`EventBus`].
/// Both collaborators are injected at construction; the runtime never reaches
/// back into the coordinator.
pub struct AgentRuntime {
    handler: Arc<dyn AgentHandler>,
    config: AgentConfig,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    semaphore: Arc<Semaphore>,
    phase: AtomicU8,
    // Admitted but not yet settled; this is the published queue depth.
    admitted: AtomicUsize,
    // Currently holding a semaphore permit.
    executing: AtomicUsize,
    drained: Notify,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl AgentRuntime {
    /// Wrap a handler with its queue and lifecycle machinery.
    pub fn new(
        handler: Arc<dyn AgentHandler>,
        state: Arc<StateManager>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let config = handler.config().clone();
        Arc::new(Self {
            handler,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            state,
            bus,
            phase: AtomicU8::new(PHASE_STOPPED),
            admitted: AtomicUsize::new(0),
            executing: AtomicUsize::new(0),
            drained: Notify::new(),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// The agent id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// The agent's immutable configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Tasks admitted but not yet settled.
    pub fn queue_depth(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    /// Whether the runtime currently accepts tasks.
    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_RUNNING
    }

    /// Bring the agent up: register its state, subscribe its declared event
    /// patterns, run the `on_initialize` hook, go idle, emit `agent.joined`.
    ///
    /// Fails with a `Lifecycle` error when the agent is already running;
    /// initializing again after a completed `shutdown()` is allowed (auto-
    /// recovery depends on it). A failed hook rolls back the registration and
    /// subscriptions so the call can be retried.
    pub async fn initialize(&self) -> ApiaryResult<()> {
        self.phase
            .compare_exchange(
                PHASE_STOPPED,
                PHASE_INITIALIZING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| {
                ApiaryError::Lifecycle(format!("agent '{}' is already initialized", self.config.id))
            })?;

        match self.bring_up().await {
            Ok(()) => {
                self.phase.store(PHASE_RUNNING, Ordering::Release);
                info!(agent = %self.config.id, tier = self.config.tier, "Agent initialized");
                Ok(())
            }
            Err(e) => {
                for sub in self.subscriptions.lock().drain(..) {
                    self.bus.unsubscribe(sub);
                }
                self.state.remove_agent(&self.config.id);
                self.phase.store(PHASE_STOPPED, Ordering::Release);
                error!(agent = %self.config.id, error = %e, "Agent initialization failed");
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> ApiaryResult<()> {
        self.state
            .register_agent(self.config.clone(), AgentState::new(&self.config.id))?;

        for pattern in self.handler.subscribed_events() {
            let adapter = Arc::new(EventAdapter {
                agent_id: self.config.id.clone(),
                handler: Arc::clone(&self.handler),
            });
            let sub = self.bus.subscribe(pattern, adapter);
            self.subscriptions.lock().push(sub);
        }

        self.handler.on_initialize().await.map_err(|e| {
            ApiaryError::Lifecycle(format!(
                "on_initialize hook failed for '{}': {e}",
                self.config.id
            ))
        })?;

        self.state
            .update_agent_status(&self.config.id, AgentStatus::Idle)?;
        self.bus.emit(
            events::AGENT_JOINED,
            self.config.id.clone(),
            "agent",
            serde_json::json!({ "tier": self.config.tier }),
            None,
        );
        Ok(())
    }

    /// Submit a task for execution and resolve to its [`TaskResult`].
    ///
    /// Fails with a `Lifecycle` error when the runtime is not accepting
    /// tasks (not initialized, or shutdown in progress). Once admitted, a
    /// task always settles to a `TaskResult`: execution errors, timeouts,
    /// and shutdown all become a failed result, never an `Err`.
    pub async fn submit_task(self: &Arc<Self>, task: Task) -> ApiaryResult<TaskResult> {
        match self.phase.load(Ordering::Acquire) {
            PHASE_RUNNING => {}
            PHASE_SHUTTING_DOWN => {
                return Err(ApiaryError::Lifecycle(format!(
                    "agent '{}' is shutting down",
                    self.config.id
                )))
            }
            _ => {
                return Err(ApiaryError::Lifecycle(format!(
                    "agent '{}' is not initialized",
                    self.config.id
                )))
            }
        }

        self.admitted.fetch_add(1, Ordering::AcqRel);
        let _ = self.state.update_agent(&self.config.id, |s| {
            s.metrics.queue_depth += 1;
        });
        if self.state.get_task(task.id).is_none() {
            self.state.add_task(task.clone());
        }

        // Execution is detached from the submitter's future: an admitted task
        // settles even if the caller stops polling, so shutdown can drain.
        let runtime = Arc::clone(self);
        let handle = tokio::spawn(async move { runtime.run_task(task).await });
        handle
            .await
            .map_err(|e| ApiaryError::Lifecycle(format!("task execution aborted: {e}")))
    }

    async fn run_task(self: Arc<Self>, task: Task) -> TaskResult {
        // Fair semaphore: FIFO by arrival. Never closed, so the only error
        // path is unreachable in practice; treat it like a shutdown anyway.
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.settle(
                    &task,
                    Err(ApiaryError::Lifecycle("task queue closed".to_string())),
                    0,
                    false,
                )
            }
        };

        // Admitted before shutdown began, woken after: fail without starting.
        if self.phase.load(Ordering::Acquire) != PHASE_RUNNING {
            drop(permit);
            return self.settle(
                &task,
                Err(ApiaryError::Lifecycle(format!(
                    "agent '{}' shut down before the task started",
                    self.config.id
                ))),
                0,
                false,
            );
        }

        self.executing.fetch_add(1, Ordering::AcqRel);
        let _ = self
            .state
            .update_task(task.id, TaskPatch::new().with_status(TaskStatus::Processing));
        let _ = self.state.update_agent(&self.config.id, |s| {
            s.status = AgentStatus::Processing;
            s.current_task = Some(task.id);
        });

        let started = Instant::now();
        let handler = Arc::clone(&self.handler);
        let input = task.payload.clone();
        let ctx = task.context.clone();
        // The hook runs on its own task so a panicking agent implementation
        // becomes a fatal error instead of poisoning the queue.
        let mut work = tokio::spawn(async move { handler.process(input, &ctx).await });

        let outcome = match tokio::time::timeout(self.config.timeout(), &mut work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ApiaryError::Lifecycle(format!(
                "process hook panicked: {join_err}"
            ))),
            Err(_) => {
                work.abort();
                Err(ApiaryError::Timeout {
                    task_id: task.id,
                    after_ms: self.config.timeout_ms,
                })
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        drop(permit);
        self.settle(&task, outcome, elapsed_ms, true)
    }

    /// Fold a task's outcome into the state registry, metrics, and event
    /// stream, and convert it into the always-returned [`TaskResult`].
    fn settle(
        &self,
        task: &Task,
        outcome: ApiaryResult<serde_json::Value>,
        elapsed_ms: u64,
        was_executing: bool,
    ) -> TaskResult {
        let executing_now = if was_executing {
            self.executing.fetch_sub(1, Ordering::AcqRel) - 1
        } else {
            self.executing.load(Ordering::Acquire)
        };

        let success = outcome.is_ok();
        let fatal = outcome
            .as_ref()
            .err()
            .map(|e| !e.is_expected_task_failure())
            .unwrap_or(false);
        let error_text = outcome.as_ref().err().map(std::string::ToString::to_string);

        let _ = self.state.update_task(
            task.id,
            TaskPatch::new().with_status(if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            }),
        );

        let _ = self.state.update_agent(&self.config.id, |s| {
            s.metrics.queue_depth = s.metrics.queue_depth.saturating_sub(1);
            s.metrics.record_completion(elapsed_ms, success);
            if fatal {
                s.status = AgentStatus::Error;
                s.last_error = error_text.clone();
            }
            if s.status == AgentStatus::Error {
                s.current_task = None;
            } else if executing_now == 0 {
                s.status = AgentStatus::Idle;
                s.current_task = None;
            }
        });

        let correlation = Some(task.context.correlation_id);
        let result = match outcome {
            Ok(data) => {
                self.bus.emit(
                    events::TASK_COMPLETED,
                    task.id.to_string(),
                    "task",
                    serde_json::json!({
                        "agent": self.config.id,
                        "task_type": task.task_type,
                        "processing_time_ms": elapsed_ms,
                    }),
                    correlation,
                );
                TaskResult::ok(data, elapsed_ms)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(agent = %self.config.id, task = %task.id, error = %message, "Task failed");
                self.bus.emit(
                    events::TASK_FAILED,
                    task.id.to_string(),
                    "task",
                    serde_json::json!({
                        "agent": self.config.id,
                        "task_type": task.task_type,
                        "error": message,
                        "processing_time_ms": elapsed_ms,
                    }),
                    correlation,
                );
                if fatal {
                    self.bus.emit(
                        events::AGENT_ERROR,
                        self.config.id.clone(),
                        "agent",
                        serde_json::json!({ "error": message, "task": task.id }),
                        correlation,
                    );
                }
                TaskResult::failure(message, elapsed_ms)
            }
        };

        // notify_one stores a permit when nobody waits yet, so the drain
        // loop in shutdown() cannot miss the final settlement.
        if self.admitted.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_one();
        }
        result
    }

    /// Drain and stop the agent: reject new tasks, fail queued-but-unstarted
    /// tasks, await in-flight completions, unsubscribe, run `on_shutdown`,
    /// go offline, deregister, emit `agent.left`.
    ///
    /// Idempotent: only the first call performs the side effects; later calls
    /// return `Ok` immediately.
    pub async fn shutdown(&self) -> ApiaryResult<()> {
        if self
            .phase
            .compare_exchange(
                PHASE_RUNNING,
                PHASE_SHUTTING_DOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Ok(());
        }

        info!(agent = %self.config.id, "Agent shutting down");

        // Wait for every admitted task to settle. Queued tasks wake as
        // permits free up, observe the phase change, and fail fast.
        loop {
            let notified = self.drained.notified();
            if self.admitted.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }

        for sub in self.subscriptions.lock().drain(..) {
            self.bus.unsubscribe(sub);
        }

        let hook_result = self.handler.on_shutdown().await;
        if let Err(e) = &hook_result {
            error!(agent = %self.config.id, error = %e, "on_shutdown hook failed");
        }

        let _ = self
            .state
            .update_agent_status(&self.config.id, AgentStatus::Offline);
        self.state.remove_agent(&self.config.id);
        self.bus.emit(
            events::AGENT_LEFT,
            self.config.id.clone(),
            "agent",
            serde_json::json!({ "tier": self.config.tier }),
            None,
        );
        self.phase.store(PHASE_STOPPED, Ordering::Release);
        info!(agent = %self.config.id, "Agent shut down");

        hook_result
            .map_err(|e| ApiaryError::Lifecycle(format!("on_shutdown hook failed: {e}")))
    }
}

/// Bridges bus subscriptions to the handler's `handle_event`, catching and
/// logging errors so a failing handler never aborts the agent or blocks
/// delivery to other subscribers.
struct EventAdapter {
    agent_id: String,
    handler: Arc<dyn AgentHandler>,
}

#[async_trait]
impl EventHandler for EventAdapter {
    async fn handle(&self, event: DomainEvent) -> ApiaryResult<()> {
        let event_type = event.event_type.clone();
        if let Err(e) = self.handler.handle_event(event).await {
            warn!(
                agent = %self.agent_id,
                event_type = %event_type,
                error = %e,
                "Event handler failed"
            );
        }
        Ok(())
    }
}
