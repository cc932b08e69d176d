//! In-process publish/subscribe event bus.
//!
//! Subscriptions are registered against a pattern: an exact event type
//! (`"task.completed"`), a wildcard suffix (`"task.*"`), or the catch-all
//! `"*"`. Emitting an event stamps a fresh id and timestamp, fills in a
//! default correlation id when the caller supplies none, and dispatches to
//! every matching subscription in registration order.
//!
//! Each handler runs on its own spawned task, so a slow or failing handler
//! never prevents delivery to the remaining handlers of the same event.
//! Handler errors are logged at the bus boundary and swallowed.
//!
//! There is no ordering guarantee across events emitted concurrently by
//! different agents.

use apiary_core::{ApiaryError, ApiaryResult, DomainEvent};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

/// Opaque handle returned by [`EventBus::subscribe`], consumed by
/// [`EventBus::unsubscribe`].
pub type SubscriptionId = Uuid;

/// An asynchronous event handler.
///
/// Errors returned from [`handle`](EventHandler::handle) are caught and
/// logged by the bus; they never propagate to the emitter.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// React to one event.
    async fn handle(&self, event: DomainEvent) -> ApiaryResult<()>;
}

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: Arc<dyn EventHandler>,
}

/// The in-process publish/subscribe bus.
///
/// Constructed once at process start and injected by `Arc` into every agent
/// and the coordinator; [`EventBus::default`] exists for tests.
pub struct EventBus {
    // Vec keeps registration order, which fixes dispatch order per emit.
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for every event whose type matches `pattern`.
    pub fn subscribe(&self, pattern: impl Into<String>, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.subscriptions.write().push(Subscription {
            id,
            pattern: pattern.into(),
            handler,
        });
        id
    }

    /// Remove a subscription. Returns `false` when the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Stamp and dispatch an event.
    ///
    /// A fresh correlation id is generated when `correlation_id` is `None`.
    /// Returns the stamped event; subscribers receive clones of it.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        payload: serde_json::Value,
        correlation_id: Option<Uuid>,
    ) -> DomainEvent {
        let event = DomainEvent::new(
            event_type,
            aggregate_id,
            aggregate_type,
            payload,
            correlation_id,
        );
        self.dispatch(&event);
        event
    }

    fn dispatch(&self, event: &DomainEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| pattern_matches(&s.pattern, &event.event_type))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                let event_type = event.event_type.clone();
                if let Err(e) = handler.handle(event).await {
                    warn!(event_type = %event_type, error = %e, "Event handler failed");
                }
            });
        }
    }

    /// Resolve once the task with `task_id` reaches a terminal state.
    ///
    /// Subscribes to `task.*`, completes on the first `task.completed` or
    /// `task.failed` event whose aggregate id matches, then unsubscribes.
    /// Fails with [`ApiaryError::Timeout`] when no terminal event arrives
    /// within `timeout`.
    pub async fn wait_for_task(&self, task_id: Uuid, timeout: Duration) -> ApiaryResult<DomainEvent> {
        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(TaskWaiter {
            task_id: task_id.to_string(),
            tx: Mutex::new(Some(tx)),
        });
        let sub_id = self.subscribe("task.*", waiter);

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe(sub_id);

        match outcome {
            Ok(Ok(event)) => Ok(event),
            // The sender can only be dropped through unsubscribe above.
            Ok(Err(_)) => Err(ApiaryError::EventHandler(
                "task waiter dropped before resolution".to_string(),
            )),
            Err(_) => Err(ApiaryError::Timeout {
                task_id,
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct TaskWaiter {
    task_id: String,
    tx: Mutex<Option<oneshot::Sender<DomainEvent>>>,
}

#[async_trait]
impl EventHandler for TaskWaiter {
    async fn handle(&self, event: DomainEvent) -> ApiaryResult<()> {
        if event.aggregate_id == self.task_id {
            if let Some(tx) = self.tx.lock().take() {
                let _ = tx.send(event);
            }
        }
        Ok(())
    }
}

/// Whether `pattern` matches `event_type`: exact, `"*"`, or a single
/// trailing-`*` wildcard after a dot (`"task.*"` matches `"task.completed"`
/// but not `"task"` itself).
fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" || pattern == event_type {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => event_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => false,
    }
}
