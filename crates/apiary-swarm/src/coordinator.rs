use crate::types::{AgentSnapshot, SwarmConfig, SwarmPhase, SwarmStatus};
use apiary_agent::{AgentHandler, AgentRuntime};
use apiary_bus::{EventBus, EventHandler, SubscriptionId};
use apiary_core::{
    events, AgentStatus, ApiaryError, ApiaryResult, Campaign, CampaignStatus, Creative,
    DomainEvent, Task, TaskPriority, TaskResult,
};
use apiary_orchestrator::{AgentHealth, Orchestrator};
use apiary_state::StateManager;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Assembles the agent roster and shared collaborators into a
/// [`SwarmCoordinator`].
///
/// The orchestrator agent is always part of the roster (subject to the
/// allowlist, like everything else); workers are added with
/// [`with_agent`](Self::with_agent).
pub struct SwarmBuilder {
    config: SwarmConfig,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    handlers: Vec<Arc<dyn AgentHandler>>,
}

impl SwarmBuilder {
    /// Start a builder with fresh shared collaborators.
    pub fn new(config: SwarmConfig) -> Self {
        Self::with_shared(config, Arc::new(StateManager::new()), Arc::new(EventBus::new()))
    }

    /// Start a builder over existing collaborators (tests, embedding).
    pub fn with_shared(
        config: SwarmConfig,
        state: Arc<StateManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            state,
            bus,
            handlers: Vec::new(),
        }
    }

    /// Add a worker agent to the roster.
    pub fn with_agent(mut self, handler: Arc<dyn AgentHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Assemble the coordinator. Agents excluded by the allowlist are never
    /// instantiated; the roster is ordered by ascending tier, stable by
    /// registration within a tier.
    pub fn build(self) -> Arc<SwarmCoordinator> {
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&self.state)));

        let mut handlers: Vec<Arc<dyn AgentHandler>> =
            vec![Arc::clone(&orchestrator) as Arc<dyn AgentHandler>];
        handlers.extend(self.handlers);

        if let Some(allowlist) = &self.config.allowlist {
            handlers.retain(|h| allowlist.iter().any(|id| id == &h.config().id));
        }
        handlers.sort_by_key(|h| h.config().tier);

        let agents: Vec<Arc<AgentRuntime>> = handlers
            .into_iter()
            .map(|handler| {
                AgentRuntime::new(handler, Arc::clone(&self.state), Arc::clone(&self.bus))
            })
            .collect();
        let agents_by_id = agents
            .iter()
            .map(|runtime| (runtime.id().to_string(), Arc::clone(runtime)))
            .collect();

        Arc::new(SwarmCoordinator {
            config: self.config,
            state: self.state,
            bus: self.bus,
            orchestrator,
            agents,
            agents_by_id,
            phase: RwLock::new(SwarmPhase::Stopped),
            started_at: Mutex::new(None),
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            health_task: Mutex::new(None),
            recovery_sub: Mutex::new(None),
            recovering: Mutex::new(HashSet::new()),
        })
    }
}

/// Top-level driver of the swarm lifecycle.
pub struct SwarmCoordinator {
    config: SwarmConfig,
    state: Arc<StateManager>,
    bus: Arc<EventBus>,
    orchestrator: Arc<Orchestrator>,
    // Ascending tier order; stop() walks it in reverse.
    agents: Vec<Arc<AgentRuntime>>,
    agents_by_id: HashMap<String, Arc<AgentRuntime>>,
    phase: RwLock<SwarmPhase>,
    started_at: Mutex<Option<Instant>>,
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    health_task: Mutex<Option<JoinHandle<()>>>,
    recovery_sub: Mutex<Option<SubscriptionId>>,
    recovering: Mutex<HashSet<String>>,
}

impl SwarmCoordinator {
    /// The shared state registry.
    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// The shared event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The instantiated roster, in ascending tier order.
    pub fn agents(&self) -> &[Arc<AgentRuntime>] {
        &self.agents
    }

    /// Current phase.
    pub fn phase(&self) -> SwarmPhase {
        *self.phase.read()
    }

    /// Initialize all agents in ascending tier order, then start the health
    /// loop and (when configured) auto-recovery.
    ///
    /// A failing agent leaves the coordinator in `Error` with the agents
    /// initialized so far still active; there is no automatic rollback.
    pub async fn start(self: &Arc<Self>) -> ApiaryResult<()> {
        {
            let mut phase = self.phase.write();
            if *phase != SwarmPhase::Stopped {
                return Err(ApiaryError::Lifecycle(format!(
                    "swarm is {phase}, cannot start"
                )));
            }
            *phase = SwarmPhase::Initializing;
        }

        if let Err(e) = self.validate_dependencies() {
            *self.phase.write() = SwarmPhase::Error;
            return Err(e);
        }

        info!(agents = self.agents.len(), "Swarm starting");
        for runtime in &self.agents {
            if let Err(e) = runtime.initialize().await {
                error!(agent = %runtime.id(), error = %e, "Swarm start failed");
                *self.phase.write() = SwarmPhase::Error;
                return Err(e);
            }
        }

        if self.config.auto_recovery {
            let handler = Arc::new(RecoveryHandler {
                coordinator: Arc::downgrade(self),
            });
            let sub = self.bus.subscribe(events::AGENT_ERROR, handler);
            *self.recovery_sub.lock() = Some(sub);
        }
        self.spawn_health_loop();

        *self.phase.write() = SwarmPhase::Running;
        *self.started_at.lock() = Some(Instant::now());
        info!("Swarm running");
        Ok(())
    }

    /// Every declared dependency must resolve to an instantiated agent in a
    /// strictly lower tier, so tier-ordered startup brings it up first.
    fn validate_dependencies(&self) -> ApiaryResult<()> {
        let tiers: HashMap<&str, u8> = self
            .agents
            .iter()
            .map(|r| (r.id(), r.config().tier))
            .collect();

        for runtime in &self.agents {
            let config = runtime.config();
            for dependency in &config.dependencies {
                match tiers.get(dependency.as_str()) {
                    None => {
                        return Err(ApiaryError::Lifecycle(format!(
                            "agent '{}' depends on '{dependency}', which is not part of the swarm",
                            config.id
                        )))
                    }
                    Some(dep_tier) if *dep_tier >= config.tier => {
                        return Err(ApiaryError::Lifecycle(format!(
                            "agent '{}' (tier {}) depends on '{dependency}' (tier {dep_tier}); \
                             dependencies must live in a strictly lower tier",
                            config.id, config.tier
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn spawn_health_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.health_check_interval_ms.max(10));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the loop samples
            // at the configured cadence after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.reclassify();
            }
        });
        *self.health_task.lock() = Some(handle);
    }

    /// Stateless reclassification from the current snapshot. Flapping
    /// between ticks is expected, not a bug.
    fn reclassify(&self) {
        let mut phase = self.phase.write();
        if !matches!(
            *phase,
            SwarmPhase::Running | SwarmPhase::Degraded | SwarmPhase::Error
        ) {
            return;
        }
        let total = self.agents.len();
        if total == 0 {
            return;
        }
        let unhealthy = self
            .agents
            .iter()
            .filter(|r| self.orchestrator.health_check(r.id()) == AgentHealth::Unhealthy)
            .count();

        let next = classify_phase(unhealthy, total);
        if next != *phase {
            info!(unhealthy, total, from = %*phase, to = %next, "Swarm health reclassified");
        }
        *phase = next;
    }

    /// Shut agents down sequentially in exactly reverse tier order. One
    /// agent's failure is logged and does not block the rest.
    pub async fn stop(&self) -> ApiaryResult<()> {
        {
            let phase = self.phase.read();
            if *phase == SwarmPhase::Stopped {
                return Ok(());
            }
        }
        info!("Swarm stopping");

        if let Some(sub) = self.recovery_sub.lock().take() {
            self.bus.unsubscribe(sub);
        }
        if let Some(handle) = self.health_task.lock().take() {
            handle.abort();
        }

        for runtime in self.agents.iter().rev() {
            if let Err(e) = runtime.shutdown().await {
                error!(agent = %runtime.id(), error = %e, "Agent shutdown failed; continuing");
            }
        }

        *self.phase.write() = SwarmPhase::Stopped;
        *self.started_at.lock() = None;
        info!("Swarm stopped");
        Ok(())
    }

    // Submission requires Running. A degraded swarm refuses new work until
    // the health loop reclassifies it.
    fn ensure_accepting(&self) -> ApiaryResult<()> {
        let phase = *self.phase.read();
        match phase {
            SwarmPhase::Running => Ok(()),
            other => Err(ApiaryError::Lifecycle(format!(
                "swarm is {other}, not accepting tasks"
            ))),
        }
    }

    /// Submit a task and resolve to its result. Routed by the orchestrator
    /// unless a target agent id is named.
    pub async fn submit_task(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        priority: TaskPriority,
        target: Option<&str>,
    ) -> ApiaryResult<TaskResult> {
        self.ensure_accepting()?;
        let task = Task::new(task_type, payload).with_priority(priority);
        self.dispatch(task, target).await
    }

    /// Submit a task without waiting for it; the returned task id pairs with
    /// [`EventBus::wait_for_task`] for observers that want the outcome.
    pub fn submit_task_detached(
        self: &Arc<Self>,
        task_type: &str,
        payload: serde_json::Value,
        priority: TaskPriority,
        target: Option<&str>,
    ) -> ApiaryResult<Uuid> {
        self.ensure_accepting()?;
        let task = Task::new(task_type, payload).with_priority(priority);
        let task_id = task.id;
        let target = target.map(String::from);
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.dispatch(task, target.as_deref()).await {
                warn!(task = %task_id, error = %e, "Detached task dispatch failed");
            }
        });
        Ok(task_id)
    }

    async fn dispatch(&self, task: Task, target: Option<&str>) -> ApiaryResult<TaskResult> {
        let agent_id = match target {
            Some(id) => id.to_string(),
            None => self
                .orchestrator
                .route_task(&task.task_type, task.priority, &[])?,
        };
        let runtime = self.agents_by_id.get(&agent_id).ok_or_else(|| {
            ApiaryError::Routing(format!("unknown target agent '{agent_id}'"))
        })?;

        self.tasks_submitted.fetch_add(1, Ordering::AcqRel);
        let result = runtime.submit_task(task).await?;
        if result.success {
            self.tasks_completed.fetch_add(1, Ordering::AcqRel);
        } else {
            self.tasks_failed.fetch_add(1, Ordering::AcqRel);
        }
        Ok(result)
    }

    /// Register a campaign and route a planning task for it. On success the
    /// campaign record picks up the planned channels and goes active.
    pub async fn submit_campaign(&self, campaign: Campaign) -> ApiaryResult<TaskResult> {
        self.ensure_accepting()?;

        let campaign_id = campaign.id;
        let mut record = campaign;
        record.status = CampaignStatus::Planning;
        record.updated_at = Utc::now();
        let payload = serde_json::json!({
            "budget_cents": record.budget_cents,
            "objective": record.objective,
            "campaign": record.name,
        });
        self.state.upsert_campaign(record);

        let task = Task::new("campaign.plan", payload)
            .with_metadata("campaign_id", serde_json::json!(campaign_id.to_string()));
        let result = self.dispatch(task, None).await?;

        if result.success {
            if let Some(mut stored) = self.state.get_campaign(campaign_id) {
                if let Some(allocations) = result
                    .data
                    .as_ref()
                    .and_then(|d| d.get("allocations"))
                    .and_then(|a| a.as_array())
                {
                    stored.channels = allocations
                        .iter()
                        .filter_map(|a| a.get("channel").and_then(|c| c.as_str()))
                        .map(String::from)
                        .collect();
                }
                stored.status = CampaignStatus::Active;
                stored.updated_at = Utc::now();
                self.state.upsert_campaign(stored);
            }
        }
        Ok(result)
    }

    /// Route a creative-generation task for a campaign and persist the
    /// resulting variants as draft creatives.
    pub async fn submit_creative(
        &self,
        campaign_id: Uuid,
        product: &str,
        format: &str,
    ) -> ApiaryResult<TaskResult> {
        self.ensure_accepting()?;
        if self.state.get_campaign(campaign_id).is_none() {
            return Err(ApiaryError::Validation(format!(
                "unknown campaign '{campaign_id}'"
            )));
        }

        let task = Task::new(
            "creative.generate",
            serde_json::json!({ "product": product, "format": format }),
        )
        .with_metadata("campaign_id", serde_json::json!(campaign_id.to_string()));
        let result = self.dispatch(task, None).await?;

        if result.success {
            if let Some(variants) = result
                .data
                .as_ref()
                .and_then(|d| d.get("variants"))
                .and_then(|v| v.as_array())
            {
                for variant in variants {
                    let headline = variant.get("headline").and_then(|h| h.as_str());
                    let body = variant.get("body").and_then(|b| b.as_str());
                    if let (Some(headline), Some(body)) = (headline, body) {
                        self.state
                            .upsert_creative(Creative::new(campaign_id, format, headline, body));
                    }
                }
            }
        }
        Ok(result)
    }

    /// Point-in-time swarm snapshot.
    pub fn status(&self) -> SwarmStatus {
        let agents = self
            .agents
            .iter()
            .map(|runtime| {
                let published = self.state.get_agent(runtime.id());
                AgentSnapshot {
                    id: runtime.id().to_string(),
                    tier: runtime.config().tier,
                    status: published
                        .map(|s| s.status)
                        .unwrap_or(AgentStatus::Offline),
                    health: self.orchestrator.health_check(runtime.id()),
                    queue_depth: runtime.queue_depth(),
                }
            })
            .collect();

        SwarmStatus {
            phase: *self.phase.read(),
            uptime_ms: self
                .started_at
                .lock()
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            agents,
            tasks_submitted: self.tasks_submitted.load(Ordering::Acquire),
            tasks_completed: self.tasks_completed.load(Ordering::Acquire),
            tasks_failed: self.tasks_failed.load(Ordering::Acquire),
        }
    }

    /// Restart one agent: shutdown, then a single initialize attempt. A
    /// failed recovery is logged, never retried.
    async fn recover_agent(&self, id: &str) {
        if matches!(
            *self.phase.read(),
            SwarmPhase::Stopped | SwarmPhase::Initializing
        ) {
            return;
        }
        let Some(runtime) = self.agents_by_id.get(id) else {
            warn!(agent = id, "Recovery requested for unknown agent");
            return;
        };
        // One recovery at a time per agent; overlapping error events drop.
        if !self.recovering.lock().insert(id.to_string()) {
            return;
        }

        info!(agent = id, "Auto-recovery: restarting agent");
        if let Err(e) = runtime.shutdown().await {
            warn!(agent = id, error = %e, "Auto-recovery: shutdown failed");
        }
        match runtime.initialize().await {
            Ok(()) => info!(agent = id, "Auto-recovery: agent restarted"),
            Err(e) => error!(agent = id, error = %e, "Auto-recovery failed; not retrying"),
        }
        self.recovering.lock().remove(id);
    }
}

/// Phase from the unhealthy share: none running, under half degraded, at or
/// above half error.
fn classify_phase(unhealthy: usize, total: usize) -> SwarmPhase {
    if unhealthy == 0 {
        SwarmPhase::Running
    } else if unhealthy * 2 < total {
        SwarmPhase::Degraded
    } else {
        SwarmPhase::Error
    }
}

struct RecoveryHandler {
    coordinator: Weak<SwarmCoordinator>,
}

#[async_trait]
impl EventHandler for RecoveryHandler {
    async fn handle(&self, event: DomainEvent) -> ApiaryResult<()> {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.recover_agent(&event.aggregate_id).await;
        }
        Ok(())
    }
}
