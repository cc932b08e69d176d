//! Shared concurrent state registry.
//!
//! The [`StateManager`] is a process-wide registry of agent states, tasks,
//! campaigns, and creatives. It is constructed once at process start and
//! injected by `Arc` into every agent and the coordinator.
//!
//! All operations are safe under concurrent invocation from any agent's
//! execution context; maps sit behind `parking_lot` read-write locks held
//! only for the duration of the operation, never across an await.
//!
//! [`StateManager::update_task`] applies a partial patch with last-writer-wins
//! semantics. There is no versioning: two concurrent patches touching the
//! same field race, and the later write wins. Known limitation, kept.

use apiary_core::{
    AgentConfig, AgentState, AgentStatus, ApiaryError, ApiaryResult, Campaign, Creative, Task,
    TaskStatus,
};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

struct AgentRecord {
    config: AgentConfig,
    state: AgentState,
}

/// A partial update applied to a stored task.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New status, if any.
    pub status: Option<TaskStatus>,
    /// Replacement payload, if any.
    pub payload: Option<serde_json::Value>,
    /// New retry count, if any.
    pub retry_count: Option<u32>,
}

impl TaskPatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Patch the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Patch the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }
}

/// Process-wide concurrent registry of agents, tasks, campaigns, and
/// creatives.
pub struct StateManager {
    agents: RwLock<HashMap<String, AgentRecord>>,
    // capability -> agent ids, maintained at registration/removal so routing
    // never scans the full agent table. BTreeSet keeps candidate order stable.
    capability_index: RwLock<HashMap<String, BTreeSet<String>>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    creatives: RwLock<HashMap<Uuid, Creative>>,
}

impl StateManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            capability_index: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            campaigns: RwLock::new(HashMap::new()),
            creatives: RwLock::new(HashMap::new()),
        }
    }

    // --- Agents ---

    /// Register an agent's config and initial state.
    ///
    /// Fails when the id is already registered; agents deregister on shutdown
    /// before they can be registered again.
    pub fn register_agent(&self, config: AgentConfig, state: AgentState) -> ApiaryResult<()> {
        let mut agents = self.agents.write();
        if agents.contains_key(&config.id) {
            return Err(ApiaryError::State(format!(
                "agent '{}' is already registered",
                config.id
            )));
        }

        let mut index = self.capability_index.write();
        for capability in &config.capabilities {
            index
                .entry(capability.clone())
                .or_default()
                .insert(config.id.clone());
        }

        agents.insert(config.id.clone(), AgentRecord { config, state });
        Ok(())
    }

    /// Remove an agent and its capability-index entries. Returns `false`
    /// when the id is unknown.
    pub fn remove_agent(&self, id: &str) -> bool {
        let mut agents = self.agents.write();
        let Some(record) = agents.remove(id) else {
            return false;
        };

        let mut index = self.capability_index.write();
        for capability in &record.config.capabilities {
            if let Some(ids) = index.get_mut(capability) {
                ids.remove(id);
                if ids.is_empty() {
                    index.remove(capability);
                }
            }
        }
        true
    }

    /// Set an agent's status.
    pub fn update_agent_status(&self, id: &str, status: AgentStatus) -> ApiaryResult<()> {
        self.update_agent(id, |state| state.status = status)
    }

    /// Apply a closure patch to an agent's published state.
    pub fn update_agent<F>(&self, id: &str, patch: F) -> ApiaryResult<()>
    where
        F: FnOnce(&mut AgentState),
    {
        let mut agents = self.agents.write();
        let record = agents
            .get_mut(id)
            .ok_or_else(|| ApiaryError::State(format!("unknown agent '{id}'")))?;
        patch(&mut record.state);
        Ok(())
    }

    /// Snapshot one agent's published state.
    pub fn get_agent(&self, id: &str) -> Option<AgentState> {
        self.agents.read().get(id).map(|r| r.state.clone())
    }

    /// An agent's immutable config.
    pub fn agent_config(&self, id: &str) -> Option<AgentConfig> {
        self.agents.read().get(id).map(|r| r.config.clone())
    }

    /// Snapshot all agent states, ordered by agent id.
    pub fn list_agents(&self) -> Vec<AgentState> {
        let agents = self.agents.read();
        let mut states: Vec<AgentState> = agents.values().map(|r| r.state.clone()).collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        states
    }

    /// Number of registered agents.
    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    /// Ids of agents holding `capability`, in stable (sorted) order.
    pub fn agents_with_capability(&self, capability: &str) -> Vec<String> {
        self.capability_index
            .read()
            .get(capability)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    // --- Tasks ---

    /// Store a task record.
    pub fn add_task(&self, task: Task) {
        self.tasks.write().insert(task.id, task);
    }

    /// Apply a partial patch to a task, restamping `updated_at`.
    /// Last writer wins per field.
    pub fn update_task(&self, id: Uuid, patch: TaskPatch) -> ApiaryResult<()> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| ApiaryError::State(format!("unknown task '{id}'")))?;
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(payload) = patch.payload {
            task.payload = payload;
        }
        if let Some(retry_count) = patch.retry_count {
            task.retry_count = retry_count;
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Snapshot one task.
    pub fn get_task(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().get(&id).cloned()
    }

    /// Number of stored tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Snapshot all tasks currently in `status`, ordered by creation time.
    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<Task> {
        let tasks = self.tasks.read();
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|t| t.created_at);
        matching
    }

    // --- Campaigns ---

    /// Insert or replace a campaign record.
    pub fn upsert_campaign(&self, campaign: Campaign) {
        self.campaigns.write().insert(campaign.id, campaign);
    }

    /// Snapshot one campaign.
    pub fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.read().get(&id).cloned()
    }

    /// Snapshot all campaigns, ordered by creation time.
    pub fn list_campaigns(&self) -> Vec<Campaign> {
        let campaigns = self.campaigns.read();
        let mut all: Vec<Campaign> = campaigns.values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    // --- Creatives ---

    /// Insert or replace a creative record.
    pub fn upsert_creative(&self, creative: Creative) {
        self.creatives.write().insert(creative.id, creative);
    }

    /// Snapshot one creative.
    pub fn get_creative(&self, id: Uuid) -> Option<Creative> {
        self.creatives.read().get(&id).cloned()
    }

    /// Snapshot all creatives belonging to a campaign, ordered by creation
    /// time.
    pub fn creatives_for_campaign(&self, campaign_id: Uuid) -> Vec<Creative> {
        let creatives = self.creatives.read();
        let mut matching: Vec<Creative> = creatives
            .values()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect();
        matching.sort_by_key(|c| c.created_at);
        matching
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use apiary_core::TaskPriority;
    use std::sync::Arc;

    fn planner_config() -> AgentConfig {
        AgentConfig::new("campaign-planner", 2).with_capability("campaign.plan")
    }

    #[test]
    fn test_register_and_lookup() {
        let state = StateManager::new();
        let config = planner_config();
        state
            .register_agent(config, AgentState::new("campaign-planner"))
            .unwrap();

        assert_eq!(state.agent_count(), 1);
        assert_eq!(
            state.get_agent("campaign-planner").unwrap().status,
            AgentStatus::Offline
        );
        assert_eq!(state.agent_config("campaign-planner").unwrap().tier, 2);
    }

    #[test]
    fn test_double_registration_fails() {
        let state = StateManager::new();
        state
            .register_agent(planner_config(), AgentState::new("campaign-planner"))
            .unwrap();
        let result = state.register_agent(planner_config(), AgentState::new("campaign-planner"));
        assert!(matches!(result, Err(ApiaryError::State(_))));
    }

    #[test]
    fn test_capability_index_tracks_registration() {
        let state = StateManager::new();
        state
            .register_agent(planner_config(), AgentState::new("campaign-planner"))
            .unwrap();
        state
            .register_agent(
                AgentConfig::new("backup-planner", 2).with_capability("campaign.plan"),
                AgentState::new("backup-planner"),
            )
            .unwrap();

        // Sorted order is part of the contract: it makes routing tie-breaks
        // deterministic.
        assert_eq!(
            state.agents_with_capability("campaign.plan"),
            vec!["backup-planner", "campaign-planner"]
        );

        assert!(state.remove_agent("backup-planner"));
        assert_eq!(
            state.agents_with_capability("campaign.plan"),
            vec!["campaign-planner"]
        );

        assert!(state.remove_agent("campaign-planner"));
        assert!(state.agents_with_capability("campaign.plan").is_empty());
    }

    #[test]
    fn test_update_unknown_agent_fails() {
        let state = StateManager::new();
        let result = state.update_agent_status("ghost", AgentStatus::Idle);
        assert!(matches!(result, Err(ApiaryError::State(_))));
    }

    #[test]
    fn test_agent_status_update() {
        let state = StateManager::new();
        state
            .register_agent(planner_config(), AgentState::new("campaign-planner"))
            .unwrap();
        state
            .update_agent_status("campaign-planner", AgentStatus::Idle)
            .unwrap();
        assert_eq!(
            state.get_agent("campaign-planner").unwrap().status,
            AgentStatus::Idle
        );
    }

    #[test]
    fn test_task_patch_keeps_unpatched_fields() {
        let state = StateManager::new();
        let task = Task::new("campaign.plan", serde_json::json!({"budget_cents": 1000}))
            .with_priority(TaskPriority::High);
        let id = task.id;
        let created_at = task.created_at;
        state.add_task(task);

        state
            .update_task(id, TaskPatch::new().with_status(TaskStatus::Processing))
            .unwrap();

        let stored = state.get_task(id).unwrap();
        assert_eq!(stored.status, TaskStatus::Processing);
        assert_eq!(stored.priority, TaskPriority::High);
        assert_eq!(stored.payload, serde_json::json!({"budget_cents": 1000}));
        assert_eq!(stored.created_at, created_at);
        assert!(stored.updated_at >= created_at);
    }

    #[test]
    fn test_update_unknown_task_fails() {
        let state = StateManager::new();
        let result = state.update_task(Uuid::new_v4(), TaskPatch::new());
        assert!(matches!(result, Err(ApiaryError::State(_))));
    }

    #[test]
    fn test_tasks_with_status() {
        let state = StateManager::new();
        let t1 = Task::new("a", serde_json::Value::Null);
        let t2 = Task::new("b", serde_json::Value::Null);
        let t2_id = t2.id;
        state.add_task(t1);
        state.add_task(t2);

        state
            .update_task(t2_id, TaskPatch::new().with_status(TaskStatus::Completed))
            .unwrap();

        assert_eq!(state.tasks_with_status(TaskStatus::Pending).len(), 1);
        assert_eq!(state.tasks_with_status(TaskStatus::Completed).len(), 1);
        assert_eq!(state.task_count(), 2);
    }

    #[test]
    fn test_campaign_and_creative_registry() {
        let state = StateManager::new();
        let campaign = Campaign::new("Q3 Launch", "awareness", 500_000);
        let campaign_id = campaign.id;
        state.upsert_campaign(campaign);

        let creative = Creative::new(campaign_id, "search_text", "Try Apiary", "Ship faster.");
        let other = Creative::new(Uuid::new_v4(), "social_image", "Other", "Other body");
        state.upsert_creative(creative);
        state.upsert_creative(other);

        assert!(state.get_campaign(campaign_id).is_some());
        assert_eq!(state.list_campaigns().len(), 1);
        assert_eq!(state.creatives_for_campaign(campaign_id).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_task_updates_settle() {
        let state = Arc::new(StateManager::new());
        let task = Task::new("campaign.plan", serde_json::Value::Null);
        let id = task.id;
        state.add_task(task);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state
                    .update_task(id, TaskPatch::new().with_status(TaskStatus::Processing))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Last writer wins; all writers agreed here.
        assert_eq!(state.get_task(id).unwrap().status, TaskStatus::Processing);
    }
}
