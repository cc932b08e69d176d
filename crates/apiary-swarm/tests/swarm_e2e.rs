//! End-to-end swarm test over the standard marketing roster.
//!
//! Boots the full swarm (orchestrator + planner + writer + simulator +
//! analyst), drives campaigns and creatives through the coordinator's entry
//! points, and checks the event, state, and health surfaces agree.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use apiary_agents::standard_roster;
use apiary_bus::{EventBus, EventHandler};
use apiary_core::{
    events, ApiaryError, ApiaryResult, Campaign, CampaignStatus, DomainEvent, TaskPriority,
    TaskStatus,
};
use apiary_state::StateManager;
use apiary_swarm::{SwarmBuilder, SwarmConfig, SwarmPhase};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Recorder {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: DomainEvent) -> ApiaryResult<()> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

fn quiet_config() -> SwarmConfig {
    SwarmConfig {
        health_check_interval_ms: 3_600_000,
        auto_recovery: false,
        allowlist: None,
    }
}

fn full_swarm(
    config: SwarmConfig,
) -> (
    Arc<apiary_swarm::SwarmCoordinator>,
    Arc<StateManager>,
    Arc<EventBus>,
) {
    let state = Arc::new(StateManager::new());
    let bus = Arc::new(EventBus::new());
    let mut builder = SwarmBuilder::with_shared(config, Arc::clone(&state), Arc::clone(&bus));
    for handler in standard_roster() {
        builder = builder.with_agent(handler);
    }
    (builder.build(), state, bus)
}

#[tokio::test]
async fn test_full_roster_boots_and_stops() {
    let (swarm, state, _bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    assert_eq!(swarm.phase(), SwarmPhase::Running);
    assert_eq!(state.agent_count(), 5);
    for id in [
        "orchestrator",
        "campaign-planner",
        "creative-writer",
        "simulator",
        "analyst",
    ] {
        assert!(state.get_agent(id).is_some(), "missing agent {id}");
    }

    // Tier ordering is visible in the status snapshot.
    let status = swarm.status();
    let tiers: Vec<u8> = status.agents.iter().map(|a| a.tier).collect();
    let mut sorted = tiers.clone();
    sorted.sort_unstable();
    assert_eq!(tiers, sorted);

    swarm.stop().await.unwrap();
    assert_eq!(swarm.phase(), SwarmPhase::Stopped);
    assert_eq!(state.agent_count(), 0);

    // A stopped swarm rejects work.
    let rejected = swarm
        .submit_task("campaign.plan", serde_json::json!({}), TaskPriority::Normal, None)
        .await;
    assert!(matches!(rejected, Err(ApiaryError::Lifecycle(_))));
}

#[tokio::test]
async fn test_campaign_flows_through_planner() {
    let (swarm, state, _bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    let campaign = Campaign::new("Q3 Launch", "conversion", 250_000);
    let campaign_id = campaign.id;
    let result = swarm.submit_campaign(campaign).await.unwrap();
    assert!(result.success);

    let stored = state.get_campaign(campaign_id).unwrap();
    assert_eq!(stored.status, CampaignStatus::Active);
    assert!(stored.channels.contains(&"search".to_string()));

    let status = swarm.status();
    assert_eq!(status.tasks_submitted, 1);
    assert_eq!(status.tasks_completed, 1);

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_creatives_are_persisted_for_campaign() {
    let (swarm, state, _bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    let campaign = Campaign::new("Q3 Launch", "awareness", 100_000);
    let campaign_id = campaign.id;
    swarm.submit_campaign(campaign).await.unwrap();

    let result = swarm
        .submit_creative(campaign_id, "Apiary", "search_text")
        .await
        .unwrap();
    assert!(result.success);

    let creatives = state.creatives_for_campaign(campaign_id);
    assert!(!creatives.is_empty());
    assert!(creatives[0].headline.contains("Apiary"));

    // Creatives for a campaign nobody registered are rejected up front.
    let unknown = swarm
        .submit_creative(uuid::Uuid::new_v4(), "Apiary", "search_text")
        .await;
    assert!(matches!(unknown, Err(ApiaryError::Validation(_))));

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_task_keeps_correlation_and_marks_record() {
    let (swarm, state, bus) = full_swarm(quiet_config());
    let (tx, mut failed_events) = mpsc::unbounded_channel();
    bus.subscribe("task.failed", Arc::new(Recorder { tx }));
    swarm.start().await.unwrap();

    // Planner rejects a missing budget with a validation failure.
    let result = swarm
        .submit_task(
            "campaign.plan",
            serde_json::json!({"objective": "awareness"}),
            TaskPriority::Normal,
            None,
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("budget"));

    let event = failed_events.recv().await.unwrap();
    let task_id: uuid::Uuid = event.aggregate_id.parse().unwrap();
    let record = state.get_task(task_id).unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.context.correlation_id, event.correlation_id);

    let status = swarm.status();
    assert_eq!(status.tasks_failed, 1);

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_simulation_routes_by_capability() {
    let (swarm, _state, _bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    let result = swarm
        .submit_task(
            "campaign.simulate",
            serde_json::json!({"budget_cents": 50_000, "seed": 11, "iterations": 200}),
            TaskPriority::High,
            None,
        )
        .await
        .unwrap();
    assert!(result.success);
    let data = result.data.unwrap();
    assert!(data["conversions"]["mean"].as_f64().unwrap() > 0.0);

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_analyst_observes_swarm_activity() {
    let (swarm, _state, _bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    for _ in 0..3 {
        swarm
            .submit_task(
                "campaign.simulate",
                serde_json::json!({"budget_cents": 10_000, "iterations": 50}),
                TaskPriority::Normal,
                None,
            )
            .await
            .unwrap();
    }
    // Event delivery to the analyst is asynchronous.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = swarm
        .submit_task(
            "metrics.analyze",
            serde_json::json!({"metric": "conversions"}),
            TaskPriority::Normal,
            None,
        )
        .await
        .unwrap();
    assert!(report.success);
    let data = report.data.unwrap();
    assert!(data["observed"]["completed"].as_u64().unwrap() >= 3);
    assert!(data["warehouse"]["rows"].as_u64().is_some());

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_detached_submission_pairs_with_wait_for_task() {
    let (swarm, _state, bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    let task_id = swarm
        .submit_task_detached(
            "creative.generate",
            serde_json::json!({"product": "Apiary"}),
            TaskPriority::Normal,
            None,
        )
        .unwrap();

    let event = bus
        .wait_for_task(task_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(event.event_type, events::TASK_COMPLETED);
    assert_eq!(event.payload["agent"], "creative-writer");

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_unroutable_task_is_routing_error() {
    let (swarm, _state, _bus) = full_swarm(quiet_config());
    swarm.start().await.unwrap();

    let result = swarm
        .submit_task(
            "video.transcode",
            serde_json::json!({}),
            TaskPriority::Normal,
            None,
        )
        .await;
    assert!(matches!(result, Err(ApiaryError::Routing(_))));

    swarm.stop().await.unwrap();
}
