//! `apiary` — boot and drive the marketing agent swarm.

mod config;

use apiary_agents::standard_roster;
use apiary_core::{Campaign, TaskPriority};
use apiary_swarm::{SwarmBuilder, SwarmConfig, SwarmCoordinator};
use clap::{Parser, Subcommand};
use config::ApiaryConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apiary", about = "Apiary — marketing agent swarm runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "apiary.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the swarm and run until interrupted
    Start {
        /// Health-loop interval in milliseconds (overrides config)
        #[arg(long)]
        health_interval_ms: Option<u64>,
        /// Disable auto-recovery (overrides config)
        #[arg(long)]
        no_recovery: bool,
    },
    /// Start the swarm, run a sample campaign end to end, and stop
    Demo,
    /// Validate the config and print the per-tier agent roster
    CheckConfig,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .json()
        .init();
}

fn build_swarm(config: SwarmConfig) -> Arc<SwarmCoordinator> {
    let mut builder = SwarmBuilder::new(config);
    for handler in standard_roster() {
        builder = builder.with_agent(handler);
    }
    builder.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ApiaryConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Start {
            health_interval_ms,
            no_recovery,
        } => {
            init_tracing(&config.log_level);
            let mut swarm_config = config.swarm;
            if let Some(interval) = health_interval_ms {
                swarm_config.health_check_interval_ms = interval;
            }
            if no_recovery {
                swarm_config.auto_recovery = false;
            }
            run_until_interrupted(swarm_config).await
        }
        Commands::Demo => {
            init_tracing(&config.log_level);
            run_demo(config.swarm).await
        }
        Commands::CheckConfig => {
            print_roster(&config.swarm);
            Ok(())
        }
    }
}

async fn run_until_interrupted(config: SwarmConfig) -> anyhow::Result<()> {
    let swarm = build_swarm(config);
    swarm
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("swarm start failed: {e}"))?;

    let mut status_ticker = tokio::time::interval(Duration::from_secs(60));
    status_ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status_ticker.tick() => {
                let status = swarm.status();
                info!(
                    phase = %status.phase,
                    uptime_ms = status.uptime_ms,
                    submitted = status.tasks_submitted,
                    completed = status.tasks_completed,
                    failed = status.tasks_failed,
                    "Swarm status"
                );
            }
        }
    }

    info!("Termination signal received, stopping swarm");
    swarm
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("swarm stop failed: {e}"))?;
    Ok(())
}

async fn run_demo(config: SwarmConfig) -> anyhow::Result<()> {
    let swarm = build_swarm(config);
    swarm
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("swarm start failed: {e}"))?;

    let campaign = Campaign::new("Demo Launch", "conversion", 250_000);
    let campaign_id = campaign.id;

    let plan = swarm.submit_campaign(campaign).await?;
    println!(
        "campaign plan: {}",
        serde_json::to_string_pretty(&plan.data)?
    );

    let creatives = swarm
        .submit_creative(campaign_id, "Apiary", "search_text")
        .await?;
    println!(
        "creatives: {}",
        serde_json::to_string_pretty(&creatives.data)?
    );

    let simulation = swarm
        .submit_task(
            "campaign.simulate",
            serde_json::json!({"budget_cents": 250_000, "seed": 42}),
            TaskPriority::High,
            None,
        )
        .await?;
    println!(
        "simulation: {}",
        serde_json::to_string_pretty(&simulation.data)?
    );

    // Let the analyst's event subscriptions catch up before asking for stats.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let analysis = swarm
        .submit_task(
            "metrics.analyze",
            serde_json::json!({"metric": "conversions"}),
            TaskPriority::Normal,
            None,
        )
        .await?;
    println!(
        "analysis: {}",
        serde_json::to_string_pretty(&analysis.data)?
    );

    let status = swarm.status();
    println!(
        "swarm: phase={} submitted={} completed={} failed={}",
        status.phase, status.tasks_submitted, status.tasks_completed, status.tasks_failed
    );

    swarm.stop().await?;
    Ok(())
}

fn print_roster(config: &SwarmConfig) {
    let swarm = build_swarm(config.clone());
    println!("config ok");
    println!(
        "health interval: {} ms, auto-recovery: {}",
        config.health_check_interval_ms, config.auto_recovery
    );
    let mut current_tier = 0;
    for runtime in swarm.agents() {
        let agent = runtime.config();
        if agent.tier != current_tier {
            current_tier = agent.tier;
            println!("tier {current_tier}:");
        }
        println!(
            "  {} (capabilities: {}, max concurrency: {})",
            agent.id,
            agent.capabilities.join(", "),
            agent.max_concurrency
        );
    }
}
