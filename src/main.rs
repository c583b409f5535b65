//! SwarmBot coordinator entry point.
//!
//! Intentionally thin: CLI parsing and subcommands are out of scope (configuration
//! is environment/file driven, see `infrastructure::config`). Loads configuration,
//! initializes logging, wires the coordinator with a handful of demo agent
//! specializations, and runs until a shutdown signal arrives.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};

use swarmbot::adapters::agents::{CodeAgent, MonitorAgent, ResearchAgent, TaskManagerAgent, ValidatorAgent};
use swarmbot::infrastructure::config::ConfigLoader;
use swarmbot::infrastructure::logging::LoggerImpl;
use swarmbot::services::AgentRegistration;
use swarmbot::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _logger = LoggerImpl::init(&config.logging).context("failed to initialize logging")?;

    let coordinator = Coordinator::new(config.coordinator);

    coordinator
        .register_agent(AgentRegistration {
            name: "research-1".to_string(),
            role: "research".to_string(),
            capabilities: HashSet::from(["research".to_string()]),
            max_concurrent: 1,
            handle: Arc::new(ResearchAgent),
        })
        .await;
    coordinator
        .register_agent(AgentRegistration {
            name: "code-1".to_string(),
            role: "code".to_string(),
            capabilities: HashSet::from(["code".to_string()]),
            max_concurrent: 1,
            handle: Arc::new(CodeAgent),
        })
        .await;
    coordinator
        .register_agent(AgentRegistration {
            name: "task-manager-1".to_string(),
            role: "task-manager".to_string(),
            capabilities: HashSet::from(["task-manager".to_string()]),
            max_concurrent: 1,
            handle: Arc::new(TaskManagerAgent),
        })
        .await;
    coordinator
        .register_agent(AgentRegistration {
            name: "monitor-1".to_string(),
            role: "monitor".to_string(),
            capabilities: HashSet::from(["monitor".to_string()]),
            max_concurrent: 1,
            handle: Arc::new(MonitorAgent),
        })
        .await;
    coordinator
        .register_agent(AgentRegistration {
            name: "validator-1".to_string(),
            role: "validator".to_string(),
            capabilities: HashSet::from(["validator".to_string()]),
            max_concurrent: 1,
            handle: Arc::new(ValidatorAgent),
        })
        .await;

    coordinator.start().await;
    tracing::info!("swarmbot coordinator started");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining agents");

    coordinator.stop().await;
    Ok(())
}
