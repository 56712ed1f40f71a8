use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, info};

use swarmlearn_core::{init_tracing, load_node_config, AgentConfig, NodeAgent, RetryConfig};

mod client;
mod http;
mod trainer;

use client::HttpCoordinatorClient;
use trainer::{Dataset, SgdTrainer};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("swarm-node")?;
    let cfg = load_node_config()?;
    info!(node_id = %cfg.node_id, endpoint = %cfg.endpoint, "starting_swarm_node");

    let dataset = match &cfg.dataset_path {
        Some(path) => Dataset::from_json_file(path)?,
        None => bail!("SWARM_DATASET_PATH must point at a local training dataset"),
    };

    let request_timeout = Duration::from_secs(cfg.request_timeout_secs);
    let client = Arc::new(HttpCoordinatorClient::new(&cfg.coordinator_endpoint, request_timeout)?);
    let agent_cfg = AgentConfig {
        push_wait: Duration::from_secs(cfg.push_wait_secs),
        submit_attempts: cfg.submit_attempts,
        submit_retry_delay: Duration::from_secs(cfg.submit_retry_delay_secs),
        register_retry: RetryConfig::default(),
    };
    let agent = Arc::new(NodeAgent::new(
        cfg.node_id.clone(),
        cfg.endpoint.clone(),
        client,
        Arc::new(SgdTrainer::new(dataset)),
        agent_cfg,
    ));

    let lifecycle = {
        let agent = agent.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.run().await {
                error!(error = %e, "node_lifecycle_exited");
            }
        })
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "node_listening");
    axum::serve(listener, http::app_router(agent)).await?;

    lifecycle.abort();
    Ok(())
}
