//! Environment-driven configuration for both services.
//!
//! Layered the usual way: built-in defaults, then an optional config
//! file named by `SWARM_CONFIG_FILE`, then `SWARM_*` environment
//! variables (e.g. `SWARM_COORDINATOR_ID`, `SWARM_NODE_ID`,
//! `SWARM_LISTEN_PORT`).

use anyhow::Result;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub coordinator_id: String,
    pub listen_port: u16,
    /// Quorum wait per round, seconds.
    pub round_timeout_secs: u64,
    /// Pause between rounds, seconds.
    pub round_interval_secs: u64,
    /// Rounds to drive before stopping; 0 means run forever.
    pub max_rounds: u64,
    pub model_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_port: u16,
    /// Callback endpoint advertised to the coordinator. Derived from the
    /// hostname and listen port when left empty.
    pub endpoint: String,
    pub coordinator_endpoint: String,
    pub push_wait_secs: u64,
    pub submit_attempts: usize,
    pub submit_retry_delay_secs: u64,
    /// Per-call timeout for outbound HTTP, seconds.
    pub request_timeout_secs: u64,
    pub dataset_path: Option<String>,
}

fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
    config::Config::builder()
}

fn finish<T: for<'de> Deserialize<'de>>(
    mut b: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<T> {
    if let Ok(file) = std::env::var("SWARM_CONFIG_FILE") {
        b = b.add_source(config::File::with_name(&file).required(false));
    }
    b = b.add_source(config::Environment::with_prefix("SWARM").separator("__"));
    Ok(b.build()?.try_deserialize()?)
}

pub fn load_coordinator_config() -> Result<CoordinatorConfig> {
    let b = builder()
        .set_default("coordinator_id", "coordinator-default")?
        .set_default("listen_port", 5000_i64)?
        .set_default("round_timeout_secs", 60_i64)?
        .set_default("round_interval_secs", 5_i64)?
        .set_default("max_rounds", 5_i64)?
        .set_default("model_dir", "models")?;
    finish(b)
}

pub fn load_node_config() -> Result<NodeConfig> {
    let default_id = format!("swarm-node-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let b = builder()
        .set_default("node_id", default_id)?
        .set_default("listen_port", 5001_i64)?
        .set_default("endpoint", "")?
        .set_default("coordinator_endpoint", "http://localhost:5000")?
        .set_default("push_wait_secs", 120_i64)?
        .set_default("submit_attempts", 3_i64)?
        .set_default("submit_retry_delay_secs", 5_i64)?
        .set_default("request_timeout_secs", 5_i64)?;
    let mut cfg: NodeConfig = finish(b)?;
    if cfg.endpoint.is_empty() {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        cfg.endpoint = format!("http://{host}:{}", cfg.listen_port);
    }
    Ok(cfg)
}
