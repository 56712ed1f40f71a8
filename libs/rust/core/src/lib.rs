//! Core library for the swarm-learning platform: data model, round
//! coordination and node lifecycle state machines, sparse aggregation,
//! and the capability interfaces (transport, ledger, model store,
//! trainer) the services plug into.

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing::info;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Initializes the process-wide subscriber: env-filtered fmt output,
/// JSON when `SWARM_JSON_LOG` is set. Safe to call more than once.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let json = std::env::var("SWARM_JSON_LOG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let builder = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env());
        let res = if json {
            builder.json().flatten_event(true).try_init()
        } else {
            builder.with_target(true).with_line_number(true).try_init()
        };
        res.map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))
    })?;
    info!(service, "tracing_initialized");
    Ok(())
}

pub mod aggregator;
pub mod agent;
pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod retry;
pub mod round;
pub mod store;
pub mod transport;

pub use agent::{AgentConfig, AgentPhase, CoordinatorClient, NodeAgent, Trainer};
pub use aggregator::aggregate;
pub use config::{load_coordinator_config, load_node_config, CoordinatorConfig, NodeConfig};
pub use error::CoreError;
pub use ledger::{AggregationRecord, InMemoryLedger, LedgerClient};
pub use model::{
    ApiResponse, ApiStatus, GlobalModel, ModelPush, ParameterSet, RegisterRequest,
    SubmitUpdateRequest,
};
pub use registry::{NodeRecord, NodeRegistry, NodeStatus};
pub use retry::{retry_async, RetryConfig};
pub use round::{CoordinatorStatus, RoundCoordinator, RoundPhase};
pub use store::{FsModelStore, ModelStore};
pub use transport::ModelTransport;
