//! Node-side lifecycle: register, wait for a pushed model, train,
//! submit, repeat.
//!
//! The inbound push handler and the lifecycle loop run concurrently and
//! share one locked slot; the handler only writes and signals, all
//! waiting happens in the loop. Training and dataset access sit behind
//! the `Trainer` capability.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::model::{ModelPush, ParameterSet};
use crate::retry::{retry_async, RetryConfig};

/// Local training capability: maps the current parameters onto a new
/// parameter set using the node's private data. Errors abort this
/// round's submission; the node rejoins at the next push.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, current: &ParameterSet) -> Result<ParameterSet>;
}

/// Outbound calls to the coordinator.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    async fn register(&self, node_id: &str, endpoint: &str) -> Result<()>;
    async fn submit_update(
        &self,
        node_id: &str,
        round_number: u64,
        parameters: &ParameterSet,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Unregistered,
    Registering,
    Idle,
    Training,
    Submitting,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// How long one wait for a pushed model lasts before the node
    /// re-registers as a liveness probe.
    pub push_wait: Duration,
    /// Total submission attempts per round.
    pub submit_attempts: usize,
    pub submit_retry_delay: Duration,
    pub register_retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            push_wait: Duration::from_secs(120),
            submit_attempts: 3,
            submit_retry_delay: Duration::from_secs(5),
            register_retry: RetryConfig::default(),
        }
    }
}

/// Latest pushed model, written by the push handler under lock.
/// `fresh` is the "new model available" signal; the lifecycle loop
/// consumes it when it picks the model up.
#[derive(Debug)]
struct PushSlot {
    round_number: u64,
    parameters: ParameterSet,
    fresh: bool,
}

pub struct NodeAgent {
    node_id: String,
    endpoint: String,
    client: Arc<dyn CoordinatorClient>,
    trainer: Arc<dyn Trainer>,
    cfg: AgentConfig,
    slot: Mutex<PushSlot>,
    signal: Notify,
    phase: Mutex<AgentPhase>,
}

impl NodeAgent {
    pub fn new(
        node_id: impl Into<String>,
        endpoint: impl Into<String>,
        client: Arc<dyn CoordinatorClient>,
        trainer: Arc<dyn Trainer>,
        cfg: AgentConfig,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            endpoint: endpoint.into(),
            client,
            trainer,
            cfg,
            slot: Mutex::new(PushSlot {
                round_number: 0,
                parameters: ParameterSet::zero(),
                fresh: false,
            }),
            signal: Notify::new(),
            phase: Mutex::new(AgentPhase::Unregistered),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase.lock()
    }

    /// Inbound push handler. An absent model means "start from a fresh
    /// zero model"; malformed payloads never get this far because the
    /// wire decoding is typed. Writes and signals, never blocks.
    pub fn apply_pushed_model(&self, push: ModelPush) {
        let parameters = match push.global_model {
            Some(params) => params,
            None => {
                info!(node_id = %self.node_id, round = push.round_number, "no_global_model_initializing_zero_model");
                ParameterSet::zero()
            }
        };
        {
            let mut slot = self.slot.lock();
            slot.round_number = push.round_number;
            slot.parameters = parameters;
            slot.fresh = true;
        }
        self.signal.notify_one();
    }

    /// Registers with the coordinator, retrying a bounded number of
    /// times with backoff. The lifecycle cannot proceed without this.
    pub async fn register(&self) -> Result<()> {
        *self.phase.lock() = AgentPhase::Registering;
        let res = retry_async(&self.cfg.register_retry, |attempt| {
            if attempt > 0 {
                warn!(node_id = %self.node_id, attempt, "retrying_registration");
            }
            self.client.register(&self.node_id, &self.endpoint)
        })
        .await
        .context("registration with coordinator failed after retries");
        match res {
            Ok(()) => {
                *self.phase.lock() = AgentPhase::Idle;
                info!(node_id = %self.node_id, endpoint = %self.endpoint, "registered_with_coordinator");
                Ok(())
            }
            Err(e) => {
                *self.phase.lock() = AgentPhase::Unregistered;
                Err(e)
            }
        }
    }

    /// Waits up to `timeout` for a freshly pushed model. A push that
    /// arrived while the node was busy training is picked up immediately.
    pub async fn wait_for_model(&self, timeout: Duration) -> Option<(u64, ParameterSet)> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut slot = self.slot.lock();
                if slot.fresh {
                    slot.fresh = false;
                    return Some((slot.round_number, slot.parameters.clone()));
                }
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if tokio::time::timeout(remaining, self.signal.notified()).await.is_err() {
                return None;
            }
        }
    }

    /// Trains on the pushed model and submits the result. A trainer
    /// error aborts the submission (no partial update is sent); exhausted
    /// submission retries drop the update for this round.
    pub async fn run_training_round(&self, round_number: u64, pushed: ParameterSet) -> Result<()> {
        *self.phase.lock() = AgentPhase::Training;
        info!(node_id = %self.node_id, round = round_number, "local_training_started");
        let trained = match self.trainer.train(&pushed).await {
            Ok(params) => params,
            Err(e) => {
                *self.phase.lock() = AgentPhase::Idle;
                return Err(e.context("local training failed, aborting submission"));
            }
        };

        *self.phase.lock() = AgentPhase::Submitting;
        let retry = RetryConfig::fixed(self.cfg.submit_attempts, self.cfg.submit_retry_delay);
        let submitted = retry_async(&retry, |attempt| {
            if attempt > 0 {
                warn!(node_id = %self.node_id, round = round_number, attempt, "retrying_update_submission");
            }
            self.client.submit_update(&self.node_id, round_number, &trained)
        })
        .await;
        match submitted {
            Ok(()) => info!(node_id = %self.node_id, round = round_number, "update_acknowledged"),
            Err(e) => warn!(
                node_id = %self.node_id,
                round = round_number,
                error = %e,
                "update_dropped_after_retries"
            ),
        }
        *self.phase.lock() = AgentPhase::Idle;
        Ok(())
    }

    /// Full lifecycle: register once, then loop waiting for pushes. A
    /// wait timeout triggers re-registration (recovery from a missed
    /// push); only an exhausted registration retry budget exits the loop.
    pub async fn run(&self) -> Result<()> {
        self.register().await?;
        loop {
            match self.wait_for_model(self.cfg.push_wait).await {
                Some((round_number, pushed)) => {
                    if let Err(e) = self.run_training_round(round_number, pushed).await {
                        warn!(node_id = %self.node_id, round = round_number, error = %e, "round_skipped");
                    }
                }
                None => {
                    warn!(node_id = %self.node_id, "push_wait_timed_out_reregistering");
                    self.register().await?;
                }
            }
        }
    }
}
