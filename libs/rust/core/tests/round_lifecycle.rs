//! In-process lifecycle tests: real coordinator, real agents, loopback
//! transport instead of HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use swarmlearn_core::{
    AgentConfig, CoordinatorClient, FsModelStore, InMemoryLedger, LedgerClient, ModelPush,
    ModelTransport, NodeAgent, ParameterSet, RetryConfig, RoundCoordinator, Trainer,
};

/// Delivers pushes straight into agent push handlers, keyed by endpoint.
#[derive(Default)]
struct LoopbackTransport {
    agents: Mutex<HashMap<String, Arc<NodeAgent>>>,
}

impl LoopbackTransport {
    fn connect(&self, endpoint: &str, agent: Arc<NodeAgent>) {
        self.agents.lock().insert(endpoint.to_string(), agent);
    }
}

#[async_trait]
impl ModelTransport for LoopbackTransport {
    async fn push_model(&self, endpoint: &str, push: &ModelPush) -> Result<()> {
        let agent = self
            .agents
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no agent at {endpoint}"))?;
        agent.apply_pushed_model(push.clone());
        Ok(())
    }
}

/// Calls the coordinator directly instead of going over the wire.
struct LoopbackClient {
    coordinator: Arc<RoundCoordinator>,
}

#[async_trait]
impl CoordinatorClient for LoopbackClient {
    async fn register(&self, node_id: &str, endpoint: &str) -> Result<()> {
        self.coordinator.register_node(node_id, endpoint);
        Ok(())
    }

    async fn submit_update(
        &self,
        node_id: &str,
        round_number: u64,
        parameters: &ParameterSet,
    ) -> Result<()> {
        self.coordinator
            .receive_update(node_id, round_number, parameters.clone())
            .map_err(Into::into)
    }
}

/// Returns the same fixed parameters every round, ignoring the push.
struct FixedTrainer {
    output: ParameterSet,
}

#[async_trait]
impl Trainer for FixedTrainer {
    async fn train(&self, _current: &ParameterSet) -> Result<ParameterSet> {
        Ok(self.output.clone())
    }
}

fn params(coefs: &[(&str, f64)], intercept: f64) -> ParameterSet {
    ParameterSet {
        coefficients: coefs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        intercept,
    }
}

fn fast_agent_cfg() -> AgentConfig {
    AgentConfig {
        push_wait: Duration::from_secs(2),
        submit_attempts: 3,
        submit_retry_delay: Duration::from_millis(5),
        register_retry: RetryConfig::fixed(3, Duration::from_millis(5)),
    }
}

struct Harness {
    coordinator: Arc<RoundCoordinator>,
    transport: Arc<LoopbackTransport>,
    ledger: Arc<InMemoryLedger>,
    _model_dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let model_dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(LoopbackTransport::default());
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(FsModelStore::new(model_dir.path()).unwrap());
    let coordinator = Arc::new(
        RoundCoordinator::new("coordinator-1", transport.clone(), ledger.clone(), store).unwrap(),
    );
    Harness { coordinator, transport, ledger, _model_dir: model_dir }
}

fn spawn_agent(h: &Harness, node_id: &str, output: ParameterSet) -> Arc<NodeAgent> {
    let endpoint = format!("loopback://{node_id}");
    let agent = Arc::new(NodeAgent::new(
        node_id,
        endpoint.clone(),
        Arc::new(LoopbackClient { coordinator: h.coordinator.clone() }),
        Arc::new(FixedTrainer { output }),
        fast_agent_cfg(),
    ));
    h.transport.connect(&endpoint, agent.clone());
    agent
}

#[tokio::test]
async fn two_nodes_complete_a_round_end_to_end() {
    let h = harness();
    let agent_a = spawn_agent(&h, "risk", params(&[("x", 1.0), ("y", 2.0)], 0.0));
    let agent_b = spawn_agent(&h, "crm", params(&[("y", 4.0), ("z", 6.0)], 2.0));

    // Agents run their full lifecycle loops concurrently with the driver.
    let a = agent_a.clone();
    let b = agent_b.clone();
    let task_a = tokio::spawn(async move { a.run().await });
    let task_b = tokio::spawn(async move { b.run().await });

    // Let both registrations land before snapshotting the registry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.registered_nodes(), 2);

    assert_eq!(h.coordinator.start_round(), 2);
    assert_eq!(h.coordinator.distribute().await, 2);
    let received = h.coordinator.await_quorum(Duration::from_secs(5)).await;
    assert_eq!(received, 2);

    let model = h.coordinator.aggregate_and_commit().await.unwrap().unwrap();
    assert_eq!(model.round_number, 1);
    assert_eq!(model.parameters.coefficients["x"], 1.0);
    assert_eq!(model.parameters.coefficients["y"], 3.0);
    assert_eq!(model.parameters.coefficients["z"], 6.0);
    assert_eq!(model.parameters.intercept, 1.0);

    let record = h.ledger.query(1).await.unwrap().expect("committed record");
    assert_eq!(record.model_hash, model.parameters.content_hash().unwrap());
    assert_eq!(record.aggregated_by, "coordinator-1");

    task_a.abort();
    task_b.abort();
}

#[tokio::test]
async fn consecutive_rounds_reuse_the_aggregated_model() {
    let h = harness();
    let agent = spawn_agent(&h, "solo", params(&[("x", 2.0)], 1.0));
    let a = agent.clone();
    let task = tokio::spawn(async move { a.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    for expected_round in 1..=3u64 {
        assert_eq!(h.coordinator.start_round(), 1);
        h.coordinator.distribute().await;
        h.coordinator.await_quorum(Duration::from_secs(5)).await;
        let model = h.coordinator.aggregate_and_commit().await.unwrap().unwrap();
        assert_eq!(model.round_number, expected_round);
        assert_eq!(model.parameters.coefficients["x"], 2.0);
    }
    assert_eq!(h.coordinator.current_round(), 3);
    for round in 1..=3u64 {
        assert!(h.ledger.query(round).await.unwrap().is_some());
    }
    task.abort();
}

#[tokio::test]
async fn unreachable_node_costs_only_its_own_contribution() {
    let h = harness();
    // "ghost" registers but has no loopback agent: its push fails.
    h.coordinator.register_node("ghost", "loopback://nowhere");
    let agent = spawn_agent(&h, "alive", params(&[("x", 5.0)], 0.5));
    let a = agent.clone();
    let task = tokio::spawn(async move { a.run().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.coordinator.start_round(), 2);
    // Only the live agent receives the push.
    assert_eq!(h.coordinator.distribute().await, 1);
    let received = h.coordinator.await_quorum(Duration::from_millis(500)).await;
    assert_eq!(received, 1);

    let model = h.coordinator.aggregate_and_commit().await.unwrap().unwrap();
    assert_eq!(model.parameters.coefficients["x"], 5.0);
    task.abort();
}
