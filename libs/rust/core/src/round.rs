//! Round-synchronization state machine.
//!
//! Drives one distribute -> collect -> aggregate -> commit cycle at a
//! time. A single mutex covers the node registry and the in-flight
//! round state; the only suspension point is `await_quorum`, which
//! waits on a completion signal created fresh for each round. Network
//! calls never run under the lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::aggregator;
use crate::error::CoreError;
use crate::ledger::LedgerClient;
use crate::model::{GlobalModel, ModelPush, ParameterSet};
use crate::registry::{NodeRegistry, NodeStatus};
use crate::store::ModelStore;
use crate::transport::ModelTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Idle,
    Distributing,
    Collecting,
    Aggregating,
    Committing,
    Skipped,
}

/// Per-round collection state, created fresh by `start_round` and
/// discarded after aggregation. `expected_count` is fixed at
/// distribution time; late registrations wait for the next round.
#[derive(Debug)]
struct RoundState {
    round_number: u64,
    expected_count: usize,
    participants: BTreeMap<String, String>,
    received: BTreeMap<String, ParameterSet>,
    closed: bool,
}

impl RoundState {
    fn empty() -> Self {
        Self {
            round_number: 0,
            expected_count: 0,
            participants: BTreeMap::new(),
            received: BTreeMap::new(),
            closed: false,
        }
    }
}

struct Inner {
    phase: RoundPhase,
    current_round: u64,
    registry: NodeRegistry,
    round: RoundState,
    completion: Arc<Notify>,
    global: Option<ParameterSet>,
}

static ROUND_METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("swarmlearn_rounds"));

struct RoundMetrics {
    updates_total: Counter<u64>,
    rounds_completed: Counter<u64>,
    rounds_skipped: Counter<u64>,
    aggregation_latency_ms: Histogram<f64>,
}

impl RoundMetrics {
    fn new() -> Self {
        Self {
            updates_total: ROUND_METER
                .u64_counter("swarmlearn_updates_total")
                .with_description("Model updates accepted across all rounds")
                .build(),
            rounds_completed: ROUND_METER
                .u64_counter("swarmlearn_rounds_completed_total")
                .with_description("Rounds that produced an aggregated model")
                .build(),
            rounds_skipped: ROUND_METER
                .u64_counter("swarmlearn_rounds_skipped_total")
                .with_description("Rounds skipped or abandoned without aggregation")
                .build(),
            aggregation_latency_ms: ROUND_METER
                .f64_histogram("swarmlearn_aggregation_latency_ms")
                .with_description("Aggregation latency (ms)")
                .build(),
        }
    }
}

/// Status snapshot served by the coordinator's HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub coordinator_id: String,
    pub current_round: u64,
    pub phase: RoundPhase,
    pub registered_nodes: usize,
    pub expected_count: usize,
    pub received_count: usize,
    pub has_global_model: bool,
}

pub struct RoundCoordinator {
    coordinator_id: String,
    transport: Arc<dyn ModelTransport>,
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn ModelStore>,
    inner: Mutex<Inner>,
    metrics: RoundMetrics,
}

impl RoundCoordinator {
    /// Builds a coordinator, resuming the global model and round counter
    /// from the latest persisted snapshot when one exists.
    pub fn new(
        coordinator_id: impl Into<String>,
        transport: Arc<dyn ModelTransport>,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn ModelStore>,
    ) -> Result<Self> {
        let coordinator_id = coordinator_id.into();
        let (current_round, global) = match store.load_latest()? {
            Some(snapshot) => {
                info!(
                    coordinator_id = %coordinator_id,
                    round = snapshot.round_number,
                    "resumed_global_model_from_snapshot"
                );
                (snapshot.round_number, Some(snapshot.parameters))
            }
            None => {
                info!(coordinator_id = %coordinator_id, "no_existing_global_model");
                (0, None)
            }
        };
        Ok(Self {
            coordinator_id,
            transport,
            ledger,
            store,
            inner: Mutex::new(Inner {
                phase: RoundPhase::Idle,
                current_round,
                registry: NodeRegistry::new(),
                round: RoundState::empty(),
                completion: Arc::new(Notify::new()),
                global,
            }),
            metrics: RoundMetrics::new(),
        })
    }

    pub fn register_node(&self, node_id: &str, endpoint: &str) -> bool {
        self.inner.lock().registry.register(node_id, endpoint)
    }

    pub fn remove_node(&self, node_id: &str) {
        self.inner.lock().registry.remove(node_id);
    }

    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) {
        self.inner.lock().registry.set_status(node_id, status);
    }

    pub fn registered_nodes(&self) -> usize {
        self.inner.lock().registry.active_len()
    }

    pub fn current_round(&self) -> u64 {
        self.inner.lock().current_round
    }

    pub fn global_model(&self) -> Option<ParameterSet> {
        self.inner.lock().global.clone()
    }

    pub fn status(&self) -> CoordinatorStatus {
        let inner = self.inner.lock();
        CoordinatorStatus {
            coordinator_id: self.coordinator_id.clone(),
            current_round: inner.current_round,
            phase: inner.phase,
            registered_nodes: inner.registry.active_len(),
            expected_count: inner.round.expected_count,
            received_count: inner.round.received.len(),
            has_global_model: inner.global.is_some(),
        }
    }

    /// Opens the next round: bumps the round counter, snapshots the
    /// registry, resets collection state and the completion signal.
    /// Returns the number of expected participants; zero means the round
    /// was skipped and had no other side effects.
    pub fn start_round(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.current_round += 1;
        let participants = inner.registry.list();
        if participants.is_empty() {
            inner.phase = RoundPhase::Skipped;
            self.metrics.rounds_skipped.add(1, &[]);
            warn!(round = inner.current_round, "no_nodes_registered_round_skipped");
            return 0;
        }
        let expected = participants.len();
        inner.round = RoundState {
            round_number: inner.current_round,
            expected_count: expected,
            participants,
            received: BTreeMap::new(),
            closed: false,
        };
        inner.completion = Arc::new(Notify::new());
        inner.phase = RoundPhase::Distributing;
        info!(round = inner.current_round, expected, "round_started");
        expected
    }

    /// Pushes the current global model to every participant in the
    /// round's snapshot. Per-node delivery failures are logged and do not
    /// abort the round; a missed push is recovered by that node's own
    /// timeout-driven re-registration, so there is no retry here.
    pub async fn distribute(&self) -> usize {
        let (push, participants) = {
            let inner = self.inner.lock();
            if inner.phase != RoundPhase::Distributing {
                return 0;
            }
            (
                ModelPush {
                    round_number: inner.round.round_number,
                    global_model: inner.global.clone(),
                },
                inner.round.participants.clone(),
            )
        };
        let mut delivered = 0;
        for (node_id, endpoint) in &participants {
            match self.transport.push_model(endpoint, &push).await {
                Ok(()) => {
                    delivered += 1;
                    info!(node_id, round = push.round_number, "global_model_pushed");
                }
                Err(e) => {
                    warn!(node_id, endpoint, error = %e, "model_push_failed");
                }
            }
        }
        self.inner.lock().phase = RoundPhase::Collecting;
        delivered
    }

    /// Accepts one node's update for the current round. The quorum check
    /// happens under the same lock as the insertion, so it can never race
    /// with a concurrent duplicate.
    pub fn receive_update(
        &self,
        node_id: &str,
        round_number: u64,
        parameters: ParameterSet,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, RoundPhase::Distributing | RoundPhase::Collecting) {
            warn!(node_id, round = round_number, "update_outside_open_round");
            return Err(CoreError::RoundNotOpen);
        }
        if round_number != inner.round.round_number {
            warn!(
                node_id,
                got = round_number,
                expected = inner.round.round_number,
                "out_of_round_update_ignored"
            );
            return Err(CoreError::StaleRound { expected: inner.round.round_number, got: round_number });
        }
        if inner.round.received.contains_key(node_id) {
            warn!(node_id, round = round_number, "duplicate_update_ignored");
            return Err(CoreError::DuplicateSubmission { node_id: node_id.to_string() });
        }
        inner.round.received.insert(node_id.to_string(), parameters);
        self.metrics.updates_total.add(1, &[]);
        info!(node_id, round = round_number, received = inner.round.received.len(), "update_received");
        if inner.round.received.len() >= inner.round.expected_count {
            inner.round.closed = true;
            inner.completion.notify_one();
            info!(round = round_number, "all_expected_updates_received");
        }
        Ok(())
    }

    /// Blocks the round driver until quorum is signaled or the timeout
    /// elapses. A partial quorum at timeout is an accepted outcome; the
    /// round proceeds with whatever arrived.
    pub async fn await_quorum(&self, timeout: Duration) -> usize {
        let completion = {
            let inner = self.inner.lock();
            if inner.round.closed {
                return inner.round.received.len();
            }
            inner.completion.clone()
        };
        let signaled = tokio::time::timeout(timeout, completion.notified()).await.is_ok();
        let mut inner = self.inner.lock();
        inner.round.closed = true;
        let received = inner.round.received.len();
        if !signaled && received < inner.round.expected_count {
            warn!(
                round = inner.round.round_number,
                received,
                expected = inner.round.expected_count,
                "quorum_timeout_proceeding_with_partial_updates"
            );
        }
        received
    }

    /// Aggregates whatever the round collected, persists the snapshot,
    /// and anchors its hash on the ledger. An empty round is abandoned:
    /// the model is carried forward unchanged and nothing is committed.
    /// Ledger and persistence failures are advisory.
    pub async fn aggregate_and_commit(&self) -> Result<Option<GlobalModel>> {
        let (round_number, updates) = {
            let mut inner = self.inner.lock();
            inner.phase = RoundPhase::Aggregating;
            let updates: Vec<ParameterSet> = inner.round.received.values().cloned().collect();
            (inner.round.round_number, updates)
        };

        if updates.is_empty() {
            warn!(round = round_number, "no_updates_received_round_abandoned");
            self.metrics.rounds_skipped.add(1, &[]);
            self.inner.lock().phase = RoundPhase::Idle;
            return Ok(None);
        }

        let started = Instant::now();
        let aggregated = aggregator::aggregate(&updates)?;
        self.metrics
            .aggregation_latency_ms
            .record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let model = GlobalModel { round_number, parameters: aggregated };
        {
            let mut inner = self.inner.lock();
            inner.global = Some(model.parameters.clone());
            inner.round = RoundState::empty();
            inner.phase = RoundPhase::Committing;
        }

        if let Err(e) = self.store.save_snapshot(&model) {
            warn!(round = round_number, error = %e, "model_snapshot_save_failed");
        }

        let hash = model.parameters.content_hash()?;
        match self.ledger.commit(round_number, &hash, &self.coordinator_id).await {
            Ok(()) => info!(round = round_number, hash = %hash, "aggregation_hash_committed"),
            Err(e) => warn!(round = round_number, error = %e, "ledger_commit_failed_continuing"),
        }

        self.metrics.rounds_completed.add(1, &[]);
        self.inner.lock().phase = RoundPhase::Idle;
        info!(round = round_number, models = updates.len(), "round_complete");
        Ok(Some(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use async_trait::async_trait;

    /// Transport that records pushes; endpoints listed in `fail` error out.
    #[derive(Default)]
    struct RecordingTransport {
        pushes: Mutex<Vec<(String, ModelPush)>>,
        fail: Vec<String>,
    }

    #[async_trait]
    impl ModelTransport for RecordingTransport {
        async fn push_model(&self, endpoint: &str, push: &ModelPush) -> Result<()> {
            if self.fail.iter().any(|f| f == endpoint) {
                anyhow::bail!("connection refused");
            }
            self.pushes.lock().push((endpoint.to_string(), push.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStore {
        snapshots: Mutex<Vec<GlobalModel>>,
    }

    impl ModelStore for MemStore {
        fn save_snapshot(&self, model: &GlobalModel) -> Result<()> {
            self.snapshots.lock().push(model.clone());
            Ok(())
        }
        fn load_latest(&self) -> Result<Option<GlobalModel>> {
            Ok(self.snapshots.lock().last().cloned())
        }
        fn load_round(&self, round_number: u64) -> Result<Option<GlobalModel>> {
            Ok(self
                .snapshots
                .lock()
                .iter()
                .find(|m| m.round_number == round_number)
                .cloned())
        }
    }

    fn params(coefs: &[(&str, f64)], intercept: f64) -> ParameterSet {
        ParameterSet {
            coefficients: coefs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            intercept,
        }
    }

    fn coordinator() -> (Arc<RoundCoordinator>, Arc<RecordingTransport>, Arc<InMemoryLedger>, Arc<MemStore>) {
        let transport = Arc::new(RecordingTransport::default());
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(MemStore::default());
        let coord = Arc::new(
            RoundCoordinator::new("coordinator-test", transport.clone(), ledger.clone(), store.clone())
                .unwrap(),
        );
        (coord, transport, ledger, store)
    }

    #[tokio::test]
    async fn empty_registry_skips_round_without_side_effects() {
        let (coord, transport, ledger, store) = coordinator();
        assert_eq!(coord.start_round(), 0);
        assert_eq!(coord.status().phase, RoundPhase::Skipped);
        // Round counter advanced but nothing was pushed, stored, or committed.
        assert_eq!(coord.current_round(), 1);
        assert!(transport.pushes.lock().is_empty());
        assert!(ledger.query(1).await.unwrap().is_none());
        assert!(store.snapshots.lock().is_empty());
        assert!(coord.global_model().is_none());
    }

    #[tokio::test]
    async fn stale_round_submission_is_rejected_without_state_change() {
        let (coord, _, _, _) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        coord.start_round();
        coord.distribute().await;

        let err = coord.receive_update("n1", 99, params(&[("x", 1.0)], 0.0)).unwrap_err();
        assert_eq!(err, CoreError::StaleRound { expected: 1, got: 99 });
        assert_eq!(coord.status().received_count, 0);
    }

    #[tokio::test]
    async fn premature_submission_before_any_round_is_rejected() {
        let (coord, _, _, _) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        let err = coord.receive_update("n1", 0, params(&[("x", 1.0)], 0.0)).unwrap_err();
        assert_eq!(err, CoreError::RoundNotOpen);
    }

    #[tokio::test]
    async fn duplicate_submission_keeps_the_first_update() {
        let (coord, _, _, _) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        coord.register_node("n2", "http://n2:5001");
        coord.start_round();
        coord.distribute().await;

        coord.receive_update("n1", 1, params(&[("x", 1.0)], 0.0)).unwrap();
        let err = coord.receive_update("n1", 1, params(&[("x", 9.0)], 9.0)).unwrap_err();
        assert_eq!(err, CoreError::DuplicateSubmission { node_id: "n1".into() });
        assert_eq!(coord.status().received_count, 1);

        coord.receive_update("n2", 1, params(&[("x", 3.0)], 0.0)).unwrap();
        let model = coord.aggregate_and_commit().await.unwrap().unwrap();
        // First n1 value (1.0) survives, not the duplicate's 9.0.
        assert_eq!(model.parameters.coefficients["x"], 2.0);
    }

    #[tokio::test]
    async fn quorum_releases_waiter_before_timeout() {
        let (coord, _, _, _) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        coord.start_round();
        coord.distribute().await;
        coord.receive_update("n1", 1, params(&[("x", 1.0)], 0.0)).unwrap();

        // Must return well inside the outer guard, not after 60s.
        let received = tokio::time::timeout(
            Duration::from_millis(200),
            coord.await_quorum(Duration::from_secs(60)),
        )
        .await
        .expect("await_quorum should short-circuit at quorum");
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn timeout_round_aggregates_the_partial_subset() {
        let (coord, _, ledger, _) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        coord.register_node("n2", "http://n2:5001");
        coord.start_round();
        coord.distribute().await;
        coord.receive_update("n1", 1, params(&[("x", 4.0)], 2.0)).unwrap();

        let received = coord.await_quorum(Duration::from_millis(20)).await;
        assert_eq!(received, 1);

        let model = coord.aggregate_and_commit().await.unwrap().unwrap();
        assert_eq!(model.parameters.coefficients["x"], 4.0);
        assert_eq!(model.parameters.intercept, 2.0);
        assert!(ledger.query(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_arrivals_abandons_round_but_advances_counter() {
        let (coord, _, ledger, store) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        coord.start_round();
        coord.distribute().await;
        coord.await_quorum(Duration::from_millis(20)).await;

        assert!(coord.aggregate_and_commit().await.unwrap().is_none());
        assert_eq!(coord.current_round(), 1);
        assert!(coord.global_model().is_none());
        assert!(ledger.query(1).await.unwrap().is_none());
        assert!(store.snapshots.lock().is_empty());

        // Next round uses the incremented counter.
        assert_eq!(coord.start_round(), 1);
        assert_eq!(coord.current_round(), 2);
    }

    #[tokio::test]
    async fn push_failure_to_one_node_does_not_abort_distribution() {
        let transport = Arc::new(RecordingTransport {
            pushes: Mutex::new(Vec::new()),
            fail: vec!["http://down:5001".into()],
        });
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(MemStore::default());
        let coord =
            RoundCoordinator::new("coordinator-test", transport.clone(), ledger, store).unwrap();
        coord.register_node("up", "http://up:5001");
        coord.register_node("down", "http://down:5001");
        coord.start_round();

        assert_eq!(coord.distribute().await, 1);
        let pushes = transport.pushes.lock();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, "http://up:5001");
        // The healthy node can still contribute.
        drop(pushes);
        coord.receive_update("up", 1, params(&[("x", 1.0)], 0.0)).unwrap();
    }

    #[tokio::test]
    async fn full_round_commits_matching_hash_and_snapshot() {
        let (coord, transport, ledger, store) = coordinator();
        coord.register_node("a", "http://a:5001");
        coord.register_node("b", "http://b:5001");
        assert_eq!(coord.start_round(), 2);
        coord.distribute().await;
        assert_eq!(transport.pushes.lock().len(), 2);

        coord.receive_update("a", 1, params(&[("x", 1.0), ("y", 2.0)], 0.0)).unwrap();
        coord.receive_update("b", 1, params(&[("y", 4.0), ("z", 6.0)], 2.0)).unwrap();
        coord.await_quorum(Duration::from_secs(5)).await;

        let model = coord.aggregate_and_commit().await.unwrap().unwrap();
        assert_eq!(model.parameters.coefficients["x"], 1.0);
        assert_eq!(model.parameters.coefficients["y"], 3.0);
        assert_eq!(model.parameters.coefficients["z"], 6.0);
        assert_eq!(model.parameters.intercept, 1.0);

        let record = ledger.query(1).await.unwrap().unwrap();
        assert_eq!(record.model_hash, model.parameters.content_hash().unwrap());
        assert_eq!(record.aggregated_by, "coordinator-test");
        assert_eq!(store.load_round(1).unwrap().unwrap(), model);
        assert_eq!(coord.status().phase, RoundPhase::Idle);
    }

    #[tokio::test]
    async fn late_registration_does_not_raise_expected_count() {
        let (coord, _, _, _) = coordinator();
        coord.register_node("n1", "http://n1:5001");
        coord.start_round();
        coord.distribute().await;
        coord.register_node("late", "http://late:5001");

        // Quorum is still one: the original snapshot closes the round.
        coord.receive_update("n1", 1, params(&[("x", 1.0)], 0.0)).unwrap();
        let received = tokio::time::timeout(
            Duration::from_millis(200),
            coord.await_quorum(Duration::from_secs(60)),
        )
        .await
        .expect("snapshot quorum should have closed the round");
        assert_eq!(received, 1);
    }
}
