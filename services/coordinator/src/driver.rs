//! The round driver: the one task allowed to move a round through its
//! phases. Exactly one round is in flight at any time; round N+1 does
//! not start until round N's commit step has finished.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use swarmlearn_core::{CoordinatorConfig, RoundCoordinator};

pub async fn run_rounds(coordinator: Arc<RoundCoordinator>, cfg: CoordinatorConfig) {
    let quorum_timeout = Duration::from_secs(cfg.round_timeout_secs);
    let interval = Duration::from_secs(cfg.round_interval_secs);
    let mut completed = 0u64;

    loop {
        if cfg.max_rounds > 0 && completed >= cfg.max_rounds {
            info!(rounds = completed, "training_run_complete");
            return;
        }
        if coordinator.registered_nodes() == 0 {
            info!("no_nodes_registered_waiting");
            tokio::time::sleep(interval.max(Duration::from_secs(10))).await;
            continue;
        }
        tokio::time::sleep(interval).await;

        if coordinator.start_round() == 0 {
            // Registry emptied between the check and the snapshot.
            continue;
        }
        coordinator.distribute().await;
        coordinator.await_quorum(quorum_timeout).await;
        match coordinator.aggregate_and_commit().await {
            Ok(Some(model)) => {
                completed += 1;
                info!(round = model.round_number, completed, "round_driver_cycle_done");
            }
            Ok(None) => {
                // Abandoned round: nothing arrived; try again next cycle.
            }
            Err(e) => error!(error = %e, "round_aggregation_failed"),
        }
    }
}
