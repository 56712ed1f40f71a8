use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use swarmlearn_core::{
    init_tracing, load_coordinator_config, FsModelStore, InMemoryLedger, LedgerClient,
    RoundCoordinator,
};

mod driver;
mod http;
mod transport;

use http::{app_router, AppState};
use transport::HttpModelTransport;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("coordinator-service")?;
    let cfg = load_coordinator_config()?;
    info!(coordinator_id = %cfg.coordinator_id, port = cfg.listen_port, "starting_coordinator");

    let transport = Arc::new(HttpModelTransport::new(Duration::from_secs(5))?);
    let ledger: Arc<dyn LedgerClient> = Arc::new(InMemoryLedger::new());
    let store = Arc::new(FsModelStore::new(&cfg.model_dir)?);
    let coordinator = Arc::new(RoundCoordinator::new(
        cfg.coordinator_id.clone(),
        transport,
        ledger.clone(),
        store,
    )?);

    let driver = tokio::spawn(driver::run_rounds(coordinator.clone(), cfg.clone()));

    let state = AppState { coordinator, ledger };
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "coordinator_listening");
    axum::serve(listener, app_router(state)).await?;

    driver.abort();
    Ok(())
}
