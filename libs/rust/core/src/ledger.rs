//! Append-only ledger interface for anchoring aggregation hashes.
//!
//! The coordinator treats commits as advisory: a ledger failure is
//! logged and never blocks round completion. The in-memory client keeps
//! the chaincode's semantics (positive round, non-empty fields, no
//! overwrite of an already-committed round).

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub round_number: u64,
    pub model_hash: String,
    pub aggregated_by: String,
    pub timestamp: i64,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn commit(&self, round_number: u64, model_hash: &str, aggregated_by: &str)
        -> Result<()>;
    async fn query(&self, round_number: u64) -> Result<Option<AggregationRecord>>;
}

/// In-process ledger for local deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<BTreeMap<u64, AggregationRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn commit(
        &self,
        round_number: u64,
        model_hash: &str,
        aggregated_by: &str,
    ) -> Result<()> {
        if round_number == 0 {
            bail!("round number must be positive");
        }
        if model_hash.is_empty() {
            bail!("model hash cannot be empty");
        }
        if aggregated_by.is_empty() {
            bail!("aggregator id cannot be empty");
        }
        let mut records = self.records.lock();
        if records.contains_key(&round_number) {
            bail!("hash for round {round_number} already recorded, refusing to overwrite");
        }
        let record = AggregationRecord {
            round_number,
            model_hash: model_hash.to_string(),
            aggregated_by: aggregated_by.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };
        info!(round = round_number, hash = model_hash, by = aggregated_by, "ledger_commit");
        records.insert(round_number, record);
        Ok(())
    }

    async fn query(&self, round_number: u64) -> Result<Option<AggregationRecord>> {
        Ok(self.records.lock().get(&round_number).cloned())
    }
}
