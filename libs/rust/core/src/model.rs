//! Typed model parameters and wire payloads shared by the coordinator
//! and node services. Coefficients live in a `BTreeMap` so the JSON
//! encoding is canonical (sorted keys) and content hashes are stable.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sparse linear-model parameters: feature name -> weight, plus intercept.
/// Constructed fresh on every training or aggregation step, never mutated
/// in place once handed off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub coefficients: BTreeMap<String, f64>,
    pub intercept: f64,
}

impl ParameterSet {
    /// The zero model: no coefficients, zero intercept. Nodes start from
    /// this when the coordinator has no global model yet.
    pub fn zero() -> Self {
        Self { coefficients: BTreeMap::new(), intercept: 0.0 }
    }

    pub fn from_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            coefficients: features.into_iter().map(|f| (f.into(), 0.0)).collect(),
            intercept: 0.0,
        }
    }

    /// Hex SHA-256 over the canonical (sorted-key) JSON encoding.
    pub fn content_hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Global model snapshot as persisted per completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalModel {
    pub round_number: u64,
    pub parameters: ParameterSet,
}

/// Coordinator -> node push. `global_model: None` means "no global model
/// exists yet, initialize a fresh zero model"; it is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPush {
    pub round_number: u64,
    pub global_model: Option<ParameterSet>,
}

/// Node -> coordinator registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub endpoint: String,
}

/// Node -> coordinator update submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitUpdateRequest {
    pub node_id: String,
    pub round_number: u64,
    pub parameters: ParameterSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Failure,
}

/// Uniform `{status, message}` reply shape for all coordinator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: ApiStatus,
    pub message: String,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self { status: ApiStatus::Success, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { status: ApiStatus::Failure, message: message.into() }
    }
}
