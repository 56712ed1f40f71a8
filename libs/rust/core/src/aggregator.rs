//! Sparse federated averaging.
//!
//! Feature sets across nodes need not match: each coefficient is the
//! mean over exactly the inputs that contain that feature, not a
//! zero-filled mean over all inputs. The intercept is always dense.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::CoreError;
use crate::model::ParameterSet;

/// Combines per-node parameter sets into one global set.
///
/// A feature present in k of n inputs is averaged over k terms. Fails on
/// empty input; the caller decides whether that abandons the round.
pub fn aggregate(inputs: &[ParameterSet]) -> Result<ParameterSet, CoreError> {
    if inputs.is_empty() {
        return Err(CoreError::EmptyAggregation);
    }

    let mut sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut intercept_sum = 0.0;

    for params in inputs {
        for (feature, weight) in &params.coefficients {
            *sums.entry(feature.clone()).or_insert(0.0) += weight;
            *counts.entry(feature.clone()).or_insert(0) += 1;
        }
        intercept_sum += params.intercept;
    }

    let coefficients = sums
        .into_iter()
        .map(|(feature, sum)| {
            let count = counts[&feature] as f64;
            (feature, sum / count)
        })
        .collect();

    info!(models = inputs.len(), "models_aggregated");
    Ok(ParameterSet { coefficients, intercept: intercept_sum / inputs.len() as f64 })
}
