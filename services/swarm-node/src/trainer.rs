//! Reference local trainer: one SGD pass over squared error on an
//! in-memory dataset. The lifecycle only depends on the `Trainer`
//! capability, so swapping in a real training backend touches nothing
//! else.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use swarmlearn_core::{ParameterSet, Trainer};

#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    pub features: BTreeMap<String, f64>,
    pub target: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading dataset {}", path.display()))?;
        let dataset: Dataset = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding dataset {}", path.display()))?;
        if dataset.samples.is_empty() {
            bail!("dataset {} contains no samples", path.display());
        }
        info!(path = %path.display(), samples = dataset.samples.len(), "dataset_loaded");
        Ok(dataset)
    }
}

/// Constant-rate SGD on squared error, starting from the pushed global
/// parameters. Coefficients for features unseen in the global model are
/// created at zero and learned from the local data, which is what makes
/// each node's parameter set sparse.
pub struct SgdTrainer {
    dataset: Dataset,
    learning_rate: f64,
    epochs: usize,
}

impl SgdTrainer {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset, learning_rate: 0.01, epochs: 1 }
    }

    pub fn with_hyperparameters(dataset: Dataset, learning_rate: f64, epochs: usize) -> Self {
        Self { dataset, learning_rate, epochs }
    }
}

#[async_trait]
impl Trainer for SgdTrainer {
    async fn train(&self, current: &ParameterSet) -> Result<ParameterSet> {
        if self.dataset.samples.is_empty() {
            bail!("cannot train on an empty dataset");
        }
        let mut coefficients = current.coefficients.clone();
        let mut intercept = current.intercept;

        for _ in 0..self.epochs {
            for sample in &self.dataset.samples {
                let prediction = intercept
                    + sample
                        .features
                        .iter()
                        .map(|(f, v)| coefficients.get(f).copied().unwrap_or(0.0) * v)
                        .sum::<f64>();
                let error = prediction - sample.target;
                for (feature, value) in &sample.features {
                    let coef = coefficients.entry(feature.clone()).or_insert(0.0);
                    *coef -= self.learning_rate * error * value;
                }
                intercept -= self.learning_rate * error;
            }
        }

        Ok(ParameterSet { coefficients, intercept })
    }
}
