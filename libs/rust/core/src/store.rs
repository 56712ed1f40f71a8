//! Per-round global-model persistence.
//!
//! One immutable JSON snapshot per completed round plus a `latest`
//! pointer, so a restarted coordinator resumes from where it left off.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::model::GlobalModel;

pub trait ModelStore: Send + Sync {
    fn save_snapshot(&self, model: &GlobalModel) -> Result<()>;
    fn load_latest(&self) -> Result<Option<GlobalModel>>;
    fn load_round(&self, round_number: u64) -> Result<Option<GlobalModel>>;
}

/// Filesystem store: `global_model_round_{n}.json` per round plus
/// `latest_global_model.json`.
#[derive(Debug)]
pub struct FsModelStore {
    dir: PathBuf,
}

impl FsModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating model dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn round_path(&self, round_number: u64) -> PathBuf {
        self.dir.join(format!("global_model_round_{round_number}.json"))
    }

    fn latest_path(&self) -> PathBuf {
        self.dir.join("latest_global_model.json")
    }

    fn read_model(path: &Path) -> Result<Option<GlobalModel>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let model = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", path.display()))?;
        Ok(Some(model))
    }
}

impl ModelStore for FsModelStore {
    fn save_snapshot(&self, model: &GlobalModel) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(model)?;
        let round_path = self.round_path(model.round_number);
        fs::write(&round_path, &bytes)
            .with_context(|| format!("writing {}", round_path.display()))?;
        fs::write(self.latest_path(), &bytes).context("writing latest snapshot")?;
        info!(round = model.round_number, path = %round_path.display(), "model_snapshot_saved");
        Ok(())
    }

    fn load_latest(&self) -> Result<Option<GlobalModel>> {
        Self::read_model(&self.latest_path())
    }

    fn load_round(&self, round_number: u64) -> Result<Option<GlobalModel>> {
        Self::read_model(&self.round_path(round_number))
    }
}
