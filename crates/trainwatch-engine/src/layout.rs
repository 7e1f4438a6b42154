use crate::config::TrainConfig;
use crate::error::EngineResult;
use std::path::{Path, PathBuf};

/// Filesystem layout of one training run.
///
/// Default layout is `<project>/<name>/...` with weights under `weights/`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn for_config(config: &TrainConfig) -> Self {
        Self::new(config.project.join(&config.name))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn weights_dir(&self) -> PathBuf {
        self.root.join("weights")
    }

    #[must_use]
    pub fn last_checkpoint(&self) -> PathBuf {
        self.weights_dir().join("last.pt")
    }

    #[must_use]
    pub fn best_checkpoint(&self) -> PathBuf {
        self.weights_dir().join("best.pt")
    }

    /// Per-epoch metrics table written by the engine.
    #[must_use]
    pub fn results_csv(&self) -> PathBuf {
        self.root.join("results.csv")
    }

    #[must_use]
    pub fn visualizations_dir(&self) -> PathBuf {
        self.root.join("visualizations")
    }

    pub fn ensure_dirs(&self) -> EngineResult<()> {
        std::fs::create_dir_all(self.weights_dir())?;
        Ok(())
    }
}
