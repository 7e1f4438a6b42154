use crate::config::TrainConfig;
use crate::error::{EngineError, EngineResult};
use crate::hooks::TrainingCallbacks;
use crate::results::{DetectionResult, RunResult, ValidationMetrics};
use crate::simulated::SimulatedEngine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Input to a prediction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictInput {
    /// Fixed-shape synthetic batch (`batch` x 3 x `imgsz` x `imgsz`).
    Synthetic { batch: usize, imgsz: u32 },
    Images(Vec<PathBuf>),
}

impl PredictInput {
    #[must_use]
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Synthetic { batch, .. } => *batch,
            Self::Images(paths) => paths.len(),
        }
    }
}

/// Blocking inference against the engine's current model.
pub trait Predictor: Send + Sync {
    /// Returns one result per image in the input.
    fn predict(&self, input: &PredictInput) -> EngineResult<Vec<DetectionResult>>;

    /// Waits for queued device work to finish. No-op on CPU backends.
    fn synchronize(&self) {}
}

/// External program a backend needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub program: String,
    #[serde(default = "default_version_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

fn default_version_args() -> Vec<String> {
    vec!["--version".to_string()]
}

/// Narrow interface to the component that owns the model, the optimisation
/// loop and the checkpoint format. Every call blocks.
pub trait TrainingEngine: Send + Sync {
    fn id(&self) -> &'static str;

    /// Runs training to completion, invoking `callbacks` along the way. With
    /// `config.resume` set, continues from the last checkpoint instead.
    fn train(&self, config: &TrainConfig, callbacks: &dyn TrainingCallbacks) -> EngineResult<RunResult>;

    fn validate(&self, config: &TrainConfig) -> EngineResult<ValidationMetrics>;

    /// Exports the trained model, returning the artifact path.
    fn export(&self, format: &str) -> EngineResult<PathBuf>;

    fn predictor(&self) -> Arc<dyn Predictor>;

    /// Reads the raw metadata mapping stored in a checkpoint.
    fn read_checkpoint(&self, path: &Path) -> EngineResult<serde_json::Value> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Checkpoint(format!("{}: {e}", path.display())))
    }

    /// Programs probed during pre-flight validation.
    fn dependencies(&self) -> Vec<DependencySpec> {
        Vec::new()
    }
}

/// Resolves an engine identifier (as given on the command line).
pub fn engine_by_id(id: &str) -> EngineResult<Arc<dyn TrainingEngine>> {
    match id {
        "simulated" => Ok(Arc::new(SimulatedEngine::default())),
        other => Err(EngineError::UnknownEngine(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_by_id() {
        assert_eq!(engine_by_id("simulated").unwrap().id(), "simulated");
        assert!(matches!(engine_by_id("nope"), Err(EngineError::UnknownEngine(_))));
    }

    #[test]
    fn test_predict_input_batch_size() {
        assert_eq!(PredictInput::Synthetic { batch: 4, imgsz: 640 }.batch_size(), 4);
        assert_eq!(PredictInput::Images(vec![PathBuf::from("a.jpg")]).batch_size(), 1);
    }

    #[test]
    fn test_dependency_spec_defaults() {
        let spec: DependencySpec = serde_json::from_str(r#"{"name": "git", "program": "git"}"#).unwrap();
        assert_eq!(spec.args, vec!["--version".to_string()]);
        assert!(!spec.required);
    }
}
