//! Trainwatch Engine
//!
//! The narrow interface between the supervisor and the component that owns
//! the model:
//! - Run parameters and on-disk run layout (`TrainConfig`, `RunLayout`)
//! - Typed result contracts (`RunResult`, `ValidationMetrics`, `DetectionResult`)
//! - Hooks invoked during the blocking training call (`TrainingCallbacks`)
//! - The engine itself (`TrainingEngine`, `Predictor`)

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod layout;
pub mod results;
pub mod simulated;

pub use artifacts::{make_artifact, sha256_file, ExportArtifact};
pub use config::{Augmentation, Device, LossWeights, TrainConfig};
pub use engine::{engine_by_id, DependencySpec, PredictInput, Predictor, TrainingEngine};
pub use error::{EngineError, EngineResult};
pub use hooks::{HookAction, NoopCallbacks, TrainingCallbacks};
pub use layout::RunLayout;
pub use results::{
    ConfidenceStats, Detection, DetectionResult, EpochReport, LossComponents, MetricSet, RunResult,
    StageTimings, TrainStartInfo, ValidationMetrics,
};
pub use simulated::{SimulatedEngine, SimulatedPredictor};
