//! Supervisor error types.

use crate::classify::ErrorClassification;
use trainwatch_engine::EngineError;

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The pre-flight gate failed; nothing expensive was started.
    #[error("pre-flight validation failed: {}", issues.join("; "))]
    PreflightFailed { issues: Vec<String> },

    /// The blocking training call failed.
    #[error("training failed: {}", classification.title)]
    TrainingFailed { classification: Box<ErrorClassification> },

    /// Settings file could not be read or parsed.
    #[error("settings error: {0}")]
    Settings(String),

    /// A background task could not be joined.
    #[error("task error: {0}")]
    Task(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;
