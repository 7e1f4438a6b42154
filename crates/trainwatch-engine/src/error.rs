use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid run config: {0}")]
    InvalidConfig(String),

    /// Failure raised inside the blocking training call. The message is the
    /// engine's raw text and is what the supervisor classifies.
    #[error("{0}")]
    Training(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("export to {format} failed: {message}")]
    Export { format: String, message: String },

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_error_displays_raw_message() {
        let err = EngineError::Training("RuntimeError: CUDA out of memory".to_string());
        assert_eq!(err.to_string(), "RuntimeError: CUDA out of memory");
    }

    #[test]
    fn test_export_error_names_format() {
        let err = EngineError::Export { format: "onnx".to_string(), message: "opset".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("onnx"));
        assert!(msg.contains("opset"));
    }
}
