use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A model artifact produced by `export`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    pub format: String,
    pub path: PathBuf,
    pub sha256: String,
}

pub fn sha256_file(path: &Path) -> EngineResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(format: &str, path: PathBuf) -> EngineResult<ExportArtifact> {
    if !path.exists() {
        return Err(EngineError::Export {
            format: format.to_string(),
            message: format!("artifact path does not exist: {}", path.display()),
        });
    }

    let hash = sha256_file(&path)?;
    Ok(ExportArtifact { format: format.to_string(), path, sha256: hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_make_artifact_hashes_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("model.onnx");
        std::fs::write(&path, b"abc").unwrap();

        let artifact = make_artifact("onnx", path).unwrap();
        assert_eq!(
            artifact.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_make_artifact_missing_path() {
        let temp = TempDir::new().unwrap();
        let err = make_artifact("onnx", temp.path().join("nope.onnx")).unwrap_err();
        assert!(matches!(err, EngineError::Export { .. }));
    }
}
