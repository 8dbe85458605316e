use crate::error::{TrainingError, TrainingResult};
use crate::layout::write_json_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Reference to a saved model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// File stem, as shown to clients and stored on leaderboard entries.
    pub file: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

impl ArtifactRef {
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// On-disk model payload: enough to rebuild and run the model without retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredModel {
    pub architecture: String,
    pub classes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub weights: serde_json::Value,
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Trained models stored as `<stem>.json` under one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `stem`. Stems containing path separators are rejected.
    pub fn path_for(&self, stem: &str) -> TrainingResult<PathBuf> {
        let valid = !stem.is_empty()
            && stem != "."
            && stem != ".."
            && !stem.contains(['/', '\\'])
            && !stem.contains('\0');
        if !valid {
            return Err(TrainingError::Artifact(format!("invalid artifact name: {stem:?}")));
        }
        Ok(self.root.join(format!("{stem}.json")))
    }

    pub fn save_model(&self, stem: &str, model: &StoredModel) -> TrainingResult<ArtifactRef> {
        let path = self.path_for(stem)?;
        write_json_atomic(&path, model)?;
        let sha256 = sha256_file(&path)?;
        let size_bytes = std::fs::metadata(&path)?.len();
        Ok(ArtifactRef { file: stem.to_string(), path, sha256, size_bytes })
    }

    pub fn load_model(&self, stem: &str) -> TrainingResult<StoredModel> {
        let path = self.path_for(stem)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrainingError::Artifact(format!("model file not found: {stem}")));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[must_use]
    pub fn exists(&self, stem: &str) -> bool {
        self.path_for(stem).is_ok_and(|p| p.is_file())
    }

    /// Size on disk in MB, if the artifact exists.
    #[must_use]
    pub fn size_mb(&self, stem: &str) -> Option<f64> {
        let path = self.path_for(stem).ok()?;
        let len = std::fs::metadata(path).ok()?.len();
        Some(len as f64 / (1024.0 * 1024.0))
    }

    /// Delete an artifact. Returns `false` when it was already gone.
    pub fn delete(&self, stem: &str) -> TrainingResult<bool> {
        let path = self.path_for(stem)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
