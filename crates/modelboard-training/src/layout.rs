use crate::error::TrainingResult;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Filesystem layout for datasets, results and trained models.
///
/// Default layout under a data root:
/// - `data/comparison_data.json`
/// - `results/leaderboard.json`
/// - `trained_models/<stem>.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    data_dir: PathBuf,
    results_dir: PathBuf,
    models_dir: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self::from_dirs(root.join("data"), root.join("results"), root.join("trained_models"))
    }

    #[must_use]
    pub fn from_dirs(data_dir: PathBuf, results_dir: PathBuf, models_dir: PathBuf) -> Self {
        Self { data_dir, results_dir, models_dir }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    #[must_use]
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    #[must_use]
    pub fn dataset_path(&self) -> PathBuf {
        self.data_dir.join("comparison_data.json")
    }

    #[must_use]
    pub fn leaderboard_path(&self) -> PathBuf {
        self.results_dir.join("leaderboard.json")
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.results_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        Ok(())
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The content is written to a temporary file in the same directory and renamed
/// over the target, so readers never observe a partially written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
