use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use modelboard_training::{ArtifactStore, write_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LeaderboardError, RunSummary, SortField};

#[derive(Debug, Default, Deserialize)]
struct LeaderboardFile {
    #[serde(default)]
    results: Vec<RunSummary>,
}

#[derive(Serialize)]
struct LeaderboardFileRef<'a> {
    results: &'a [RunSummary],
}

/// Ordered collection of completed runs, persisted as `{"results": [...]}`.
///
/// Insertion order is completion order. Every mutation rewrites the whole file
/// while the write lock is held.
#[derive(Debug)]
pub struct LeaderboardStore {
    path: Option<PathBuf>,
    entries: RwLock<Vec<RunSummary>>,
    artifacts: ArtifactStore,
}

impl LeaderboardStore {
    /// Load from `path`, starting empty when the file is missing, unreadable or corrupt.
    pub fn open(path: PathBuf, artifacts: ArtifactStore) -> Self {
        let entries = Self::load(&path);
        info!(path = %path.display(), entries = entries.len(), "leaderboard loaded");
        Self { path: Some(path), entries: RwLock::new(entries), artifacts }
    }

    /// A leaderboard that is never written to disk.
    #[must_use]
    pub fn in_memory(artifacts: ArtifactStore) -> Self {
        Self { path: None, entries: RwLock::new(Vec::new()), artifacts }
    }

    fn load(path: &Path) -> Vec<RunSummary> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "leaderboard unreadable, starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_slice::<LeaderboardFile>(&bytes) {
            Ok(file) => file.results,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "leaderboard corrupt, starting empty");
                Vec::new()
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RunSummary>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RunSummary>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rewrite the backing file. Failures are logged; the in-memory state stays authoritative.
    fn persist(&self, entries: &[RunSummary]) {
        let Some(path) = &self.path else { return };
        if let Err(e) = write_json_atomic(path, &LeaderboardFileRef { results: entries }) {
            warn!(path = %path.display(), error = %e, "failed to persist leaderboard");
        }
    }

    fn remove_artifact(&self, stem: &str) {
        match self.artifacts.delete(stem) {
            Ok(true) => debug!(model_file = stem, "artifact deleted"),
            Ok(false) => {}
            Err(e) => warn!(model_file = stem, error = %e, "failed to delete artifact"),
        }
    }

    #[must_use]
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Append a completed run and return its position.
    pub fn append(&self, summary: RunSummary) -> usize {
        let mut entries = self.write();
        entries.push(summary);
        self.persist(&entries);
        entries.len() - 1
    }

    /// Snapshot of all entries, stably sorted by `sort_by` when given.
    #[must_use]
    pub fn list(&self, sort_by: Option<SortField>, ascending: bool) -> Vec<RunSummary> {
        let mut snapshot = self.read().clone();
        if let Some(field) = sort_by {
            snapshot.sort_by(|a, b| field.compare(a, b, ascending));
        }
        snapshot
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<RunSummary> {
        self.read().get(position).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove the entry at `position` (insertion order) and delete its artifact.
    pub fn delete(&self, position: usize) -> Result<RunSummary, LeaderboardError> {
        let removed = {
            let mut entries = self.write();
            if position >= entries.len() {
                return Err(LeaderboardError::OutOfRange { position, len: entries.len() });
            }
            let removed = entries.remove(position);
            self.persist(&entries);
            removed
        };
        self.remove_artifact(&removed.model_file);
        info!(position, model_file = %removed.model_file, "leaderboard entry deleted");
        Ok(removed)
    }

    /// Remove every entry and delete every referenced artifact. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut entries = self.write();
            let removed = std::mem::take(&mut *entries);
            self.persist(&entries);
            removed
        };
        for summary in &removed {
            self.remove_artifact(&summary.model_file);
        }
        info!(removed = removed.len(), "leaderboard cleared");
        removed.len()
    }
}
