//! Persisted leaderboard of completed training runs.

mod store;
mod summary;

pub use store::LeaderboardStore;
pub use summary::{RunSummary, SortField};

#[cfg(test)]
pub(crate) use summary::fixtures;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("Index out of range")]
    OutOfRange { position: usize, len: usize },

    #[error("unknown sort field: {0}")]
    UnknownField(String),

    #[error("invalid run summary: {0}")]
    Invalid(String),
}
