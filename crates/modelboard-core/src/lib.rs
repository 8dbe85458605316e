//! Modelboard Core - training orchestration and model comparison backend.
//!
//! This crate provides:
//! - HTTP server with a server-sent-events training progress stream
//! - Background training workers with resource measurement
//! - A persisted leaderboard of completed runs
//! - Configuration management and error handling
//!
//! # Example
//!
//! ```rust,no_run
//! use modelboard_core::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> modelboard_core::error::Result<()> {
//!     let config = Config::load(None)?;
//!     server::run(&config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod leaderboard;
pub mod monitoring;
pub mod orchestration;
pub mod server;

pub use config::Config;
pub use error::{ModelboardError, Result};
pub use leaderboard::{LeaderboardError, LeaderboardStore, RunSummary, SortField};
pub use monitoring::{ResourceProbe, RunResourceRecorder, RunStatistics};
pub use orchestration::{ProgressEvent, ProgressStreamer, SubmitError, SubmitRequest, TrainingSession};
pub use server::Server;
