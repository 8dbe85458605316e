use bytes::Bytes;
use modelboard_training::EpochMetrics;
use serde::{Deserialize, Serialize};

use crate::leaderboard::RunSummary;

/// Progress record produced by a training worker and relayed to the client.
///
/// Serialized with a `type` tag; field names match what the dashboard client reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Status {
        message: String,
        #[serde(rename = "progress")]
        percent: u8,
    },
    Epoch {
        #[serde(rename = "epoch")]
        index: u32,
        #[serde(rename = "total_epochs")]
        total: u32,
        progress: u8,
        loss: f64,
        accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
        /// Seconds.
        #[serde(rename = "epoch_time")]
        elapsed: f64,
        message: String,
    },
    Complete {
        message: String,
        progress: u8,
        #[serde(rename = "result")]
        summary: Box<RunSummary>,
    },
    Error {
        message: String,
    },
}

/// Overall percentage for the end of epoch `index` of `total`: training spans 10..=90.
#[must_use]
pub fn epoch_progress(index: u32, total: u32) -> u8 {
    if total == 0 {
        return 10;
    }
    let span = u64::from(index.min(total)) * 80 / u64::from(total);
    10 + span as u8
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>, percent: u8) -> Self {
        Self::Status { message: message.into(), percent }
    }

    #[must_use]
    pub fn epoch(metrics: &EpochMetrics) -> Self {
        Self::Epoch {
            index: metrics.epoch,
            total: metrics.total_epochs,
            progress: epoch_progress(metrics.epoch, metrics.total_epochs),
            loss: metrics.loss,
            accuracy: metrics.accuracy,
            val_loss: metrics.val_loss,
            val_accuracy: metrics.val_accuracy,
            elapsed: metrics.elapsed.as_secs_f64(),
            message: format!("Epoch {}/{} complete", metrics.epoch, metrics.total_epochs),
        }
    }

    #[must_use]
    pub fn complete(summary: RunSummary) -> Self {
        Self::Complete { message: "Training complete".to_string(), progress: 100, summary: Box::new(summary) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// `Complete` and `Error` end a run's event sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// `data: <json>\n\n`
    #[must_use]
    pub fn to_sse_frame(&self) -> Bytes {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to serialize progress event");
            r#"{"type":"error","message":"failed to serialize progress event"}"#.to_string()
        });
        Bytes::from(format!("data: {json}\n\n"))
    }
}
