use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use modelboard_training::HyperParams;
use serde::{Deserialize, Serialize};

use super::LeaderboardError;

/// One completed run, as stored on the leaderboard and returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub model_key: String,
    pub model_name: String,
    pub train_accuracy: f64,
    pub val_accuracy: f64,
    /// Wall-clock seconds spent in the fit loop.
    pub train_time: f64,
    pub avg_epoch_time: f64,
    #[serde(default)]
    pub avg_batch_time: f64,
    #[serde(default)]
    pub inference_time_ms: Option<f64>,
    #[serde(default)]
    pub inference_std_ms: Option<f64>,
    #[serde(default)]
    pub inference_min_ms: Option<f64>,
    #[serde(default)]
    pub inference_max_ms: Option<f64>,
    pub num_parameters: u64,
    #[serde(default)]
    pub flops: Option<u64>,
    #[serde(default)]
    pub model_size_mb: Option<f64>,
    #[serde(default)]
    pub peak_memory_mb: Option<f64>,
    #[serde(default)]
    pub memory_increase_mb: Option<f64>,
    #[serde(default)]
    pub avg_epoch_memory_mb: Option<f64>,
    #[serde(default)]
    pub inference_memory_mb: Option<f64>,
    #[serde(default)]
    pub gpu_memory_mb: Option<f64>,
    #[serde(flatten)]
    pub hyperparams: HyperParams,
    pub num_samples: usize,
    pub num_classes: usize,
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Artifact file stem in the model store.
    pub model_file: String,
    #[serde(default)]
    pub artifact_sha256: Option<String>,
}

impl RunSummary {
    /// Check accuracy bounds and that every measured quantity is finite and non-negative.
    pub fn validate(&self) -> Result<(), LeaderboardError> {
        for (name, value) in [("train_accuracy", self.train_accuracy), ("val_accuracy", self.val_accuracy)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LeaderboardError::Invalid(format!("{name} {value} outside [0, 1]")));
            }
        }
        let measured = [
            ("train_time", Some(self.train_time)),
            ("avg_epoch_time", Some(self.avg_epoch_time)),
            ("avg_batch_time", Some(self.avg_batch_time)),
            ("inference_time_ms", self.inference_time_ms),
            ("inference_std_ms", self.inference_std_ms),
            ("inference_min_ms", self.inference_min_ms),
            ("inference_max_ms", self.inference_max_ms),
            ("model_size_mb", self.model_size_mb),
            ("peak_memory_mb", self.peak_memory_mb),
            ("memory_increase_mb", self.memory_increase_mb),
            ("avg_epoch_memory_mb", self.avg_epoch_memory_mb),
            ("inference_memory_mb", self.inference_memory_mb),
            ("gpu_memory_mb", self.gpu_memory_mb),
        ];
        for (name, value) in measured {
            if let Some(v) = value.filter(|v| !v.is_finite() || *v < 0.0) {
                return Err(LeaderboardError::Invalid(format!("{name} must be >= 0, got {v}")));
            }
        }
        if self.model_file.is_empty() {
            return Err(LeaderboardError::Invalid("model_file is required".to_string()));
        }
        Ok(())
    }
}

macro_rules! sort_fields {
    (|$s:ident| $($variant:ident => $name:literal, $value:expr;)+) => {
        /// Numeric leaderboard fields clients can sort by.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum SortField {
            $($variant,)+
        }

        impl SortField {
            pub const ALL: &'static [SortField] = &[$(SortField::$variant,)+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(SortField::$variant => $name,)+
                }
            }

            /// The field's value on `summary`; `None` when it was not measured.
            #[must_use]
            pub fn value(self, $s: &RunSummary) -> Option<f64> {
                match self {
                    $(SortField::$variant => $value,)+
                }
            }
        }

        impl FromStr for SortField {
            type Err = LeaderboardError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(SortField::$variant),)+
                    other => Err(LeaderboardError::UnknownField(other.to_string())),
                }
            }
        }
    };
}

sort_fields! {
    |s|
    ValAccuracy => "val_accuracy", Some(s.val_accuracy);
    TrainAccuracy => "train_accuracy", Some(s.train_accuracy);
    TrainTime => "train_time", Some(s.train_time);
    AvgEpochTime => "avg_epoch_time", Some(s.avg_epoch_time);
    AvgBatchTime => "avg_batch_time", Some(s.avg_batch_time);
    InferenceTimeMs => "inference_time_ms", s.inference_time_ms;
    InferenceStdMs => "inference_std_ms", s.inference_std_ms;
    InferenceMinMs => "inference_min_ms", s.inference_min_ms;
    InferenceMaxMs => "inference_max_ms", s.inference_max_ms;
    NumParameters => "num_parameters", Some(s.num_parameters as f64);
    Flops => "flops", s.flops.map(|f| f as f64);
    ModelSizeMb => "model_size_mb", s.model_size_mb;
    PeakMemoryMb => "peak_memory_mb", s.peak_memory_mb;
    MemoryIncreaseMb => "memory_increase_mb", s.memory_increase_mb;
    AvgEpochMemoryMb => "avg_epoch_memory_mb", s.avg_epoch_memory_mb;
    InferenceMemoryMb => "inference_memory_mb", s.inference_memory_mb;
    GpuMemoryMb => "gpu_memory_mb", s.gpu_memory_mb;
    Epochs => "epochs", Some(f64::from(s.hyperparams.epochs));
    BatchSize => "batch_size", Some(f64::from(s.hyperparams.batch_size));
    LearningRate => "learning_rate", Some(s.hyperparams.learning_rate);
    NumSamples => "num_samples", Some(s.num_samples as f64);
    NumClasses => "num_classes", Some(s.num_classes as f64);
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SortField {
    /// Order two summaries by this field. Unmeasured values sort last in either direction.
    #[must_use]
    pub fn compare(self, a: &RunSummary, b: &RunSummary, ascending: bool) -> Ordering {
        match (self.value(a), self.value(b)) {
            (Some(x), Some(y)) => {
                let ord = if ascending { x.partial_cmp(&y) } else { y.partial_cmp(&x) };
                ord.unwrap_or(Ordering::Equal)
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn summary(model_file: &str, val_accuracy: f64) -> RunSummary {
        RunSummary {
            model_key: "baseline".to_string(),
            model_name: "Baseline CNN".to_string(),
            train_accuracy: 0.9,
            val_accuracy,
            train_time: 1.5,
            avg_epoch_time: 0.5,
            avg_batch_time: 0.01,
            inference_time_ms: Some(0.2),
            inference_std_ms: Some(0.01),
            inference_min_ms: Some(0.18),
            inference_max_ms: Some(0.3),
            num_parameters: 1234,
            flops: Some(5000),
            model_size_mb: Some(0.05),
            peak_memory_mb: Some(40.0),
            memory_increase_mb: Some(1.0),
            avg_epoch_memory_mb: Some(39.5),
            inference_memory_mb: Some(40.0),
            gpu_memory_mb: None,
            hyperparams: HyperParams { epochs: 3, batch_size: 8, learning_rate: 0.01, seed: 42 },
            num_samples: 10,
            num_classes: 2,
            dataset_id: None,
            timestamp: Utc::now(),
            model_file: model_file.to_string(),
            artifact_sha256: None,
        }
    }
}
