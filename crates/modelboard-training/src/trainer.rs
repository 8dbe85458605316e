use crate::dataset::{InputShape, PreparedDataset};
use crate::error::TrainingResult;
use crate::job::HyperParams;
use crate::progress::{EpochMetrics, TrainingHooks};
use serde::{Deserialize, Serialize};

/// Per-epoch history of a completed fit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl FitHistory {
    #[must_use]
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Shape-level description of one layer, used for analytic cost estimates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSummary {
    Dense { inputs: usize, units: usize },
    Conv1d { kernel: usize, in_channels: usize, out_channels: usize, out_length: usize },
    BatchNorm { features: usize },
    Other { name: String },
}

/// A buildable, trainable and predictable model handle.
pub trait Model: Send {
    fn display_name(&self) -> &str;

    fn input_shape(&self) -> InputShape;

    fn num_classes(&self) -> usize;

    fn parameter_count(&self) -> u64;

    fn layer_summaries(&self) -> Vec<LayerSummary>;

    /// Exact operation count for a single-item forward pass, when the model can compute it.
    fn operation_count(&self) -> Option<u64> {
        None
    }

    /// Run the fit loop, invoking `hooks` at every run, epoch and batch boundary.
    fn fit(
        &mut self,
        data: &PreparedDataset,
        hyperparams: &HyperParams,
        hooks: &mut dyn TrainingHooks,
    ) -> TrainingResult<FitHistory>;

    /// Class probabilities for one preprocessed input.
    fn predict(&self, input: &[f32]) -> TrainingResult<Vec<f32>>;

    /// Serialize trained weights for storage as an artifact.
    fn to_json(&self) -> TrainingResult<serde_json::Value>;
}

/// A named model family that can build fresh models and restore trained ones.
pub trait Architecture: Send + Sync {
    fn key(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn build(&self, input: InputShape, num_classes: usize, seed: u64) -> TrainingResult<Box<dyn Model>>;

    fn restore(&self, weights: serde_json::Value) -> TrainingResult<Box<dyn Model>>;
}
