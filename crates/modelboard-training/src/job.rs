use crate::error::{TrainingError, TrainingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a single training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub epochs: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for HyperParams {
    fn default() -> Self {
        Self { epochs: 20, batch_size: 32, learning_rate: 0.001, seed: default_seed() }
    }
}

impl HyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// A fully described training run: which architecture to fit and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub architecture: String,
    pub hyperparams: HyperParams,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(architecture: impl Into<String>, hyperparams: HyperParams) -> Self {
        Self {
            run_id: RunId::new(),
            created_at: Utc::now(),
            architecture: architecture.into(),
            hyperparams,
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.architecture.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("architecture is required".to_string()));
        }
        self.hyperparams.validate()?;
        Ok(())
    }

    /// File stem for the artifact produced by this run, e.g. `slive_20250101_120000_1a2b3c4d`.
    #[must_use]
    pub fn artifact_stem(&self) -> String {
        let short_id: String = self.run_id.0.chars().filter(|c| *c != '-').take(8).collect();
        format!("{}_{}_{}", self.architecture, self.created_at.format("%Y%m%d_%H%M%S"), short_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_validate_requires_architecture() {
        let spec = TrainingJobSpec::new("", HyperParams::default());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_hyperparams_reject_zero_epochs_and_bad_rate() {
        let mut hp = HyperParams { epochs: 0, ..HyperParams::default() };
        assert!(hp.validate().is_err());

        hp.epochs = 3;
        hp.learning_rate = f64::NAN;
        assert!(hp.validate().is_err());

        hp.learning_rate = 0.01;
        hp.batch_size = 0;
        assert!(hp.validate().is_err());
    }

    #[test]
    fn test_hyperparams_seed_defaults_when_missing() {
        let hp: HyperParams =
            serde_json::from_str(r#"{"epochs": 3, "batch_size": 8, "learning_rate": 0.01}"#).unwrap();
        assert_eq!(hp.seed, 42);
    }

    #[test]
    fn test_artifact_stem_is_prefixed_with_architecture() {
        let spec = TrainingJobSpec::new("resnet", HyperParams::default());
        let stem = spec.artifact_stem();
        assert!(stem.starts_with("resnet_"));
        assert_eq!(stem.rsplit('_').next().unwrap().len(), 8);
    }
}
