//! Configuration module for Modelboard Core.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use modelboard_training::{HyperParams, StorageLayout};
use serde::Deserialize;

use crate::error::{ModelboardError, Result};

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "modelboard.toml";

/// Environment variable overriding `server.address`.
pub const ENV_ADDRESS: &str = "MODELBOARD_ADDRESS";

/// Environment variable re-rooting every storage directory.
pub const ENV_DATA_ROOT: &str = "MODELBOARD_DATA_ROOT";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5001))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address() }
    }
}

/// Where datasets, leaderboard results and trained models live.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("trained_models")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            models_dir: default_models_dir(),
        }
    }
}

impl StorageConfig {
    /// Default directory names under `root`.
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        let layout = StorageLayout::new(root);
        Self {
            data_dir: layout.data_dir().to_path_buf(),
            results_dir: layout.results_dir().to_path_buf(),
            models_dir: layout.models_dir().to_path_buf(),
        }
    }

    #[must_use]
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::from_dirs(self.data_dir.clone(), self.results_dir.clone(), self.models_dir.clone())
    }
}

/// Training run and measurement settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrainingConfig {
    /// How long the progress stream waits for an event before re-checking liveness.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Timed single-item inferences per latency measurement.
    #[serde(default = "default_inference_runs")]
    pub inference_runs: usize,
    #[serde(default = "default_warmup_runs")]
    pub warmup_runs: usize,
    /// Fraction of each class held out for validation.
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_epochs")]
    pub default_epochs: u32,
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,
    #[serde(default = "default_learning_rate")]
    pub default_learning_rate: f64,
}

fn default_idle_timeout_ms() -> u64 {
    1000
}

fn default_inference_runs() -> usize {
    100
}

fn default_warmup_runs() -> usize {
    5
}

fn default_validation_split() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_epochs() -> u32 {
    20
}

fn default_batch_size() -> u32 {
    32
}

fn default_learning_rate() -> f64 {
    0.001
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            inference_runs: default_inference_runs(),
            warmup_runs: default_warmup_runs(),
            validation_split: default_validation_split(),
            seed: default_seed(),
            default_epochs: default_epochs(),
            default_batch_size: default_batch_size(),
            default_learning_rate: default_learning_rate(),
        }
    }
}

impl TrainingConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Hyperparameters used for fields a submission leaves out.
    #[must_use]
    pub fn default_hyperparams(&self) -> HyperParams {
        HyperParams {
            epochs: self.default_epochs,
            batch_size: self.default_batch_size,
            learning_rate: self.default_learning_rate,
            seed: self.seed,
        }
    }
}

/// Resource probe settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Query accelerator memory through `nvidia-smi` when available.
    #[serde(default = "default_true")]
    pub accelerator: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { accelerator: true }
    }
}

/// Root configuration for Modelboard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// With no path, `modelboard.toml` in the working directory is used when present.
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModelboardError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `MODELBOARD_ADDRESS` / `MODELBOARD_DATA_ROOT` as returned by `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ENV_ADDRESS).filter(|v| !v.trim().is_empty()) {
            self.server.address = address.trim().parse()?;
        }
        if let Some(root) = lookup(ENV_DATA_ROOT).filter(|v| !v.trim().is_empty()) {
            self.storage = StorageConfig::rooted_at(Path::new(root.trim()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let split = self.training.validation_split;
        if !(0.0..1.0).contains(&split) {
            return Err(ModelboardError::Config(format!(
                "training.validation_split must be in [0, 1), got {split}"
            )));
        }
        if self.training.inference_runs == 0 {
            return Err(ModelboardError::Config("training.inference_runs must be >= 1".to_string()));
        }
        self.training.default_hyperparams().validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address, "0.0.0.0:5001".parse().unwrap());
    }

    #[test]
    fn test_config_deserialize_minimal() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.address, "0.0.0.0:5001".parse().unwrap());
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.training, TrainingConfig::default());
        assert!(config.probe.accelerator);
    }

    #[test]
    fn test_config_deserialize_full() {
        let toml = r#"
            [server]
            address = "127.0.0.1:8080"

            [storage]
            data_dir = "/var/lib/modelboard/data"

            [training]
            idle_timeout_ms = 250
            inference_runs = 10
            default_epochs = 3

            [probe]
            accelerator = false
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/modelboard/data"));
        assert_eq!(config.storage.results_dir, PathBuf::from("results"));
        assert_eq!(config.training.idle_timeout(), Duration::from_millis(250));
        assert_eq!(config.training.inference_runs, 10);
        assert_eq!(config.training.default_hyperparams().epochs, 3);
        assert_eq!(config.training.default_hyperparams().batch_size, 32);
        assert!(!config.probe.accelerator);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_ADDRESS, "127.0.0.1:9000"), (ENV_DATA_ROOT, "/tmp/mb")]);
        let mut config = Config::new();
        config.apply_env_overrides_from(|k| env.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.server.address, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.storage.models_dir, PathBuf::from("/tmp/mb/trained_models"));
        assert_eq!(config.storage.layout().leaderboard_path(), PathBuf::from("/tmp/mb/results/leaderboard.json"));
    }

    #[test]
    fn test_env_override_rejects_bad_address() {
        let mut config = Config::new();
        let result = config.apply_env_overrides_from(|k| (k == ENV_ADDRESS).then(|| "nope".to_string()));
        assert!(matches!(result, Err(ModelboardError::InvalidAddress(_))));
    }

    #[test]
    fn test_validate_rejects_bad_split() {
        let mut config = Config::new();
        config.training.validation_split = 1.0;
        assert!(matches!(config.validate(), Err(ModelboardError::Config(_))));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = Config::load(Some(&temp.path().join("missing.toml")));
        assert!(matches!(result, Err(ModelboardError::Config(_))));
    }
}
