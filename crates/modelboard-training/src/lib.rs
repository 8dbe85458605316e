//! Modelboard Training
//!
//! Training primitives for:
//! - Describing runs and hyperparameters (`TrainingJobSpec`, `HyperParams`)
//! - Storing and preparing labelled landmark datasets (`DatasetStore`)
//! - Building `burn` classifiers from a fixed set of architectures (`ArchitectureRegistry`)
//! - Observing a fit loop through lifecycle hooks (`TrainingHooks`)
//! - Persisting trained models as artifacts (`ArtifactStore`)

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod job;
pub mod layout;
pub mod network;
pub mod progress;
pub mod registry;
pub mod trainer;

pub use artifacts::{ArtifactRef, ArtifactStore, StoredModel, sha256_file};
pub use dataset::{
    DatasetId, DatasetProvider, DatasetStats, DatasetStore, InputShape, Landmarks,
    PreparedDataset, Sample, Split, compute_dataset_id, prepare_dataset, preprocess_landmarks,
};
pub use error::{TrainingError, TrainingResult};
pub use job::{HyperParams, RunId, TrainingJobSpec};
pub use layout::{StorageLayout, write_json_atomic};
pub use network::{Classifier, ClassifierConfig, Device, InferBackend, Network, TrainBackend};
pub use progress::{EpochMetrics, HookChain, NoopHooks, RunOutcome, TrainingHooks};
pub use registry::{ArchitectureRegistry, NetworkArchitecture};
pub use trainer::{Architecture, FitHistory, LayerSummary, Model};
