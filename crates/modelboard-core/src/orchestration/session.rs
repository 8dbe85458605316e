//! Server-owned training state: the single active-run slot and the live-inference cache.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use modelboard_training::{
    ArchitectureRegistry, DatasetProvider, HyperParams, InputShape, Landmarks, Model, TrainingError,
    TrainingJobSpec, TrainingResult, prepare_dataset, preprocess_landmarks,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};

use super::events::ProgressEvent;
use super::worker::{self, TrainingRequest, WorkerContext, WorkerHandle};
use crate::leaderboard::LeaderboardStore;
use crate::monitoring::ResourceProbe;

/// Input shape used when listing architectures: 21 hand landmarks of (x, y, z).
const HAND_LANDMARKS: InputShape = InputShape { length: 21, channels: 3 };
const LISTING_CLASSES: usize = 10;
const TOP_K: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("No data available")]
    NoData,

    #[error("A training run is already in progress")]
    AlreadyRunning,

    #[error("{0}")]
    Internal(String),
}

/// Exclusive right to run training. Released on drop.
#[derive(Debug)]
pub struct RunSlot {
    busy: Arc<AtomicBool>,
}

impl RunSlot {
    fn try_acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { busy: Arc::clone(busy) })
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Body of a training submission. Missing fields fall back to configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
}

/// An accepted run: its spec, its event stream and its worker.
#[derive(Debug)]
pub struct RunTicket {
    pub spec: TrainingJobSpec,
    pub events: UnboundedReceiver<ProgressEvent>,
    pub worker: WorkerHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchitectureInfo {
    pub key: String,
    pub name: String,
    pub parameters: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveModelInfo {
    pub key: String,
    pub name: String,
    pub model_file: String,
    pub val_accuracy: f64,
    pub num_classes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub model_file: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPrediction {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_prediction: Option<Prediction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub top_5: Vec<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct LoadedModel {
    classes: Vec<String>,
    model: Box<dyn Model>,
}

/// Settings the session applies to every submission.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub defaults: HyperParams,
    pub validation_split: f64,
}

pub struct TrainingSession {
    registry: ArchitectureRegistry,
    dataset: Arc<dyn DatasetProvider>,
    worker_ctx: WorkerContext,
    settings: SessionSettings,
    busy: Arc<AtomicBool>,
    loaded: Mutex<BTreeMap<String, LoadedModel>>,
}

impl std::fmt::Debug for TrainingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingSession")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("busy", &self.is_busy())
            .field("loaded", &self.loaded_models())
            .finish_non_exhaustive()
    }
}

impl TrainingSession {
    pub fn new(
        registry: ArchitectureRegistry,
        dataset: Arc<dyn DatasetProvider>,
        leaderboard: Arc<LeaderboardStore>,
        probe: Arc<ResourceProbe>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry,
            dataset,
            worker_ctx: WorkerContext { leaderboard, probe },
            settings,
            busy: Arc::new(AtomicBool::new(false)),
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ArchitectureRegistry {
        &self.registry
    }

    #[must_use]
    pub fn leaderboard(&self) -> &Arc<LeaderboardStore> {
        &self.worker_ctx.leaderboard
    }

    /// Whether a run currently holds the slot.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Validate a submission, prepare its data and start a worker.
    ///
    /// Rejections happen before any worker starts: unknown architecture or bad
    /// hyperparameters, then a busy slot, then an empty dataset. The dataset is
    /// only read once the slot is held.
    pub fn submit(&self, request: SubmitRequest) -> Result<RunTicket, SubmitError> {
        let defaults = &self.settings.defaults;
        let key = request.model.unwrap_or_else(|| "baseline".to_string());
        let Ok(architecture) = self.registry.get(&key) else {
            return Err(SubmitError::InvalidRequest("Invalid model".to_string()));
        };
        let hyperparams = HyperParams {
            epochs: request.epochs.unwrap_or(defaults.epochs),
            batch_size: request.batch_size.unwrap_or(defaults.batch_size),
            learning_rate: request.learning_rate.unwrap_or(defaults.learning_rate),
            seed: defaults.seed,
        };
        let spec = TrainingJobSpec::new(key, hyperparams);
        spec.validate().map_err(|e| SubmitError::InvalidRequest(e.to_string()))?;

        // Dropped on every early return below.
        let slot = RunSlot::try_acquire(&self.busy).ok_or(SubmitError::AlreadyRunning)?;
        let samples = self.dataset.load_samples().map_err(|e| SubmitError::Internal(e.to_string()))?;
        let data = match prepare_dataset(&samples, self.settings.validation_split, spec.hyperparams.seed) {
            Ok(data) => data,
            Err(TrainingError::EmptyDataset) => return Err(SubmitError::NoData),
            Err(e @ (TrainingError::Dataset(_) | TrainingError::Shape(_))) => {
                return Err(SubmitError::InvalidRequest(e.to_string()));
            }
            Err(e) => return Err(SubmitError::Internal(e.to_string())),
        };

        let (tx, events) = mpsc::unbounded_channel();
        info!(run_id = %spec.run_id, model = %spec.architecture, "training run accepted");
        let request = TrainingRequest { spec: spec.clone(), architecture, data };
        // On spawn failure the slot moved into the closure is dropped, freeing it again.
        let worker = worker::spawn(self.worker_ctx.clone(), request, slot, tx)
            .map_err(|e| SubmitError::Internal(format!("failed to start training worker: {e}")))?;

        Ok(RunTicket { spec, events, worker })
    }

    /// Every registered architecture with its parameter count for a 10-class build.
    #[must_use]
    pub fn architectures(&self) -> Vec<ArchitectureInfo> {
        self.registry
            .iter()
            .map(|arch| match arch.build(HAND_LANDMARKS, LISTING_CLASSES, 0) {
                Ok(model) => ArchitectureInfo {
                    key: arch.key().to_string(),
                    name: arch.display_name().to_string(),
                    parameters: model.parameter_count(),
                    error: None,
                },
                Err(e) => ArchitectureInfo {
                    key: arch.key().to_string(),
                    name: arch.display_name().to_string(),
                    parameters: 0,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    /// Leaderboard entries whose artifact still exists.
    #[must_use]
    pub fn live_models(&self) -> Vec<LiveModelInfo> {
        let leaderboard = self.leaderboard();
        leaderboard
            .list(None, false)
            .into_iter()
            .filter(|s| leaderboard.artifacts().exists(&s.model_file))
            .map(|s| LiveModelInfo {
                key: s.model_key,
                name: s.model_name,
                model_file: s.model_file,
                val_accuracy: s.val_accuracy,
                num_classes: s.num_classes,
            })
            .collect()
    }

    fn loaded(&self) -> MutexGuard<'_, BTreeMap<String, LoadedModel>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn restore(&self, model_file: &str) -> TrainingResult<LoadedModel> {
        let stored = self.leaderboard().artifacts().load_model(model_file)?;
        let model = self.registry.get(&stored.architecture)?.restore(stored.weights)?;
        if model.num_classes() != stored.classes.len() {
            return Err(TrainingError::Artifact(format!(
                "{model_file}: model has {} outputs but {} class labels",
                model.num_classes(),
                stored.classes.len()
            )));
        }
        Ok(LoadedModel { classes: stored.classes, model })
    }

    /// Replace the loaded-model cache with `model_files`.
    pub fn load_models(&self, model_files: &[String]) -> Vec<LoadReport> {
        let mut reports = Vec::with_capacity(model_files.len());
        let mut fresh = BTreeMap::new();
        for file in model_files {
            match self.restore(file) {
                Ok(loaded) => {
                    reports.push(LoadReport {
                        model_file: file.clone(),
                        loaded: true,
                        num_classes: Some(loaded.classes.len()),
                        error: None,
                    });
                    fresh.insert(file.clone(), loaded);
                }
                Err(e) => {
                    warn!(model_file = %file, error = %e, "failed to load model");
                    let error = match e {
                        TrainingError::Artifact(_) if !self.leaderboard().artifacts().exists(file) => {
                            "Model file not found".to_string()
                        }
                        other => other.to_string(),
                    };
                    reports.push(LoadReport { model_file: file.clone(), loaded: false, num_classes: None, error: Some(error) });
                }
            }
        }
        info!(loaded = fresh.len(), requested = model_files.len(), "live models loaded");
        *self.loaded() = fresh;
        reports
    }

    #[must_use]
    pub fn loaded_models(&self) -> Vec<String> {
        self.loaded().keys().cloned().collect()
    }

    /// Drop every loaded model. Returns how many were unloaded.
    pub fn unload_all(&self) -> usize {
        let mut loaded = self.loaded();
        let count = loaded.len();
        loaded.clear();
        count
    }

    /// Top-5 predictions from every loaded model for one landmark frame.
    pub fn predict(&self, landmarks: &Landmarks) -> TrainingResult<BTreeMap<String, ModelPrediction>> {
        let input = preprocess_landmarks(&landmarks.points()?);
        let loaded = self.loaded();
        let mut out = BTreeMap::new();
        for (file, entry) in loaded.iter() {
            let started = Instant::now();
            let prediction = match entry.model.predict(&input) {
                Ok(probs) => {
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    let top = top_k(&probs, &entry.classes, TOP_K);
                    ModelPrediction {
                        success: true,
                        top_prediction: top.first().cloned(),
                        top_5: top,
                        inference_time_ms: Some(elapsed_ms),
                        error: None,
                    }
                }
                Err(e) => ModelPrediction {
                    success: false,
                    top_prediction: None,
                    top_5: Vec::new(),
                    inference_time_ms: None,
                    error: Some(e.to_string()),
                },
            };
            out.insert(file.clone(), prediction);
        }
        Ok(out)
    }
}

fn top_k(probs: &[f32], classes: &[String], k: usize) -> Vec<Prediction> {
    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(k)
        .filter_map(|(i, p)| classes.get(i).map(|label| Prediction { label: label.clone(), confidence: p }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    use modelboard_training::{
        Architecture, ArtifactStore, EpochMetrics, FitHistory, LayerSummary, PreparedDataset, RunOutcome, Sample,
        TrainingHooks,
    };
    use tempfile::TempDir;

    /// Architecture whose fit blocks until the test releases it.
    struct GatedArchitecture {
        release: Arc<Barrier>,
    }

    impl Architecture for GatedArchitecture {
        fn key(&self) -> &'static str {
            "gated"
        }

        fn display_name(&self) -> &'static str {
            "Gated"
        }

        fn build(&self, input: InputShape, num_classes: usize, _seed: u64) -> TrainingResult<Box<dyn Model>> {
            Ok(Box::new(GatedModel { release: Arc::clone(&self.release), input, num_classes }))
        }

        fn restore(&self, _weights: serde_json::Value) -> TrainingResult<Box<dyn Model>> {
            Err(TrainingError::Artifact("gated models are not restorable".to_string()))
        }
    }

    struct GatedModel {
        release: Arc<Barrier>,
        input: InputShape,
        num_classes: usize,
    }

    impl Model for GatedModel {
        fn display_name(&self) -> &str {
            "Gated"
        }

        fn input_shape(&self) -> InputShape {
            self.input
        }

        fn num_classes(&self) -> usize {
            self.num_classes
        }

        fn parameter_count(&self) -> u64 {
            0
        }

        fn layer_summaries(&self) -> Vec<LayerSummary> {
            Vec::new()
        }

        fn fit(
            &mut self,
            _data: &PreparedDataset,
            hyperparams: &HyperParams,
            hooks: &mut dyn TrainingHooks,
        ) -> TrainingResult<FitHistory> {
            hooks.on_run_start();
            self.release.wait();
            let history = FitHistory {
                epochs: vec![EpochMetrics {
                    epoch: 1,
                    total_epochs: hyperparams.epochs,
                    loss: 0.5,
                    accuracy: 0.5,
                    val_loss: 0.5,
                    val_accuracy: 0.5,
                    elapsed: std::time::Duration::from_millis(1),
                }],
            };
            hooks.on_run_end(RunOutcome::Completed(&history));
            Ok(history)
        }

        fn predict(&self, _input: &[f32]) -> TrainingResult<Vec<f32>> {
            Ok(vec![1.0 / self.num_classes as f32; self.num_classes])
        }

        fn to_json(&self) -> TrainingResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }
    }

    /// Sample source that can be emptied mid-test and counts its reads.
    #[derive(Default)]
    struct SwappableSamples {
        samples: Mutex<Vec<Sample>>,
        loads: AtomicUsize,
    }

    impl DatasetProvider for SwappableSamples {
        fn load_samples(&self) -> TrainingResult<Vec<Sample>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.samples.lock().unwrap().clone())
        }
    }

    fn sample(label: &str, i: usize) -> Sample {
        let offset = if label == "A" { 0.0 } else { 1.0 };
        let points = (0..21).map(|p| [p as f32 * 0.05 + offset, offset - i as f32 * 0.01, 0.1]).collect();
        Sample { label: label.to_string(), landmarks: Landmarks::Points(points), timestamp: None }
    }

    fn session(temp: &TempDir, samples: Vec<Sample>) -> TrainingSession {
        session_with(temp, ArchitectureRegistry::with_defaults(), Arc::new(samples))
    }

    fn session_with(
        temp: &TempDir,
        registry: ArchitectureRegistry,
        dataset: Arc<dyn DatasetProvider>,
    ) -> TrainingSession {
        let artifacts = ArtifactStore::new(temp.path().join("models"));
        let leaderboard = Arc::new(LeaderboardStore::open(temp.path().join("leaderboard.json"), artifacts));
        TrainingSession::new(
            registry,
            dataset,
            leaderboard,
            Arc::new(ResourceProbe::default().with_inference_runs(5, 1)),
            SessionSettings {
                defaults: HyperParams { epochs: 2, batch_size: 4, learning_rate: 0.01, seed: 42 },
                validation_split: 0.2,
            },
        )
    }

    fn dataset() -> Vec<Sample> {
        (0..10).map(|i| sample(if i % 2 == 0 { "A" } else { "B" }, i)).collect()
    }

    fn drain(mut ticket: RunTicket) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = ticket.events.blocking_recv() {
            events.push(event);
        }
        ticket.worker.join();
        events
    }

    #[test]
    fn test_run_slot_is_exclusive_and_released_on_drop() {
        let busy = Arc::new(AtomicBool::new(false));
        let slot = RunSlot::try_acquire(&busy).unwrap();
        assert!(RunSlot::try_acquire(&busy).is_none());
        drop(slot);
        assert!(RunSlot::try_acquire(&busy).is_some());
    }

    #[test]
    fn test_unknown_model_is_rejected_without_starting_worker() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp, dataset());
        let err = session.submit(SubmitRequest { model: Some("vgg".to_string()), ..Default::default() }).unwrap_err();
        assert_eq!(err, SubmitError::InvalidRequest("Invalid model".to_string()));
        assert!(!session.is_busy());
    }

    #[test]
    fn test_empty_dataset_is_no_data() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp, Vec::new());
        assert_eq!(session.submit(SubmitRequest::default()).unwrap_err(), SubmitError::NoData);
    }

    #[test]
    fn test_bad_hyperparams_are_invalid_request() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp, dataset());
        let err = session.submit(SubmitRequest { epochs: Some(0), ..Default::default() }).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidRequest(_)));
    }

    #[test]
    fn test_run_streams_epochs_then_complete_and_appends() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp, dataset());
        let ticket = session
            .submit(SubmitRequest { model: Some("slive".to_string()), epochs: Some(3), ..Default::default() })
            .unwrap();
        let events = drain(ticket);

        assert!(matches!(events.first(), Some(ProgressEvent::Status { percent: 0, .. })));
        let epochs: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Epoch { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(epochs, vec![1, 2, 3]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let Some(ProgressEvent::Complete { summary, .. }) = events.last() else {
            panic!("expected complete, got {:?}", events.last());
        };
        assert!((0.0..=1.0).contains(&summary.val_accuracy));
        assert_eq!(summary.num_samples, 10);
        assert!(session.leaderboard().artifacts().exists(&summary.model_file));
        assert_eq!(session.leaderboard().len(), 1);
        assert!(!session.is_busy());
    }

    fn gated_session(temp: &TempDir, samples: Arc<SwappableSamples>) -> (TrainingSession, Arc<Barrier>) {
        let release = Arc::new(Barrier::new(2));
        let mut registry = ArchitectureRegistry::with_defaults();
        registry.register(Arc::new(GatedArchitecture { release: Arc::clone(&release) }));
        (session_with(temp, registry, samples), release)
    }

    fn gated() -> SubmitRequest {
        SubmitRequest { model: Some("gated".to_string()), epochs: Some(1), ..Default::default() }
    }

    #[test]
    fn test_busy_rejection_while_running() {
        let temp = TempDir::new().unwrap();
        let samples = Arc::new(SwappableSamples { samples: Mutex::new(dataset()), ..Default::default() });
        let (session, release) = gated_session(&temp, samples);

        let ticket = session.submit(gated()).unwrap();
        assert!(session.is_busy());
        assert_eq!(session.submit(SubmitRequest::default()).unwrap_err(), SubmitError::AlreadyRunning);

        release.wait();
        let events = drain(ticket);
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })), "{:?}", events.last());
        assert!(!session.is_busy());
    }

    #[test]
    fn test_busy_is_reported_before_reading_the_dataset() {
        let temp = TempDir::new().unwrap();
        let samples = Arc::new(SwappableSamples { samples: Mutex::new(dataset()), ..Default::default() });
        let (session, release) = gated_session(&temp, Arc::clone(&samples));

        let ticket = session.submit(gated()).unwrap();
        samples.samples.lock().unwrap().clear();
        assert_eq!(session.submit(SubmitRequest::default()).unwrap_err(), SubmitError::AlreadyRunning);
        assert_eq!(samples.loads.load(Ordering::SeqCst), 1);

        release.wait();
        drain(ticket);
        assert_eq!(session.submit(SubmitRequest::default()).unwrap_err(), SubmitError::NoData);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_load_and_predict_top_five() {
        let temp = TempDir::new().unwrap();
        let session = session(&temp, dataset());
        let events = drain(session.submit(SubmitRequest::default()).unwrap());
        let Some(ProgressEvent::Complete { summary, .. }) = events.last() else {
            panic!("run failed: {:?}", events.last());
        };

        assert_eq!(session.live_models().len(), 1);
        let reports = session.load_models(&[summary.model_file.clone(), "missing".to_string()]);
        assert!(reports[0].loaded);
        assert_eq!(reports[1].error.as_deref(), Some("Model file not found"));

        let predictions = session.predict(&sample("A", 0).landmarks).unwrap();
        let prediction = &predictions[&summary.model_file];
        assert!(prediction.success);
        assert_eq!(prediction.top_5.len(), 2);
        assert!(prediction.top_5[0].confidence >= prediction.top_5[1].confidence);

        assert_eq!(session.unload_all(), 1);
        assert!(session.loaded_models().is_empty());
    }

    #[test]
    fn test_architectures_lists_every_key() {
        let temp = TempDir::new().unwrap();
        let keys: Vec<String> = session(&temp, Vec::new()).architectures().into_iter().map(|a| a.key).collect();
        assert_eq!(keys, vec!["baseline", "densenet", "efficientnet", "resnet", "slive"]);
    }
}
