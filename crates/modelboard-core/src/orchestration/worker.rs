//! Background training worker.
//!
//! A run executes on its own OS thread. Progress is pushed into an unbounded
//! channel so the fit loop never waits on the client.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::Utc;
use modelboard_training::{
    Architecture, ArtifactStore, EpochMetrics, HookChain, PreparedDataset, StoredModel,
    TrainingError, TrainingHooks, TrainingJobSpec,
};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use super::events::ProgressEvent;
use super::session::RunSlot;
use crate::leaderboard::{LeaderboardError, LeaderboardStore, RunSummary};
use crate::monitoring::{ResourceProbe, RunResourceRecorder};

const DATASET_READY: u8 = 0;
const BUILDING_MODEL: u8 = 5;
const TRAINING_STARTED: u8 = 10;
const COLLECTING_STATS: u8 = 91;
const SAVING_MODEL: u8 = 93;
const MEASURING: u8 = 95;
const SAVING_RESULTS: u8 = 98;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error(transparent)]
    Leaderboard(#[from] LeaderboardError),

    #[error("training produced no epochs")]
    NoEpochs,
}

/// Everything a worker needs besides the job itself.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub leaderboard: Arc<LeaderboardStore>,
    pub probe: Arc<ResourceProbe>,
}

/// A validated job with its prepared data.
pub struct TrainingRequest {
    pub spec: TrainingJobSpec,
    pub architecture: Arc<dyn Architecture>,
    pub data: PreparedDataset,
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker thread to exit.
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("training worker thread panicked outside the run guard");
        }
    }
}

/// Forwards one `Epoch` event per completed epoch.
struct EpochRelay<'a> {
    events: &'a UnboundedSender<ProgressEvent>,
}

impl TrainingHooks for EpochRelay<'_> {
    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        // A closed channel only means nobody is listening; the run carries on.
        let _ = self.events.send(ProgressEvent::epoch(metrics));
    }
}

/// Deletes a saved artifact unless the run reaches the leaderboard.
struct ArtifactGuard<'a> {
    store: &'a ArtifactStore,
    stem: String,
    armed: bool,
}

impl ArtifactGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ArtifactGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.delete(&self.stem) {
            Ok(_) => info!(model_file = %self.stem, "removed artifact of failed run"),
            Err(e) => warn!(model_file = %self.stem, error = %e, "failed to remove artifact of failed run"),
        }
    }
}

/// Start `request` on a new thread. `slot` is released before the terminal event is sent.
pub fn spawn(
    ctx: WorkerContext,
    request: TrainingRequest,
    slot: RunSlot,
    events: UnboundedSender<ProgressEvent>,
) -> std::io::Result<WorkerHandle> {
    let name = format!("train-{}", request.spec.architecture);
    let thread = std::thread::Builder::new().name(name).spawn(move || {
        let run_id = request.spec.run_id.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| run(&ctx, &request, &events)));
        let terminal = match outcome {
            Ok(Ok(summary)) => {
                info!(%run_id, model_file = %summary.model_file, val_accuracy = summary.val_accuracy, "training run complete");
                ProgressEvent::complete(summary)
            }
            Ok(Err(e)) => {
                error!(%run_id, error = %e, "training run failed");
                ProgressEvent::error(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%run_id, panic = %message, "training worker panicked");
                ProgressEvent::error(format!("Training failed: {message}"))
            }
        };
        drop(slot);
        let _ = events.send(terminal);
    })?;
    Ok(WorkerHandle { thread })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run(
    ctx: &WorkerContext,
    request: &TrainingRequest,
    events: &UnboundedSender<ProgressEvent>,
) -> Result<RunSummary, WorkerError> {
    let status = |message: String, percent: u8| {
        let _ = events.send(ProgressEvent::status(message, percent));
    };
    let TrainingRequest { spec, architecture, data } = request;
    let hp = &spec.hyperparams;

    status(
        format!("Dataset ready: {} samples, {} classes", data.num_samples(), data.num_classes()),
        DATASET_READY,
    );
    info!(
        run_id = %spec.run_id,
        model = %spec.architecture,
        epochs = hp.epochs,
        batch_size = hp.batch_size,
        learning_rate = hp.learning_rate,
        samples = data.num_samples(),
        "training run started"
    );

    status("Building model...".to_string(), BUILDING_MODEL);
    let mut model = architecture.build(data.input, data.num_classes(), hp.seed)?;

    status("Training started".to_string(), TRAINING_STARTED);
    let mut recorder = RunResourceRecorder::new(Arc::clone(&ctx.probe));
    let mut relay = EpochRelay { events };
    let history = {
        let mut hooks = HookChain::new().with(&mut recorder).with(&mut relay);
        model.fit(data, hp, &mut hooks)?
    };
    let last = history.last().ok_or(WorkerError::NoEpochs)?;

    status("Collecting resource statistics...".to_string(), COLLECTING_STATS);
    let stats = recorder.statistics();

    status("Saving model...".to_string(), SAVING_MODEL);
    let artifacts = ctx.leaderboard.artifacts();
    let stem = spec.artifact_stem();
    let stored = StoredModel {
        architecture: spec.architecture.clone(),
        classes: data.classes.clone(),
        created_at: Utc::now(),
        weights: model.to_json()?,
    };
    let artifact = artifacts.save_model(&stem, &stored)?;
    let guard = ArtifactGuard { store: artifacts, stem, armed: true };

    status("Measuring resources...".to_string(), MEASURING);
    let measurement = ctx.probe.measure_artifact(model.as_ref(), Some(&artifact), data.probe_input());
    let latency = measurement.latency;

    status("Saving results...".to_string(), SAVING_RESULTS);
    let summary = RunSummary {
        model_key: spec.architecture.clone(),
        model_name: architecture.display_name().to_string(),
        train_accuracy: last.accuracy,
        val_accuracy: last.val_accuracy,
        train_time: stats.train_time_secs,
        avg_epoch_time: stats.avg_epoch_time_secs,
        avg_batch_time: stats.avg_batch_time_secs,
        inference_time_ms: latency.map(|l| l.mean_ms),
        inference_std_ms: latency.map(|l| l.std_ms),
        inference_min_ms: latency.map(|l| l.min_ms),
        inference_max_ms: latency.map(|l| l.max_ms),
        num_parameters: measurement.parameter_count,
        flops: measurement.operation_count,
        model_size_mb: measurement.size_on_disk_mb,
        peak_memory_mb: stats.peak_memory_mb,
        memory_increase_mb: stats.memory_increase_mb,
        avg_epoch_memory_mb: stats.avg_epoch_memory_mb,
        inference_memory_mb: measurement.inference_memory_mb,
        gpu_memory_mb: ctx.probe.accelerator_memory_mb().or(stats.accelerator_memory_mb),
        hyperparams: hp.clone(),
        num_samples: data.num_samples(),
        num_classes: data.num_classes(),
        dataset_id: Some(data.id.0.clone()),
        timestamp: Utc::now(),
        model_file: artifact.file.clone(),
        artifact_sha256: Some(artifact.sha256.clone()),
    };
    summary.validate()?;
    ctx.leaderboard.append(summary.clone());
    guard.disarm();

    Ok(summary)
}
