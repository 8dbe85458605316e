//! Point-in-time memory sampling and artifact cost measurement.

use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use modelboard_training::{ArtifactRef, LayerSummary, Model};
use serde::Serialize;
use sysinfo::{Pid, System};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ProbeConfig, TrainingConfig};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Errors raised internally while measuring. They never escape the probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("current process id unavailable: {0}")]
    Pid(&'static str),

    #[error("process {0} not found")]
    ProcessNotFound(Pid),

    #[error("no probe input available")]
    NoInput,

    #[error("inference failed: {0}")]
    Inference(#[from] modelboard_training::TrainingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    /// `None` when the process could not be read.
    pub resident_memory_mb: Option<f64>,
    pub accelerator_memory_mb: Option<f64>,
}

/// Best-effort accelerator memory query.
pub trait AcceleratorProbe: Send + Sync + std::fmt::Debug {
    /// Memory in use on the accelerator, or `None` when unsupported.
    fn memory_used_mb(&self) -> Option<f64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoAccelerator;

impl AcceleratorProbe for NoAccelerator {
    fn memory_used_mb(&self) -> Option<f64> {
        None
    }
}

/// Queries `nvidia-smi`. After the first failed query the probe stays disabled.
#[derive(Debug)]
pub struct NvidiaSmi {
    disabled: AtomicBool,
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self { disabled: AtomicBool::new(false) }
    }
}

impl NvidiaSmi {
    fn query() -> Option<f64> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=memory.used", "--format=csv,noheader,nounits"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
    }
}

impl AcceleratorProbe for NvidiaSmi {
    fn memory_used_mb(&self) -> Option<f64> {
        if self.disabled.load(Ordering::Relaxed) {
            return None;
        }
        let used = Self::query();
        if used.is_none() {
            debug!("nvidia-smi unavailable, disabling accelerator memory sampling");
            self.disabled.store(true, Ordering::Relaxed);
        }
        used
    }
}

/// Sum `memory.used` (MiB) across every listed device.
fn parse_nvidia_smi(stdout: &str) -> Option<f64> {
    let values: Vec<f64> = stdout.lines().filter_map(|l| l.trim().parse().ok()).collect();
    (!values.is_empty()).then(|| values.iter().sum())
}

/// Single-item inference latency in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean_ms: f64,
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Population statistics over `samples`; `None` when empty.
    #[must_use]
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let n = ms.len() as f64;
        let mean = ms.iter().sum::<f64>() / n;
        let var = ms.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean_ms: mean,
            std_ms: var.sqrt(),
            min_ms: ms.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: ms.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Cost metrics for a trained model and its saved artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactMeasurement {
    pub parameter_count: u64,
    pub operation_count: Option<u64>,
    pub size_on_disk_mb: Option<f64>,
    pub latency: Option<LatencyStats>,
    /// Mean resident memory observed right after each timed inference.
    pub inference_memory_mb: Option<f64>,
}

/// Per-layer analytic operation estimate.
///
/// Dense `2*in*out`, conv1d `2*k*in_ch*out_ch*out_len`, batch-norm `2*features`.
/// Returns `None` when no layer is countable.
#[must_use]
pub fn estimate_operations(layers: &[LayerSummary]) -> Option<u64> {
    let mut total = 0u64;
    let mut counted = false;
    for layer in layers {
        let ops = match *layer {
            LayerSummary::Dense { inputs, units } => 2 * inputs * units,
            LayerSummary::Conv1d { kernel, in_channels, out_channels, out_length } => {
                2 * kernel * in_channels * out_channels * out_length
            }
            LayerSummary::BatchNorm { features } => 2 * features,
            LayerSummary::Other { .. } => continue,
        };
        total += ops as u64;
        counted = true;
    }
    counted.then_some(total)
}

/// Samples process memory and measures trained models.
#[derive(Debug)]
pub struct ResourceProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    accelerator: Box<dyn AcceleratorProbe>,
    inference_runs: usize,
    warmup_runs: usize,
}

impl ResourceProbe {
    #[must_use]
    pub fn new(accelerator: Box<dyn AcceleratorProbe>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %ProbeError::Pid(e), "memory sampling disabled");
                None
            }
        };
        Self::with_pid(pid, accelerator)
    }

    fn with_pid(pid: Option<Pid>, accelerator: Box<dyn AcceleratorProbe>) -> Self {
        Self { system: Mutex::new(System::new()), pid, accelerator, inference_runs: 100, warmup_runs: 5 }
    }

    /// Probe that never resolves process memory.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::with_pid(None, Box::new(NoAccelerator))
    }

    #[must_use]
    pub fn from_config(probe: &ProbeConfig, training: &TrainingConfig) -> Self {
        let accelerator: Box<dyn AcceleratorProbe> =
            if probe.accelerator { Box::new(NvidiaSmi::default()) } else { Box::new(NoAccelerator) };
        Self::new(accelerator).with_inference_runs(training.inference_runs, training.warmup_runs)
    }

    #[must_use]
    pub fn with_inference_runs(mut self, runs: usize, warmup: usize) -> Self {
        self.inference_runs = runs.max(1);
        self.warmup_runs = warmup;
        self
    }

    fn resident_memory_mb(&self) -> Result<f64, ProbeError> {
        let pid = self.pid.ok_or(ProbeError::Pid("not resolved"))?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(pid) {
            return Err(ProbeError::ProcessNotFound(pid));
        }
        let bytes = system.process(pid).map(sysinfo::Process::memory).ok_or(ProbeError::ProcessNotFound(pid))?;
        Ok(bytes as f64 / BYTES_PER_MB)
    }

    pub fn accelerator_memory_mb(&self) -> Option<f64> {
        self.accelerator.memory_used_mb()
    }

    /// Current resident and accelerator memory, each `None` when unavailable.
    pub fn sample(&self) -> ResourceSample {
        let resident_memory_mb = self
            .resident_memory_mb()
            .inspect_err(|e| debug!(error = %e, "resident memory unavailable"))
            .ok();
        ResourceSample {
            timestamp: Utc::now(),
            resident_memory_mb,
            accelerator_memory_mb: self.accelerator_memory_mb(),
        }
    }

    /// Measure parameter count, operation count, size on disk and inference latency.
    ///
    /// Never fails: any metric that cannot be taken is left as `None`.
    pub fn measure_artifact(
        &self,
        model: &dyn Model,
        artifact: Option<&ArtifactRef>,
        probe_input: Option<&[f32]>,
    ) -> ArtifactMeasurement {
        let operation_count = model.operation_count().or_else(|| estimate_operations(&model.layer_summaries()));
        let size_on_disk_mb = artifact.map(|a| {
            std::fs::metadata(&a.path).map_or_else(|_| a.size_mb(), |m| m.len() as f64 / BYTES_PER_MB)
        });

        let (latency, inference_memory_mb) = match self.time_inference(model, probe_input) {
            Ok(result) => result,
            Err(e) => {
                warn!(model = model.display_name(), error = %e, "inference latency unavailable");
                (None, None)
            }
        };

        ArtifactMeasurement {
            parameter_count: model.parameter_count(),
            operation_count,
            size_on_disk_mb,
            latency,
            inference_memory_mb,
        }
    }

    fn time_inference(
        &self,
        model: &dyn Model,
        probe_input: Option<&[f32]>,
    ) -> Result<(Option<LatencyStats>, Option<f64>), ProbeError> {
        let input = probe_input.ok_or(ProbeError::NoInput)?;
        for _ in 0..self.warmup_runs {
            model.predict(input)?;
        }

        let mut timings = Vec::with_capacity(self.inference_runs);
        let mut memory = Vec::with_capacity(self.inference_runs);
        for _ in 0..self.inference_runs {
            let started = Instant::now();
            model.predict(input)?;
            timings.push(started.elapsed());
            if let Ok(mb) = self.resident_memory_mb() {
                memory.push(mb);
            }
        }

        let inference_memory = (!memory.is_empty()).then(|| memory.iter().sum::<f64>() / memory.len() as f64);
        Ok((LatencyStats::from_samples(&timings), inference_memory))
    }
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new(Box::new(NoAccelerator))
    }
}
