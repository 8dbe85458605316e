//! Folds a run's time and memory series into summary statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use modelboard_training::{EpochMetrics, RunOutcome, TrainingHooks};
use serde::Serialize;

use super::probe::{ResourceProbe, ResourceSample};

/// Summary of a run's resource usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub train_time_secs: f64,
    pub avg_epoch_time_secs: f64,
    pub avg_batch_time_secs: f64,
    /// Memory fields are `None` when no resident memory sample succeeded.
    pub start_memory_mb: Option<f64>,
    pub end_memory_mb: Option<f64>,
    pub peak_memory_mb: Option<f64>,
    /// End minus start resident memory, clamped at zero.
    pub memory_increase_mb: Option<f64>,
    pub avg_epoch_memory_mb: Option<f64>,
    /// Highest accelerator memory observed, if the accelerator could be queried.
    pub accelerator_memory_mb: Option<f64>,
    pub epochs: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct Running {
    sum: f64,
    count: u32,
}

impl Running {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(self) -> f64 {
        self.mean_if_any().unwrap_or(0.0)
    }

    fn mean_if_any(self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

fn max_of(current: Option<f64>, value: f64) -> f64 {
    current.map_or(value, |c| c.max(value))
}

/// Training hook that samples memory at run start, each epoch boundary and run end.
///
/// Samples are folded into running aggregates as they arrive.
#[derive(Debug)]
pub struct RunResourceRecorder {
    probe: Arc<ResourceProbe>,
    run_started: Option<Instant>,
    epoch_started: Option<Instant>,
    train_time: Duration,
    start_memory_mb: Option<f64>,
    end_memory_mb: Option<f64>,
    peak_memory_mb: Option<f64>,
    accelerator_peak_mb: Option<f64>,
    epoch_times: Running,
    epoch_memory: Running,
    batch_times: Running,
}

impl RunResourceRecorder {
    #[must_use]
    pub fn new(probe: Arc<ResourceProbe>) -> Self {
        Self {
            probe,
            run_started: None,
            epoch_started: None,
            train_time: Duration::ZERO,
            start_memory_mb: None,
            end_memory_mb: None,
            peak_memory_mb: None,
            accelerator_peak_mb: None,
            epoch_times: Running::default(),
            epoch_memory: Running::default(),
            batch_times: Running::default(),
        }
    }

    fn observe(&mut self, sample: ResourceSample) {
        if let Some(mb) = sample.resident_memory_mb {
            self.peak_memory_mb = Some(max_of(self.peak_memory_mb, mb));
        }
        if let Some(acc) = sample.accelerator_memory_mb {
            self.accelerator_peak_mb = Some(max_of(self.accelerator_peak_mb, acc));
        }
    }

    /// Statistics so far. Valid at any point, final once the run has ended.
    #[must_use]
    pub fn statistics(&self) -> RunStatistics {
        let train_time = if self.train_time.is_zero() {
            self.run_started.map_or(Duration::ZERO, |s| s.elapsed())
        } else {
            self.train_time
        };
        RunStatistics {
            train_time_secs: train_time.as_secs_f64(),
            avg_epoch_time_secs: self.epoch_times.mean(),
            avg_batch_time_secs: self.batch_times.mean(),
            start_memory_mb: self.start_memory_mb,
            end_memory_mb: self.end_memory_mb,
            peak_memory_mb: self.peak_memory_mb,
            memory_increase_mb: self
                .end_memory_mb
                .zip(self.start_memory_mb)
                .map(|(end, start)| (end - start).max(0.0)),
            avg_epoch_memory_mb: self.epoch_memory.mean_if_any(),
            accelerator_memory_mb: self.accelerator_peak_mb,
            epochs: self.epoch_times.count,
        }
    }
}

impl TrainingHooks for RunResourceRecorder {
    fn on_run_start(&mut self) {
        let sample = self.probe.sample();
        self.start_memory_mb = sample.resident_memory_mb;
        self.end_memory_mb = sample.resident_memory_mb;
        self.observe(sample);
        self.run_started = Some(Instant::now());
    }

    fn on_epoch_begin(&mut self, _epoch: u32) {
        self.epoch_started = Some(Instant::now());
    }

    fn on_batch_end(&mut self, _batch: usize, elapsed: Duration) {
        self.batch_times.push(elapsed.as_secs_f64());
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        let elapsed = self.epoch_started.take().map_or(metrics.elapsed, |s| s.elapsed());
        self.epoch_times.push(elapsed.as_secs_f64());
        let sample = self.probe.sample();
        if let Some(mb) = sample.resident_memory_mb {
            self.epoch_memory.push(mb);
        }
        self.observe(sample);
    }

    fn on_run_end(&mut self, _outcome: RunOutcome<'_>) {
        if let Some(started) = self.run_started {
            self.train_time = started.elapsed();
        }
        let sample = self.probe.sample();
        self.end_memory_mb = sample.resident_memory_mb;
        self.observe(sample);
    }
}
