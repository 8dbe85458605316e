use crate::trainer::FitHistory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metrics reported at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: u32,
    pub total_epochs: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Wall-clock duration of this epoch.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

/// How a fit loop ended.
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome<'a> {
    Completed(&'a FitHistory),
    Failed(&'a str),
}

/// Lifecycle hooks invoked synchronously by a model's fit loop.
///
/// Every hook has an empty default so observers only implement what they need.
/// `on_run_start` and `on_run_end` are each called exactly once per fit.
pub trait TrainingHooks {
    fn on_run_start(&mut self) {}

    fn on_epoch_begin(&mut self, _epoch: u32) {}

    fn on_batch_end(&mut self, _batch: usize, _elapsed: Duration) {}

    fn on_epoch_end(&mut self, _metrics: &EpochMetrics) {}

    fn on_run_end(&mut self, _outcome: RunOutcome<'_>) {}
}

#[derive(Debug, Default)]
pub struct NoopHooks;

impl TrainingHooks for NoopHooks {}

/// Fans every hook out to a list of observers, in order.
#[derive(Default)]
pub struct HookChain<'a> {
    hooks: Vec<&'a mut dyn TrainingHooks>,
}

impl<'a> HookChain<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, hook: &'a mut dyn TrainingHooks) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl TrainingHooks for HookChain<'_> {
    fn on_run_start(&mut self) {
        for hook in &mut self.hooks {
            hook.on_run_start();
        }
    }

    fn on_epoch_begin(&mut self, epoch: u32) {
        for hook in &mut self.hooks {
            hook.on_epoch_begin(epoch);
        }
    }

    fn on_batch_end(&mut self, batch: usize, elapsed: Duration) {
        for hook in &mut self.hooks {
            hook.on_batch_end(batch, elapsed);
        }
    }

    fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
        for hook in &mut self.hooks {
            hook.on_epoch_end(metrics);
        }
    }

    fn on_run_end(&mut self, outcome: RunOutcome<'_>) {
        for hook in &mut self.hooks {
            hook.on_run_end(outcome);
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        starts: usize,
        epochs: Vec<u32>,
        batches: usize,
        ends: usize,
    }

    impl TrainingHooks for Counter {
        fn on_run_start(&mut self) {
            self.starts += 1;
        }

        fn on_batch_end(&mut self, _batch: usize, _elapsed: Duration) {
            self.batches += 1;
        }

        fn on_epoch_end(&mut self, metrics: &EpochMetrics) {
            self.epochs.push(metrics.epoch);
        }

        fn on_run_end(&mut self, _outcome: RunOutcome<'_>) {
            self.ends += 1;
        }
    }

    fn metrics(epoch: u32) -> EpochMetrics {
        EpochMetrics {
            epoch,
            total_epochs: 2,
            loss: 1.0,
            accuracy: 0.5,
            val_loss: 1.2,
            val_accuracy: 0.4,
            elapsed: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_hook_chain_fans_out_in_order() {
        let mut first = Counter::default();
        let mut second = Counter::default();
        {
            let mut chain = HookChain::new().with(&mut first).with(&mut second);
            chain.on_run_start();
            chain.on_batch_end(0, Duration::from_millis(1));
            chain.on_epoch_end(&metrics(1));
            chain.on_epoch_end(&metrics(2));
            chain.on_run_end(RunOutcome::Failed("boom"));
        }

        for counter in [&first, &second] {
            assert_eq!(counter.starts, 1);
            assert_eq!(counter.batches, 1);
            assert_eq!(counter.epochs, vec![1, 2]);
            assert_eq!(counter.ends, 1);
        }
    }

    #[test]
    fn test_epoch_metrics_serialize_elapsed_as_seconds() {
        let json = serde_json::to_value(metrics(1)).unwrap();
        assert_eq!(json["elapsed"], serde_json::json!(0.25));
    }
}
