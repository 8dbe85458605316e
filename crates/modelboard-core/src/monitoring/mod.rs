//! Resource monitoring for training runs.
//!
//! `ResourceProbe` takes point-in-time measurements; `RunResourceRecorder` attaches
//! to a fit loop as a `TrainingHooks` observer and folds them into run statistics.

mod probe;
mod recorder;

pub use probe::{
    AcceleratorProbe, ArtifactMeasurement, LatencyStats, NoAccelerator, NvidiaSmi, ProbeError,
    ResourceProbe, ResourceSample, estimate_operations,
};
pub use recorder::{RunResourceRecorder, RunStatistics};
