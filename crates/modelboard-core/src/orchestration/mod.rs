//! Training orchestration: accepting runs, executing them in the background and
//! relaying their progress.

pub mod events;
pub mod session;
pub mod streamer;
pub mod worker;

pub use events::{ProgressEvent, epoch_progress};
pub use session::{
    ArchitectureInfo, LiveModelInfo, LoadReport, ModelPrediction, Prediction, RunSlot, RunTicket,
    SessionSettings, SubmitError, SubmitRequest, TrainingSession,
};
pub use streamer::{ChannelSink, EventSink, ProgressStreamer, SinkClosed, StreamOutcome};
pub use worker::{TrainingRequest, WorkerContext, WorkerError, WorkerHandle};
