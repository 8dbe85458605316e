//! Relays a worker's progress events to a client as server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tracing::{debug, info, warn};

use super::events::ProgressEvent;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("client disconnected")]
pub struct SinkClosed;

/// Destination for encoded SSE frames.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkClosed>;

    /// Whether the client has gone away.
    fn is_closed(&self) -> bool;
}

/// Sink that feeds a response body channel.
#[derive(Debug)]
pub struct ChannelSink(pub Sender<Bytes>);

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), SinkClosed> {
        self.0.send(frame).await.map_err(|_| SinkClosed)
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A `complete` event was delivered.
    Completed,
    /// An `error` event was delivered.
    Failed,
    /// The client went away before a terminal event.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ProgressStreamer {
    idle_timeout: Duration,
}

impl ProgressStreamer {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Forward events in order until a terminal event is delivered or the client disconnects.
    ///
    /// Each wait is bounded by the idle timeout so a vanished client is noticed even while
    /// the worker is silent. The worker is never stopped from here.
    pub async fn relay(
        &self,
        events: &mut UnboundedReceiver<ProgressEvent>,
        sink: &mut dyn EventSink,
    ) -> StreamOutcome {
        loop {
            match tokio::time::timeout(self.idle_timeout, events.recv()).await {
                Ok(Some(event)) => {
                    let terminal = event.is_terminal();
                    if sink.send(event.to_sse_frame()).await.is_err() {
                        info!("client disconnected, training continues in background");
                        return StreamOutcome::Disconnected;
                    }
                    if terminal {
                        return match event {
                            ProgressEvent::Complete { .. } => StreamOutcome::Completed,
                            _ => StreamOutcome::Failed,
                        };
                    }
                }
                Ok(None) => {
                    warn!("progress channel closed without a terminal event");
                    let event = ProgressEvent::error("training worker exited without a result");
                    if sink.send(event.to_sse_frame()).await.is_err() {
                        return StreamOutcome::Disconnected;
                    }
                    return StreamOutcome::Failed;
                }
                Err(_) => {
                    if sink.is_closed() {
                        info!("client disconnected while idle, training continues in background");
                        return StreamOutcome::Disconnected;
                    }
                    debug!("no progress within idle timeout");
                }
            }
        }
    }
}

impl Default for ProgressStreamer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
