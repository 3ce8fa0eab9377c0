//! Upstream pub/sub interface
//!
//! The broker client itself lives outside this crate. Messages it receives
//! are pushed into an mpsc channel as `UpstreamMessage`s and drained by the
//! ingest task into the router; outbound status messages go through an
//! `UpstreamPublisher`.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Topics the relay understands
pub mod topics {
    pub const COMMAND: &str = "esp32/command";
    pub const VOICE_RESULT: &str = "ultra96/voice_result";
    pub const DEBUG_START: &str = "debug/start";
    pub const DEBUG_STATUS: &str = "debug/status";
}

/// One message received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl UpstreamMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound side of the broker
pub trait UpstreamPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Bytes);
}

/// Publisher that only logs; used when no broker bridge is attached
#[derive(Debug, Default)]
pub struct LoggingPublisher;

impl UpstreamPublisher for LoggingPublisher {
    fn publish(&self, topic: &str, payload: Bytes) {
        crate::log_upstream!(
            tracing::Level::INFO,
            topic,
            payload = %String::from_utf8_lossy(&payload),
            "publish"
        );
    }
}

/// Publisher that keeps every message in memory
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<UpstreamMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<UpstreamMessage> {
        std::mem::take(&mut *self.published.lock())
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UpstreamPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Bytes) {
        self.published
            .lock()
            .push(UpstreamMessage::new(topic.to_string(), payload));
    }
}

/// Something that consumes upstream messages in order
pub trait UpstreamSink: Send + Sync + 'static {
    fn handle_upstream(
        &self,
        message: UpstreamMessage,
    ) -> impl std::future::Future<Output = ()> + Send;
}

/// Channel pair feeding the ingest task
pub fn channel(capacity: usize) -> (mpsc::Sender<UpstreamMessage>, mpsc::Receiver<UpstreamMessage>) {
    mpsc::channel(capacity.max(1))
}

/// Drain `rx` into `sink` until every sender is dropped
pub fn spawn_ingest<S: UpstreamSink>(
    sink: Arc<S>,
    mut rx: mpsc::Receiver<UpstreamMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        crate::log_upstream!(tracing::Level::INFO, "ingest loop started");
        while let Some(message) = rx.recv().await {
            crate::log_upstream!(
                tracing::Level::DEBUG,
                topic = %message.topic,
                bytes = message.payload.len(),
                "message received"
            );
            sink.handle_upstream(message).await;
        }
        crate::log_upstream!(tracing::Level::INFO, "ingest loop stopped");
    })
}
