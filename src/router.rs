//! Event router
//!
//! Inspects inbound messages and sends each one to exactly one place:
//! - client frames: storage handler, latency collector or hub broadcast
//! - upstream topics: hub broadcast to masters or the latency collector
//!
//! Malformed payloads are counted and dropped; nothing here can fail the
//! hub or the collector.

use crate::collector::{LatencyCollector, LatencyReport};
use crate::core::{
    decode, kinds, now_millis, Command, DebugInfo, DebugStart, EventType, TimeField, VoiceInfo,
    VoiceResult, WebsocketEvent,
};
use crate::hub::{Connection, Hub};
use crate::infrastructure::metrics::MetricsCollector;
use crate::storage::StorageHandler;
use crate::upstream::{topics, UpstreamMessage, UpstreamPublisher, UpstreamSink};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

pub const STATUS_STARTED: &str = "Debug session started";
pub const STATUS_ALREADY_ACTIVE: &str = "Debug session already active";
pub const STATUS_NOT_STARTED: &str = "Debug session not started";

/// Router tunables
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Deadline for a latency probe
    pub collector_timeout: Duration,
    /// Topic receiving probe status and reports
    pub status_topic: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            collector_timeout: Duration::from_millis(5000),
            status_topic: topics::DEBUG_STATUS.to_string(),
        }
    }
}

pub struct EventRouter {
    hub: Hub,
    collector: Arc<LatencyCollector>,
    storage: StorageHandler,
    publisher: Arc<dyn UpstreamPublisher>,
    metrics: Arc<MetricsCollector>,
    settings: RouterSettings,
}

impl EventRouter {
    pub fn new(
        hub: Hub,
        collector: Arc<LatencyCollector>,
        storage: StorageHandler,
        publisher: Arc<dyn UpstreamPublisher>,
        metrics: Arc<MetricsCollector>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            hub,
            collector,
            storage,
            publisher,
            metrics,
            settings,
        }
    }

    #[inline]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    #[inline]
    pub fn collector(&self) -> &Arc<LatencyCollector> {
        &self.collector
    }

    /// Publish every finalized probe report on the status topic
    ///
    /// Only latency fields are published; the absolute anchors are dropped.
    pub fn install_completion_handler(&self) {
        let publisher = self.publisher.clone();
        let topic = self.settings.status_topic.clone();
        self.collector.on_complete(move |report: &LatencyReport| {
            crate::log_collector!(Level::INFO, "probe report:\n{}", report);
            let json = report.to_json_filtered(|name| {
                TimeField::from_name(name).map_or(true, |field| field.is_latency())
            });
            match serde_json::to_vec(&json) {
                Ok(payload) => publisher.publish(&topic, Bytes::from(payload)),
                Err(e) => tracing::error!(target: "collector", error = %e, "failed to encode report"),
            }
        });
    }

    /// Handle one text frame read from `conn`
    pub async fn handle_client_frame(&self, conn: &Arc<Connection>, frame: Vec<u8>) {
        let mut event: WebsocketEvent = match decode(frame) {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_malformed();
                crate::log_ws!(Level::WARN, conn = %conn.id(), error = %e, "malformed frame dropped");
                return;
            }
        };

        // Identity comes from the handshake, never from the payload
        event.user_id = conn.user_id().to_string();
        event.session_id = conn.session_id().to_string();

        if event.event_type.is_storage() {
            self.storage.spawn(conn.clone(), event);
        } else if event.event_type.is_debug_pong() {
            self.record_pong(&event);
        } else {
            self.hub.broadcast(event).await;
        }
    }

    /// Handle one message from the broker
    pub async fn route_upstream(&self, message: UpstreamMessage) {
        let UpstreamMessage { topic, payload } = message;
        let payload = payload.to_vec();
        match topic.as_str() {
            topics::COMMAND => self.on_command(payload).await,
            topics::VOICE_RESULT => self.on_voice_result(payload).await,
            topics::DEBUG_START => self.on_debug_start(payload).await,
            other => {
                crate::log_upstream!(Level::DEBUG, topic = other, "unhandled topic dropped");
            }
        }
    }

    async fn on_command(&self, payload: Vec<u8>) {
        let Some(command) = self.decode_upstream::<Command>(topics::COMMAND, payload) else {
            return;
        };
        let data = match command.axes {
            Some(axes) if !axes.is_empty() => Value::from(axes),
            _ => Value::Null,
        };
        let event = WebsocketEvent::to_all_masters(EventType::command(&command.kind), data);
        crate::log_upstream!(Level::INFO, event_type = %event.event_type, "command forwarded");
        self.hub.broadcast(event).await;
    }

    async fn on_voice_result(&self, payload: Vec<u8>) {
        let Some(result) = self.decode_upstream::<VoiceResult>(topics::VOICE_RESULT, payload) else {
            return;
        };
        match result {
            VoiceResult::Success { info } => self.forward_voice(info).await,
            VoiceResult::Failed { error } => {
                crate::log_upstream!(
                    Level::DEBUG,
                    error = ?error.map(|e| e.error),
                    "voice recognition failed"
                );
            }
            VoiceResult::VoiceDebug(info) => self.record_voice_debug(info),
        }
    }

    async fn forward_voice(&self, info: VoiceInfo) {
        let event_type = if info.is_setting() {
            EventType::new(kinds::COMMAND_SET)
        } else {
            EventType::command(&info.command)
        };
        let data = serde_json::to_value(&info).unwrap_or(Value::Null);
        crate::log_upstream!(Level::INFO, event_type = %event_type, "voice command forwarded");
        self.hub
            .broadcast(WebsocketEvent::to_all_masters(event_type, data))
            .await;
    }

    fn record_voice_debug(&self, info: DebugInfo) {
        if !self.collector.is_active() {
            crate::log_collector!(Level::WARN, "voice debug timing without an active probe");
            self.publish_status(STATUS_NOT_STARTED);
            return;
        }

        let now = now_millis();
        self.collector
            .add_sample(TimeField::Ultra96ToServer.as_str(), now - info.ultra96_send_time);
        match self.collector.get_sample(TimeField::InitialMqttTime.as_str()) {
            Some(initial) => {
                self.collector.add_sample(
                    TimeField::Esp32ToUltra96.as_str(),
                    info.ultra96_receive_time - initial,
                );
            }
            None => crate::log_collector!(Level::WARN, "probe has no upstream anchor"),
        }
        if let Some(inference) = info.inference_time {
            self.collector
                .add_sample(TimeField::InferenceTime.as_str(), inference);
        }
    }

    async fn on_debug_start(&self, payload: Vec<u8>) {
        let Some(start) = self.decode_upstream::<DebugStart>(topics::DEBUG_START, payload) else {
            return;
        };
        if !self
            .collector
            .start_session(TimeField::required_names(), self.settings.collector_timeout)
        {
            self.publish_status(STATUS_ALREADY_ACTIVE);
            return;
        }

        let now = now_millis();
        self.collector
            .add_sample(TimeField::InitialMqttTime.as_str(), start.timestamp);
        self.collector
            .add_sample(TimeField::InitialServerTime.as_str(), now);
        self.collector
            .add_sample(TimeField::Esp32ToServer.as_str(), now - start.timestamp);

        self.hub
            .broadcast(WebsocketEvent::to_all_masters(
                kinds::DEBUG_PING,
                Value::from(now),
            ))
            .await;
        self.publish_status(STATUS_STARTED);
    }

    fn record_pong(&self, event: &WebsocketEvent) {
        let end_to_end = match event.event_type.as_str() {
            kinds::DEBUG_GESTURE_PONG => TimeField::EndToEndGesture,
            _ => TimeField::EndToEndVoice,
        };
        let ts = event.timestamp;

        if let Some(server) = self.collector.get_sample(TimeField::InitialServerTime.as_str()) {
            self.collector
                .add_sample(TimeField::ServerToVis.as_str(), ts - server);
        }
        match self.collector.get_sample(TimeField::InitialMqttTime.as_str()) {
            Some(initial) => {
                self.collector.add_sample(end_to_end.as_str(), ts - initial);
            }
            None => crate::log_collector!(
                Level::DEBUG,
                event_type = %event.event_type,
                "pong without an active probe"
            ),
        }
    }

    fn decode_upstream<T: serde::de::DeserializeOwned>(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Option<T> {
        match decode(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.metrics.record_malformed();
                crate::log_upstream!(Level::WARN, topic, error = %e, "malformed payload dropped");
                None
            }
        }
    }

    fn publish_status(&self, status: &str) {
        self.publisher.publish(
            &self.settings.status_topic,
            Bytes::copy_from_slice(status.as_bytes()),
        );
    }
}

impl UpstreamSink for EventRouter {
    async fn handle_upstream(&self, message: UpstreamMessage) {
        self.route_upstream(message).await;
    }
}
