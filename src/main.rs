//! Relay process entry point
//!
//! # Architecture
//! - **hub**: session registry actor and connection handles
//! - **collector**: latency probe sessions
//! - **router**: dispatch of client frames and broker messages
//! - **ws**: WebSocket transport
//! - **storage**: presigned-URL requests
//! - **infrastructure**: logging, metrics, config, HTTP API

use anyhow::Context;
use relay_hub::collector::LatencyCollector;
use relay_hub::hub::Hub;
use relay_hub::infrastructure::api::{start_server, AppState};
use relay_hub::infrastructure::logging::init_logging;
use relay_hub::infrastructure::metrics::MetricsCollector;
use relay_hub::router::{EventRouter, RouterSettings};
use relay_hub::storage::StorageHandler;
use relay_hub::upstream::{self, LoggingPublisher};
use relay_hub::ws::WsSettings;
use relay_hub::Config;
use std::sync::Arc;

/// Main application
pub struct RelayApp {
    config: Config,
}

impl RelayApp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Wire the components and serve until the listener fails or Ctrl-C
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        tracing::info!(
            port = config.server.port,
            policy = ?config.hub.master_policy,
            "Starting relay"
        );

        // 1. Shared services
        let metrics = Arc::new(MetricsCollector::new());
        let collector = Arc::new(LatencyCollector::with_metrics(metrics.clone()));
        let (hub, hub_task) = Hub::spawn(
            config.hub.master_policy,
            config.hub.request_queue_capacity,
            metrics.clone(),
        );

        // 2. Router; no object store is linked into this binary
        if config.storage.bucket.is_some() {
            tracing::warn!("storage.bucket is set but no object store backend is available");
        }
        let storage = StorageHandler::new(None, config.storage_timeout())
            .with_presign_expiry(config.presign_expiry());
        let router = Arc::new(EventRouter::new(
            hub,
            collector,
            storage,
            Arc::new(LoggingPublisher),
            metrics.clone(),
            RouterSettings {
                collector_timeout: config.collector_timeout(),
                status_topic: config.collector.status_topic.clone(),
            },
        ));
        router.install_completion_handler();

        // 3. Broker ingest
        let (upstream_tx, upstream_rx) = upstream::channel(config.upstream.ingest_capacity);
        let ingest_task = upstream::spawn_ingest(router.clone(), upstream_rx);
        tracing::info!(
            host = %config.upstream.host,
            port = config.upstream.port,
            "Broker messages accepted on POST /upstream/{{topic}}"
        );

        // 4. HTTP + WebSocket server
        let state = AppState {
            router,
            metrics,
            upstream: upstream_tx,
            ws: WsSettings::from(&config.server),
        };

        tokio::select! {
            result = start_server(state, config.server.port) => {
                result.context("server failed")?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                tracing::info!("Shutdown requested");
            }
        }

        ingest_task.abort();
        hub_task.abort();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guards = init_logging("logs").context("failed to initialize logging")?;

    let config = Config::load().context("failed to load configuration")?;

    RelayApp::new(config).run().await
}
