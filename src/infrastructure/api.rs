//! HTTP surface
//!
//! Serves the WebSocket upgrade, a stats endpoint and the broker bridge
//! ingest route. State is shared through `AppState`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use crate::hub::HubSnapshot;
use crate::infrastructure::metrics::{MetricsCollector, MetricsSnapshot};
use crate::router::EventRouter;
use crate::upstream::UpstreamMessage;
use crate::ws::{ws_handler, WsSettings};
use crate::RelayError;

/// Stats response DTO
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDto {
    pub hub: HubSnapshot,
    pub metrics: MetricsSnapshot,
    pub collector_active: bool,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EventRouter>,
    pub metrics: Arc<MetricsCollector>,
    pub upstream: mpsc::Sender<UpstreamMessage>,
    pub ws: WsSettings,
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/stats", get(get_stats))
        .route("/upstream/*topic", post(post_upstream))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the listener fails
pub async fn start_server(state: AppState, port: u16) -> Result<(), RelayError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

/// Serve on an already bound listener
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<(), RelayError> {
    if let Ok(addr) = listener.local_addr() {
        crate::log_ws!(tracing::Level::INFO, %addr, "relay listening");
    }
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Handler for /api/stats
async fn get_stats(State(state): State<AppState>) -> Json<StatsDto> {
    let hub = state.router.hub().snapshot().await;
    Json(StatsDto {
        hub,
        metrics: state.metrics.snapshot(),
        collector_active: state.router.collector().is_active(),
    })
}

/// Handler for POST /upstream/{topic}
///
/// Lets a broker bridge forward messages. Topics may contain slashes.
async fn post_upstream(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Bytes,
) -> StatusCode {
    let message = UpstreamMessage::new(topic, body);
    match state.upstream.try_send(message) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(mpsc::error::TrySendError::Full(_)) => StatusCode::TOO_MANY_REQUESTS,
        Err(mpsc::error::TrySendError::Closed(_)) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::LatencyCollector;
    use crate::hub::{Hub, MasterPolicy};
    use crate::router::RouterSettings;
    use crate::storage::StorageHandler;
    use crate::upstream::{self, RecordingPublisher};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> (AppState, mpsc::Receiver<UpstreamMessage>) {
        let metrics = Arc::new(MetricsCollector::new());
        let (hub, _) = Hub::spawn(MasterPolicy::Cascade, 16, metrics.clone());
        let router = EventRouter::new(
            hub,
            Arc::new(LatencyCollector::new()),
            StorageHandler::disabled(),
            Arc::new(RecordingPublisher::new()),
            metrics.clone(),
            RouterSettings::default(),
        );
        let (tx, rx) = upstream::channel(1);
        let state = AppState {
            router: Arc::new(router),
            metrics,
            upstream: tx,
            ws: WsSettings::default(),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (state, _rx) = state();
        let response = build_router(state)
            .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["collectorActive"], false);
        assert_eq!(json["metrics"]["activeConnections"], 0);
        assert!(json["hub"]["sessions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_ingest_route() {
        let (state, mut rx) = state();
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/upstream/esp32/command")
                    .body(Body::from(r#"{"type":"MOVE"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "esp32/command");
        assert_eq!(&message.payload[..], br#"{"type":"MOVE"}"#);

        // Capacity 1 and nothing draining: second message is pushed back
        let _ = app
            .clone()
            .oneshot(Request::post("/upstream/a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let response = app
            .oneshot(Request::post("/upstream/b").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (state, _rx) = state();
        let response = build_router(state)
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
