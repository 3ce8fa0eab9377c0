//! Hub event loop
//!
//! One task owns the `SessionRegistry` outright. Registration, unregistration,
//! broadcast and snapshot requests arrive over a single mpsc queue and are
//! applied strictly in submission order. The loop never awaits a connection:
//! fan-out uses `try_send` and evicts on a full queue.

use crate::core::WebsocketEvent;
use crate::hub::connection::Connection;
use crate::hub::registry::{HubSnapshot, MasterPolicy, Registration, Removal, SessionRegistry};
use crate::infrastructure::metrics::MetricsCollector;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Requests accepted by the hub loop
enum HubRequest {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Broadcast(WebsocketEvent),
    Snapshot(oneshot::Sender<HubSnapshot>),
}

/// Cloneable handle to the hub loop
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubRequest>,
}

impl Hub {
    /// Spawn the hub loop on the current runtime
    ///
    /// The loop exits once every `Hub` handle has been dropped.
    pub fn spawn(
        policy: MasterPolicy,
        queue_capacity: usize,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let actor = HubActor {
            registry: SessionRegistry::new(policy),
            rx,
            metrics,
        };
        let handle = tokio::spawn(actor.run());
        (Self { tx }, handle)
    }

    /// Queue a registration
    pub async fn register(&self, conn: Arc<Connection>) {
        self.submit(HubRequest::Register(conn)).await;
    }

    /// Queue an unregistration (idempotent)
    pub async fn unregister(&self, conn: Arc<Connection>) {
        self.submit(HubRequest::Unregister(conn)).await;
    }

    /// Queue an event for fan-out
    pub async fn broadcast(&self, event: WebsocketEvent) {
        self.submit(HubRequest::Broadcast(event)).await;
    }

    /// Registry view as of every request submitted before this one
    pub async fn snapshot(&self) -> HubSnapshot {
        let (tx, rx) = oneshot::channel();
        self.submit(HubRequest::Snapshot(tx)).await;
        rx.await.unwrap_or_default()
    }

    async fn submit(&self, request: HubRequest) {
        if self.tx.send(request).await.is_err() {
            tracing::warn!(target: "hub", "hub loop stopped, request dropped");
        }
    }
}

struct HubActor {
    registry: SessionRegistry,
    rx: mpsc::Receiver<HubRequest>,
    metrics: Arc<MetricsCollector>,
}

impl HubActor {
    async fn run(mut self) {
        tracing::info!(target: "hub", policy = ?self.registry.policy(), "hub loop started");
        while let Some(request) = self.rx.recv().await {
            self.handle(request);
        }
        tracing::info!(target: "hub", "hub loop stopped");
    }

    fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::Register(conn) => {
                if self.registry.register(conn) != Registration::Rejected {
                    self.metrics.record_connection_registered();
                }
            }
            HubRequest::Unregister(conn) => {
                let removal = self.registry.unregister(&conn);
                self.record_removal(removal);
            }
            HubRequest::Broadcast(event) => {
                let delivery = self.registry.broadcast(&event);
                self.metrics.record_delivered(delivery.delivered as u64);
                for _ in &delivery.evicted {
                    self.metrics.record_eviction();
                }
                for _ in 0..delivery.teardowns {
                    self.metrics.record_teardown();
                }
                self.metrics
                    .record_connections_unregistered(delivery.closed as u64);
            }
            HubRequest::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
        }
    }

    fn record_removal(&self, removal: Removal) {
        match removal {
            Removal::NotMember => {}
            Removal::Teardown { closed } => {
                self.metrics
                    .record_connections_unregistered(1 + closed as u64);
                self.metrics.record_teardown();
            }
            _ => self.metrics.record_connection_unregistered(),
        }
    }
}
