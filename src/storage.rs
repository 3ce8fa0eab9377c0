//! Object-storage request handling
//!
//! Clients ask for presigned URLs over the WebSocket using `S3_*` events.
//! The handler talks to an `ObjectStore`, bounds every request with a
//! timeout and replies to the requesting connection only.

use crate::core::{kinds, EventType, WebsocketEvent};
use crate::hub::{Connection, SendError};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Extension appended to upload keys
pub const IMAGE_EXTENSION: &str = ".jpg";

/// How long a reply may wait for space in the requester's queue
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifetime of a presigned URL unless configured otherwise
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Request timed out")]
    Timeout,

    #[error("Object storage not configured")]
    Unavailable,

    #[error("Invalid storage request: {0}")]
    InvalidRequest(String),

    #[error("Object store error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Presigning object store
///
/// Implementations sign URLs against a bucket; keys are passed through
/// untouched apart from what `upload_key` builds. Signed URLs stay valid
/// for `expires_in`.
pub trait ObjectStore: Send + Sync {
    fn presign_upload<'a>(
        &'a self,
        key: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, StorageResult<String>>;

    fn presign_download<'a>(
        &'a self,
        key: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, StorageResult<String>>;

    fn presign_delete<'a>(
        &'a self,
        key: &'a str,
        expires_in: Duration,
    ) -> BoxFuture<'a, StorageResult<String>>;

    /// Every key under `prefix`
    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, StorageResult<Vec<String>>>;
}

/// Upload key for an image captured at `timestamp` in `session_id`
pub fn upload_key(session_id: &str, timestamp: i64) -> String {
    with_extension(format!("{}/{}", session_id, timestamp))
}

fn with_extension(key: String) -> String {
    if key.ends_with(IMAGE_EXTENSION) {
        key
    } else {
        key + IMAGE_EXTENSION
    }
}

/// Keys the client has that the store lacks, and the reverse
///
/// Both lists keep the order of their source listing.
pub fn diff_listings(client: &[String], store: &[String]) -> (Vec<String>, Vec<String>) {
    let in_store: HashSet<&str> = store.iter().map(String::as_str).collect();
    let on_client: HashSet<&str> = client.iter().map(String::as_str).collect();

    let missing_in_store = client
        .iter()
        .filter(|k| !in_store.contains(k.as_str()))
        .cloned()
        .collect();
    let missing_on_client = store
        .iter()
        .filter(|k| !on_client.contains(k.as_str()))
        .cloned()
        .collect();
    (missing_in_store, missing_on_client)
}

/// Body of `S3_SYNC_RESPONSE`
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct SyncPlan {
    #[serde(rename = "PUT", skip_serializing_if = "Vec::is_empty")]
    pub put: Vec<String>,
    #[serde(rename = "PUTNames", skip_serializing_if = "Vec::is_empty")]
    pub put_names: Vec<String>,
    #[serde(rename = "GET", skip_serializing_if = "Vec::is_empty")]
    pub get: Vec<String>,
}

/// Handles `S3_*` requests for the router
#[derive(Clone)]
pub struct StorageHandler {
    store: Option<Arc<dyn ObjectStore>>,
    request_timeout: Duration,
    presign_expiry: Duration,
}

impl StorageHandler {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
            presign_expiry: DEFAULT_PRESIGN_EXPIRY,
        }
    }

    /// Lifetime handed to the store for every signed URL
    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    pub fn presign_expiry(&self) -> Duration {
        self.presign_expiry
    }

    /// Handler that answers every request with `S3_ERROR`
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(30))
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Run the request on its own task so the reader keeps going
    pub fn spawn(&self, conn: Arc<Connection>, event: WebsocketEvent) {
        let handler = self.clone();
        tokio::spawn(async move {
            handler.handle(&conn, event).await;
        });
    }

    /// Process one request and reply to `conn`
    pub async fn handle(&self, conn: &Connection, event: WebsocketEvent) {
        let session_id = event.session_id.clone();
        let reply = match tokio::time::timeout(self.request_timeout, self.respond(&event)).await {
            Ok(Ok((event_type, data))) => {
                WebsocketEvent::new(event_type, conn.user_id(), &session_id, data)
            }
            Ok(Err(e)) => self.error_reply(conn, &event, e),
            Err(_) => self.error_reply(conn, &event, StorageError::Timeout),
        };
        send_reply(conn, reply).await;
    }

    fn error_reply(&self, conn: &Connection, event: &WebsocketEvent, error: StorageError) -> WebsocketEvent {
        tracing::warn!(
            target: "ws",
            conn = %conn.id(),
            event_type = %event.event_type,
            error = %error,
            "storage request failed"
        );
        WebsocketEvent::new(
            kinds::S3_ERROR,
            conn.user_id(),
            &event.session_id,
            Value::String(error.to_string()),
        )
    }

    async fn respond(&self, event: &WebsocketEvent) -> StorageResult<(EventType, Value)> {
        let store = self.store.as_deref().ok_or(StorageError::Unavailable)?;
        match event.event_type.as_str() {
            kinds::S3_UPLOAD_REQUEST => {
                let key = upload_key(&event.session_id, event.timestamp);
                let url = store.presign_upload(&key, self.presign_expiry).await?;
                Ok((kinds::S3_UPLOAD_RESPONSE.into(), Value::String(url)))
            }
            kinds::S3_SYNC_REQUEST => {
                let plan =
                    sync_plan(store, &event.session_id, &event.data, self.presign_expiry).await?;
                let data = serde_json::to_value(plan)
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok((kinds::S3_SYNC_RESPONSE.into(), data))
            }
            kinds::S3_DELETE_REQUEST => {
                let key = event.data.as_str().ok_or_else(|| {
                    StorageError::InvalidRequest("delete needs a key".to_string())
                })?;
                let url = store.presign_delete(key, self.presign_expiry).await?;
                Ok((kinds::S3_DELETE_RESPONSE.into(), Value::String(url)))
            }
            other => Err(StorageError::InvalidRequest(other.to_string())),
        }
    }
}

async fn sync_plan(
    store: &dyn ObjectStore,
    session_id: &str,
    data: &Value,
    expires_in: Duration,
) -> StorageResult<SyncPlan> {
    let listing = store.list(session_id).await?;
    // A malformed client list counts as empty: the client then downloads everything
    let client: Vec<String> = match serde_json::from_value(data.clone()) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::debug!(target: "ws", error = %e, "sync request without a key list");
            Vec::new()
        }
    };

    let (missing_in_store, missing_on_client) = diff_listings(&client, &listing);
    let mut plan = SyncPlan::default();
    for key in &missing_in_store {
        plan.put.push(store.presign_upload(key, expires_in).await?);
    }
    plan.put_names = missing_in_store;
    for key in &missing_on_client {
        plan.get.push(store.presign_download(key, expires_in).await?);
    }
    Ok(plan)
}

async fn send_reply(conn: &Connection, reply: WebsocketEvent) {
    let frame = match reply.encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(target: "ws", error = %e, "failed to encode storage reply");
            return;
        }
    };
    match conn.send_timeout(frame, REPLY_TIMEOUT).await {
        Ok(()) => {}
        Err(SendError::Timeout) => {
            tracing::warn!(target: "ws", conn = %conn.id(), "storage reply timed out waiting for queue space")
        }
        Err(e) => tracing::debug!(target: "ws", conn = %conn.id(), error = %e, "storage reply dropped"),
    }
}
