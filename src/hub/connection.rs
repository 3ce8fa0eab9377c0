//! Connection handle owned by the hub
//!
//! One handle per live WebSocket peer. The hub pushes pre-serialized frames
//! into its bounded outbound queue; the writer pump drains the other end.
//! - `try_send` never blocks (full queue is reported, not awaited)
//! - `close` drops the queue sender exactly once and wakes the reader
//! - `is_master` is written only by the hub

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection identifier, unique per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity established at handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub user_id: String,
    pub session_id: String,
    pub device_id: String,
    /// Common name of the verified client certificate, if any
    pub client_cn: Option<String>,
    pub verified: bool,
}

impl ConnectionInfo {
    /// Identity with the session defaulting to the user id
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let mut session_id = session_id.into();
        if session_id.is_empty() {
            session_id = user_id.clone();
        }
        Self {
            device_id: format!("device_{}", uuid::Uuid::new_v4().simple()),
            user_id,
            session_id,
            client_cn: None,
            verified: false,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_certificate(mut self, client_cn: impl Into<String>, verified: bool) -> Self {
        self.client_cn = Some(client_cn.into());
        self.verified = verified;
        self
    }
}

/// Outbound delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Outbound queue full")]
    Full,
    #[error("Connection closed")]
    Closed,
    #[error("Timed out waiting for queue space")]
    Timeout,
}

/// Live peer handle
pub struct Connection {
    id: ConnectionId,
    info: ConnectionInfo,
    is_master: AtomicBool,
    /// `None` once closed
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    /// Create a handle and the receiving end of its outbound queue
    pub fn new(info: ConnectionInfo, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let conn = Arc::new(Self {
            id: ConnectionId::next(),
            info,
            is_master: AtomicBool::new(false),
            outbound: Mutex::new(Some(tx)),
            shutdown,
        });
        (conn, rx)
    }

    #[inline(always)]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline(always)]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    #[inline(always)]
    pub fn user_id(&self) -> &str {
        &self.info.user_id
    }

    #[inline(always)]
    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    pub(crate) fn set_master(&self, master: bool) {
        self.is_master.store(master, Ordering::Release);
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, payload: Bytes) -> Result<(), SendError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(SendError::Closed)?;
        tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queue a frame, waiting up to `wait` for space
    ///
    /// Used for direct replies outside the hub loop, never by fan-out.
    pub async fn send_timeout(&self, payload: Bytes, wait: Duration) -> Result<(), SendError> {
        let tx = self.outbound.lock().clone().ok_or(SendError::Closed)?;
        tx.send_timeout(payload, wait).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => SendError::Timeout,
            mpsc::error::SendTimeoutError::Closed(_) => SendError::Closed,
        })
    }

    /// Close the outbound queue and signal the transport to stop
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let sender = self.outbound.lock().take();
        self.shutdown.send_replace(true);
        sender.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.info.user_id)
            .field("session_id", &self.info.session_id)
            .field("is_master", &self.is_master())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults_to_user() {
        let info = ConnectionInfo::new("alice", "");
        assert_eq!(info.session_id, "alice");
        assert!(info.device_id.starts_with("device_"));
        assert!(!info.verified);
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = Connection::new(ConnectionInfo::new("a", "s"), 4);
        let (b, _rb) = Connection::new(ConnectionInfo::new("b", "s"), 4);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_try_send_full_queue() {
        let (conn, mut rx) = Connection::new(ConnectionInfo::new("a", "s"), 1);
        assert_eq!(conn.try_send(Bytes::from_static(b"1")), Ok(()));
        assert_eq!(conn.try_send(Bytes::from_static(b"2")), Err(SendError::Full));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn test_close_is_once_and_drains() {
        let (conn, mut rx) = Connection::new(ConnectionInfo::new("a", "s"), 4);
        conn.try_send(Bytes::from_static(b"last")).unwrap();

        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert_eq!(conn.try_send(Bytes::from_static(b"x")), Err(SendError::Closed));

        // Buffered frame still drains, then the queue reports closed
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"last")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let (conn, _rx) = Connection::new(ConnectionInfo::new("a", "s"), 4);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve")
            .unwrap();

        // Already closed: resolves immediately
        conn.closed().await;
    }

    #[tokio::test]
    async fn test_send_timeout_when_full() {
        let (conn, _rx) = Connection::new(ConnectionInfo::new("a", "s"), 1);
        conn.try_send(Bytes::from_static(b"1")).unwrap();
        let res = conn
            .send_timeout(Bytes::from_static(b"2"), Duration::from_millis(20))
            .await;
        assert_eq!(res, Err(SendError::Timeout));
    }
}
