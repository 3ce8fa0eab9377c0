//! WebSocket transport adapter
//!
//! Upgrades `GET /ws` requests, builds a `Connection` from the handshake and
//! runs the reader/writer pumps for it.

pub mod pump;
pub mod server;

pub use server::{ws_handler, HandshakeQuery, CERT_CN_HEADER, CERT_VERIFIED_HEADER};

use crate::infrastructure::config::ServerConfig;
use std::time::Duration;

/// Per-connection transport limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsSettings {
    pub outbound_capacity: usize,
    pub max_message_bytes: usize,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub require_verified_client: bool,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for WsSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbound_capacity: config.outbound_queue_capacity,
            max_message_bytes: config.max_message_bytes,
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
            require_verified_client: config.require_verified_client,
        }
    }
}
