//! Session relay hub
//!
//! Core library for the AR gesture relay: a session broadcast hub with one
//! master per session, and a deadline-gated latency collector.

pub mod collector;
pub mod core;
pub mod hub;
pub mod infrastructure;
pub mod router;
pub mod storage;
pub mod upstream;
pub mod ws;

// Re-export commonly used types
pub use collector::{LatencyCollector, LatencyReport};
pub use hub::{Connection, ConnectionInfo, Hub, MasterPolicy};
pub use infrastructure::config::Config;
pub use router::{EventRouter, RouterSettings};

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] infrastructure::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Decode error: {0}")]
    Decode(#[from] crate::core::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;
