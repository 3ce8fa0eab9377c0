//! Infrastructure - everything around the hub and the collector
//!
//! This module contains non-latency-critical code:
//! - Logging and metrics
//! - Configuration management
//! - HTTP API

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;

pub use api::{build_router, start_server, AppState};
