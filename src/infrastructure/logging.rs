//! Centralized file-based logging system
//!
//! Writes logs to files in logs/ directory, separated by log type:
//! - logs/main - all events, JSON
//! - logs/error - warnings and errors only
//! - logs/hub - session membership and fan-out
//! - logs/collector - latency probe lifecycle
//! - logs/ws - WebSocket transport and HTTP API
//! - logs/upstream - broker traffic

use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::{filter_fn, LevelFilter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Per-target log files, each fed by events whose target starts with the name
const TARGET_LOGS: [&str; 4] = ["hub", "collector", "ws", "upstream"];

/// Initialize centralized file logging
///
/// Creates logs/ and one rolling appender per log type. `RUST_LOG` overrides
/// the default `info` filter.
/// Returns the WorkerGuards, which must be kept alive for the duration of
/// the program.
pub fn init_logging(logs_dir: impl AsRef<Path>) -> std::io::Result<Vec<WorkerGuard>> {
    let logs_dir = logs_dir.as_ref();
    for name in ["main", "error"].into_iter().chain(TARGET_LOGS) {
        fs::create_dir_all(logs_dir.join(name))?;
    }

    let mut guards = Vec::new();

    // Main log - all logs
    let (main_appender, main_guard) = create_appender(logs_dir, "main");
    guards.push(main_guard);
    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    // Error log - ERROR and WARN only
    let (error_appender, error_guard) = create_appender(logs_dir, "error");
    guards.push(error_guard);
    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(LevelFilter::WARN);

    let mut target_layers = Vec::new();
    for target in TARGET_LOGS {
        let (appender, guard) = create_appender(logs_dir, target);
        guards.push(guard);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .with_filter(filter_fn(move |metadata| metadata.target().starts_with(target)))
            .boxed();
        target_layers.push(layer);
    }

    // Console layer for development
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(target_layers)
        .with(console_layer)
        .init();

    tracing::info!(dir = %logs_dir.display(), "Logging system initialized");

    Ok(guards)
}

/// Create a daily rolling, non-blocking file appender
fn create_appender(logs_dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, logs_dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_hub {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "hub", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_collector {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "collector", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_ws {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "ws", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_upstream {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "upstream", $level, $($arg)+)
    };
}
