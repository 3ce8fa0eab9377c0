//! Configuration management for the relay
//!
//! Loads configuration from config.toml at startup, then applies the
//! deployment environment variables on top.
//! All values are configurable to avoid hardcoded constants.

use crate::hub::MasterPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Relay configuration
///
/// Every section is optional in the file; missing values take defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// WebSocket/HTTP listener and per-connection limits
    #[serde(default)]
    pub server: ServerConfig,

    /// Session hub behaviour
    #[serde(default)]
    pub hub: HubConfig,

    /// Latency probe settings
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Broker connection values for the external pub/sub adapter
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Certificate paths for the TLS terminator and broker client
    #[serde(default)]
    pub tls: TlsConfig,

    /// Object-storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Frames buffered per connection before it is evicted
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Must exceed the ping interval or idle peers time out
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,

    /// Close connections whose client certificate was not verified
    #[serde(default)]
    pub require_verified_client: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HubConfig {
    #[serde(default)]
    pub master_policy: MasterPolicy,

    #[serde(default = "default_request_queue_capacity")]
    pub request_queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default = "default_collector_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_status_topic")]
    pub status_topic: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_host")]
    pub host: String,

    #[serde(default = "default_upstream_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub pass: Option<String>,

    /// Buffered broker messages awaiting the router
    #[serde(default = "default_ingest_capacity")]
    pub ingest_capacity: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub server_cert: Option<PathBuf>,
    #[serde(default)]
    pub server_key: Option<PathBuf>,
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Bucket name; storage requests are refused without one
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,

    #[serde(default = "default_storage_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_bytes: default_max_message_bytes(),
            ping_interval_secs: default_ping_interval_secs(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            require_verified_client: false,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            master_policy: MasterPolicy::default(),
            request_queue_capacity: default_request_queue_capacity(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_collector_timeout_ms(),
            status_topic: default_status_topic(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            port: default_upstream_port(),
            user: None,
            pass: None,
            ingest_capacity: default_ingest_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            presign_expiry_secs: default_presign_expiry_secs(),
            request_timeout_secs: default_storage_timeout_secs(),
        }
    }
}

fn default_port() -> u16 {
    8443
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_max_message_bytes() -> usize {
    512 * 1024
}

fn default_ping_interval_secs() -> u64 {
    54 // 9/10 of the read timeout
}

fn default_read_timeout_secs() -> u64 {
    60
}

fn default_write_timeout_secs() -> u64 {
    10
}

fn default_request_queue_capacity() -> usize {
    1024
}

fn default_collector_timeout_ms() -> u64 {
    5000
}

fn default_status_topic() -> String {
    crate::upstream::topics::DEBUG_STATUS.to_string()
}

fn default_upstream_host() -> String {
    "localhost".to_string()
}

fn default_upstream_port() -> u16 {
    8883
}

fn default_ingest_capacity() -> usize {
    1024
}

fn default_presign_expiry_secs() -> u64 {
    300
}

fn default_storage_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from the file named by `CONFIG_PATH`
    ///
    /// If the file doesn't exist, defaults are used. Environment overrides
    /// are applied either way.
    /// # Errors
    /// Returns error if the file exists but cannot be parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());

        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(contents) => Self::from_toml(&contents)?,
            // File not found - use defaults
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply deployment variables through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("WS_PORT") {
            self.server.port = parse_env("WS_PORT", &port)?;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.upstream.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.upstream.port = parse_env("MQTT_PORT", &port)?;
        }
        if let Some(user) = lookup("MQTT_USER") {
            self.upstream.user = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASS") {
            self.upstream.pass = Some(pass);
        }

        let paths: [(&str, &mut Option<PathBuf>); 5] = [
            ("CA_CERT", &mut self.tls.ca_cert),
            ("SERVER_CERT", &mut self.tls.server_cert),
            ("SERVER_KEY", &mut self.tls.server_key),
            ("CLIENT_CERT", &mut self.tls.client_cert),
            ("CLIENT_KEY", &mut self.tls.client_key),
        ];
        for (name, slot) in paths {
            if let Some(path) = lookup(name) {
                *slot = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    /// Reject values that would make the relay misbehave at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "server.outbound_queue_capacity must be > 0".into(),
            ));
        }
        if self.hub.request_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.request_queue_capacity must be > 0".into(),
            ));
        }
        if self.server.ping_interval_secs == 0
            || self.server.ping_interval_secs >= self.server.read_timeout_secs
        {
            return Err(ConfigError::Invalid(
                "server.ping_interval_secs must be between 0 and read_timeout_secs".into(),
            ));
        }
        if self.collector.timeout_ms == 0 {
            return Err(ConfigError::Invalid("collector.timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn collector_timeout(&self) -> Duration {
        Duration::from_millis(self.collector.timeout_ms)
    }

    #[inline]
    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.request_timeout_secs)
    }

    #[inline]
    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.storage.presign_expiry_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.outbound_queue_capacity, 256);
        assert_eq!(config.server.max_message_bytes, 524_288);
        assert_eq!(config.hub.master_policy, MasterPolicy::Cascade);
        assert_eq!(config.collector_timeout(), Duration::from_millis(5000));
        assert_eq!(config.collector.status_topic, "debug/status");
        assert_eq!(config.presign_expiry(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_toml(
            r#"
            [hub]
            master_policy = "reelect"

            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.hub.master_policy, MasterPolicy::Reelect);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.read_timeout_secs, 60);
        assert_eq!(config.storage.request_timeout_secs, 30);
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml("[hub]\nmaster_policy = \"anarchy\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WS_PORT", "7000"),
            ("MQTT_HOST", "broker.local"),
            ("MQTT_USER", "relay"),
            ("CA_CERT", "/certs/ca.pem"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.upstream.host, "broker.local");
        assert_eq!(config.upstream.user.as_deref(), Some("relay"));
        assert_eq!(config.upstream.port, 8883);
        assert_eq!(config.tls.ca_cert, Some(PathBuf::from("/certs/ca.pem")));
        assert_eq!(config.tls.server_key, None);
    }

    #[test]
    fn test_bad_env_port() {
        let mut config = Config::default();
        let err = config
            .apply_env(|name| (name == "MQTT_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name: "MQTT_PORT", .. }));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.server.ping_interval_secs = 60;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.outbound_queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
