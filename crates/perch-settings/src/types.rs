//! Settings types, one struct per section of `settings.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PerchSettings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub store: StoreSettings,
    pub poster: PosterSettings,
    pub logging: LoggingSettings,
}

impl PerchSettings {
    /// Reject values the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/', got {:?}",
                self.server.ws_path
            )));
        }
        if self.server.max_message_size == 0 {
            return Err(invalid("server.maxMessageSize must be at least 1"));
        }
        if self.broker.max_workers == 0 {
            return Err(invalid("broker.maxWorkers must be at least 1"));
        }
        if self.broker.intake_capacity == 0 {
            return Err(invalid("broker.intakeCapacity must be at least 1"));
        }
        if self.broker.request_timeout_ms == 0 {
            return Err(invalid("broker.requestTimeoutMs must be at least 1"));
        }
        if self.store.max_connections == 0 {
            return Err(invalid("store.maxConnections must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> SettingsError {
    SettingsError::InvalidValue(message.to_owned())
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Path the WebSocket upgrade is served on.
    pub ws_path: String,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8021,
            ws_path: "/ws".to_string(),
            max_message_size: 64 * 1024,
        }
    }
}

/// What a connection experiences when the intake queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait for room, up to the request deadline.
    #[default]
    Block,
    /// Answer immediately with a "server busy" error reply.
    Reject,
}

impl OverflowPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "block" => Some(Self::Block),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Intake queue and worker pool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Requests that may wait in the shared intake queue.
    pub intake_capacity: usize,
    /// Handlers allowed to run at the same time.
    pub max_workers: usize,
    /// Deadline attached to every request, in milliseconds.
    pub request_timeout_ms: u64,
    pub overflow: OverflowPolicy,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            intake_capacity: 256,
            max_workers: 64,
            request_timeout_ms: 30_000,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub path: PathBuf,
    /// Maximum concurrent store connections.
    pub max_connections: u32,
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: perch_home().join("perch.db"),
            max_connections: 50,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Posting service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PosterSettings {
    pub endpoint: String,
    /// File holding the bearer token. Posting is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    pub timeout_ms: u64,
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.twitter.com/2/tweets".to_string(),
            credentials_path: None,
            timeout_ms: 10_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`RUST_LOG` wins when set).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides, e.g. `{"perch_server": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: BTreeMap::new(),
        }
    }
}

/// `~/.perch`, falling back to `/tmp/.perch` without `HOME`.
pub fn perch_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".perch")
}
