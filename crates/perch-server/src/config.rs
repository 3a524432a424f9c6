//! Runtime configuration for the listener and the broker.

use std::time::Duration;

use perch_settings::{BrokerSettings, OverflowPolicy, ServerSettings};

/// Listener configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// `0` binds a free port; the chosen one is reported by the handle.
    pub port: u16,
    pub ws_path: String,
    pub max_message_size: usize,
    pub broker: BrokerConfig,
    /// How long `ServerHandle::shutdown` waits for tasks to drain.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default(), &BrokerSettings::default())
    }
}

impl ServerConfig {
    pub fn from_settings(server: &ServerSettings, broker: &BrokerSettings) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            ws_path: server.ws_path.clone(),
            max_message_size: server.max_message_size,
            broker: BrokerConfig::from_settings(broker),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Intake queue and worker pool configuration.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub intake_capacity: usize,
    pub max_workers: usize,
    pub request_timeout: Duration,
    pub overflow: OverflowPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from_settings(&BrokerSettings::default())
    }
}

impl BrokerConfig {
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            intake_capacity: settings.intake_capacity.max(1),
            max_workers: settings.max_workers.max(1),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            overflow: settings.overflow,
        }
    }
}
