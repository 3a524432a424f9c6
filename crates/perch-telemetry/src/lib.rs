//! Structured logging for perch.
//!
//! One global `tracing` subscriber, filtered by `RUST_LOG` when set and by
//! [`TelemetryConfig`] otherwise. Output is human-readable or JSON lines.

#![deny(unsafe_code)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `perch_server` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from textual levels, skipping any that do not parse.
    pub fn from_levels<'a, I>(level: &str, modules: I, json: bool) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let log_level = parse_level(level).unwrap_or_else(|| {
            eprintln!("perch-telemetry: unknown log level {level:?}, using info");
            Level::INFO
        });
        let module_levels = modules
            .into_iter()
            .filter_map(|(module, lvl)| parse_level(lvl).map(|l| (module.to_string(), l)))
            .collect();
        Self {
            log_level,
            module_levels,
            json,
        }
    }

    /// `EnvFilter` directives, e.g. `info,perch_store=debug`.
    pub fn filter_directives(&self) -> String {
        let mut directives = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            directives.push(',');
            directives.push_str(module);
            directives.push('=');
            directives.push_str(&level.to_string().to_lowercase());
        }
        directives
    }
}

/// Parse `trace`, `debug`, `info`, `warn` or `error` (any case).
pub fn parse_level(value: &str) -> Option<Level> {
    Level::from_str(value.trim()).ok()
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
