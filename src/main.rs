//! # perch
//!
//! Broker binary: loads settings, opens the store, and serves the WebSocket
//! endpoint until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use perch_poster::{Credentials, DisabledPoster, HttpPoster, Poster};
use perch_server::{HandlerContext, HandlerRegistry, ServerConfig};
use perch_settings::{PerchSettings, PosterSettings};
use perch_store::{ConnectionConfig, Database};
use perch_telemetry::TelemetryConfig;
use tracing::{info, warn};

/// perch request/reply broker.
#[derive(Parser, Debug)]
#[command(name = "perch", about = "WebSocket request/reply broker", version)]
struct Cli {
    /// Settings file (defaults to `~/.perch/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Cli {
    fn apply(self, settings: &mut PerchSettings) {
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db) = self.db {
            settings.store.path = db;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(perch_settings::settings_path);
    let mut settings = perch_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    let telemetry = TelemetryConfig::from_levels(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        settings.logging.json,
    );
    let _ = perch_telemetry::init_telemetry(&telemetry);
    info!(settings = %settings_path.display(), "starting perch");

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let db = Database::open(
        &settings.store.path,
        &ConnectionConfig {
            pool_size: settings.store.max_connections,
            busy_timeout_ms: settings.store.busy_timeout_ms,
            ..ConnectionConfig::default()
        },
    )
    .with_context(|| format!("failed to open store at {}", settings.store.path.display()))?;
    db.ping().context("store is not answering")?;

    let poster = build_poster(&settings.poster)?;
    let ctx = HandlerContext::new(db, poster);

    let config = ServerConfig::from_settings(&settings.server, &settings.broker);
    let handle = perch_server::start(config, ctx, HandlerRegistry::with_defaults(), Some(metrics))
        .await
        .context("failed to start server")?;
    info!(addr = %handle.addr(), "perch ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_poster(settings: &PosterSettings) -> Result<Arc<dyn Poster>> {
    let Some(path) = &settings.credentials_path else {
        warn!("no credentials configured, posting disabled");
        return Ok(Arc::new(DisabledPoster));
    };
    let credentials = Credentials::load(path)
        .with_context(|| format!("failed to load credentials from {}", path.display()))?;
    let poster = HttpPoster::new(
        settings.endpoint.clone(),
        credentials,
        Duration::from_millis(settings.timeout_ms),
    )
    .context("failed to build posting client")?;
    info!(endpoint = %poster.endpoint(), "posting enabled");
    Ok(Arc::new(poster))
}
