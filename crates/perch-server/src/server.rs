//! Listener: axum router, health and metrics endpoints, startup and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use perch_store::Database;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerHandle};
use crate::config::ServerConfig;
use crate::connection::ConnectionRegistry;
use crate::registry::{HandlerContext, HandlerRegistry};
use crate::translator::Translator;
use crate::ws;

/// Fatal server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<HandlerRegistry>,
    pub broker: BrokerHandle,
    pub connections: Arc<ConnectionRegistry>,
    pub db: Database,
    pub metrics: Option<PrometheusHandle>,
    pub started: Instant,
    pub max_message_size: usize,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind, spawn the broker and the listener, and return a handle.
pub async fn start(
    config: ServerConfig,
    ctx: HandlerContext,
    registry: HandlerRegistry,
    metrics: Option<PrometheusHandle>,
) -> Result<ServerHandle, ServerError> {
    let shutdown = CancellationToken::new();
    let db = ctx.db.clone();

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    let (broker, broker_handle) = Broker::new(&config.broker, ctx, shutdown.clone());
    let broker_task = tokio::spawn(broker.run());

    let connections = Arc::new(ConnectionRegistry::new(shutdown.clone()));
    let state = AppState {
        registry: Arc::new(registry),
        broker: broker_handle,
        connections: Arc::clone(&connections),
        db,
        metrics,
        started: Instant::now(),
        max_message_size: config.max_message_size,
    };
    let router = build_router(state, &config.ws_path);

    info!(addr = %local_addr, ws_path = %config.ws_path, "perch server started");

    let serve_token = shutdown.clone();
    let serve_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        shutdown,
        connections,
        shutdown_timeout: config.shutdown_timeout,
        tasks: vec![serve_task, broker_task],
    })
}

/// Handle returned by [`start`]; keeps the background tasks reachable.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    connections: Arc<ConnectionRegistry>,
    shutdown_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// A clone of the process shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every connection and the broker, then wait for the listener and
    /// broker tasks up to the configured timeout.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        info!(
            connections = self.connections.len(),
            timeout_secs = self.shutdown_timeout.as_secs(),
            "shutting down"
        );
        let drain = futures::future::join_all(self.tasks);
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!("shutdown timed out after {:?}", self.shutdown_timeout);
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, teardown) = state.connections.register();
    info!(connection_id = %id, "client connected");

    let (reader, writer) = ws::split(socket);
    let translator = Translator::new(
        id.clone(),
        reader,
        writer,
        Arc::clone(&state.registry),
        state.broker.clone(),
        teardown,
    );
    let _reason = translator.run().await;
    state.connections.unregister(&id);
}

/// Health check response body.
#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    /// `"healthy"`, or `"degraded"` when the store does not answer.
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db = state.db.clone();
    let store_ok = matches!(tokio::task::spawn_blocking(move || db.ping()).await, Ok(Ok(())));
    let body = HealthResponse {
        status: if store_ok { "healthy" } else { "degraded" },
        uptime_secs: state.started.elapsed().as_secs(),
        connections: state.connections.len(),
    };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(handle)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use crate::config::BrokerConfig;
    use crate::test_helpers::make_context;

    fn make_state(metrics: Option<PrometheusHandle>) -> AppState {
        let ctx = make_context();
        let shutdown = CancellationToken::new();
        let (_broker, broker) = Broker::new(&BrokerConfig::default(), ctx.clone(), shutdown.clone());
        AppState {
            registry: Arc::new(HandlerRegistry::with_defaults()),
            broker,
            connections: Arc::new(ConnectionRegistry::new(shutdown)),
            db: ctx.db,
            metrics,
            started: Instant::now(),
            max_message_size: 64 * 1024,
        }
    }

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let resp = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_is_healthy() {
        let router = build_router(make_state(None), "/ws");
        let (status, body) = get_path(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"], 0);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let router = build_router(make_state(None), "/ws");
        let (status, _) = get_path(router, "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let router = build_router(make_state(Some(handle)), "/ws");
        let (status, _) = get_path(router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn plain_get_on_ws_path_is_not_upgraded() {
        let router = build_router(make_state(None), "/ws");
        let (status, _) = get_path(router, "/ws").await;
        assert!(status.is_client_error(), "{status}");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let router = build_router(make_state(None), "/ws");
        let (status, _) = get_path(router, "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_binds_and_shuts_down() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let handle = start(config, make_context(), HandlerRegistry::with_defaults(), None)
            .await
            .unwrap();
        assert!(handle.port() > 0);
        assert!(!handle.is_shutting_down());
        let token = handle.shutdown_token();
        handle.shutdown().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn bind_conflict_is_bind_error() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            port: taken.local_addr().unwrap().port(),
            ..ServerConfig::default()
        };
        let result = start(config, make_context(), HandlerRegistry::with_defaults(), None).await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
