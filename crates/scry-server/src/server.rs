use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocket;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use scry_core::errors::RelayError;
use scry_core::ids::EndpointId;
use scry_relay::Relay;
use scry_telemetry::MetricsRecorder;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::peer::{self, PeerRegistry};

/// Hub configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Outbound queue depth per peer; overflow drops envelopes.
    pub max_send_queue: usize,
    /// How often dead peers are swept.
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9123,
            max_send_queue: 256,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Shared state passed to the Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub registry: Arc<PeerRegistry>,
    pub metrics: Arc<MetricsRecorder>,
    pub started_at: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the hub. Returns a handle that keeps its background
/// tasks alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, RelayError> {
    let relay = Arc::new(Relay::new());
    let registry = Arc::new(PeerRegistry::new(config.max_send_queue));
    let metrics = Arc::new(MetricsRecorder::new());

    let cleanup = peer::start_cleanup_task(
        Arc::clone(&registry),
        Arc::clone(&relay),
        config.cleanup_interval,
    );

    let state = AppState {
        relay,
        registry,
        metrics,
        started_at: Instant::now(),
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "hub started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    endpoint: Option<String>,
}

/// WebSocket upgrade handler. Peers identify their endpoint name up front:
/// `/ws?endpoint=panel`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> axum::response::Response {
    let Some(endpoint) = query.endpoint.filter(|name| !name.is_empty()) else {
        let error = RelayError::HandshakeRejected("missing endpoint query parameter".into());
        tracing::debug!(%error, "connection rejected");
        return (StatusCode::BAD_REQUEST, error.to_string()).into_response();
    };
    let endpoint = EndpointId::new(endpoint);
    ws.on_upgrade(move |socket| handle_socket(socket, endpoint, state))
}

/// Wire a new peer into the hub relay and run its connection to completion.
async fn handle_socket(socket: WebSocket, endpoint: EndpointId, state: AppState) {
    let (peer, rx) = state.registry.register(endpoint.clone());
    state.relay.add_connection(
        endpoint.clone(),
        peer::outbound_transport(endpoint.clone(), peer.tx.clone(), Arc::clone(&state.metrics)),
    );
    state
        .metrics
        .set_gauge("peers_connected", &[], state.registry.count() as f64);
    tracing::info!(peer = %peer.id, endpoint = %endpoint, "peer connected");

    peer::handle_peer_connection(
        socket,
        peer,
        rx,
        Arc::clone(&state.registry),
        Arc::clone(&state.relay),
        Arc::clone(&state.metrics),
    )
    .await;

    state
        .metrics
        .set_gauge("peers_connected", &[], state.registry.count() as f64);
}

/// Health check HTTP endpoint: status, peer count, uptime, and the
/// best-effort drop counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "peers": state.registry.count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "metrics": state.metrics.snapshot(),
    }))
}
