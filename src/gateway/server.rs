//! # Gateway Server
//!
//! Axum application serving the WebSocket endpoint plus `/health` and `/metrics`.
//! Shutdown is driven by a [`CancellationToken`]: once it fires, every live session is
//! closed with reason `"server shutdown"` and the listener stops accepting.

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::connections::ConnectionRegistry;
use crate::auth::AuthService;
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::protocols::websocket::WebSocketHandler;
use crate::routing::{register_default_handlers, MessageRouter};

/// Shared state of the gateway HTTP app
#[derive(Clone)]
pub struct AppState {
    pub gate_id: String,
    pub websocket: Arc<WebSocketHandler>,
    pub connections: Arc<ConnectionRegistry>,
    pub metrics: Option<PrometheusHandle>,
}

pub struct GatewayServer {
    config: GatewayConfig,
    state: AppState,
    router: Arc<MessageRouter>,
}

impl GatewayServer {
    /// Wire the connection registry, message router and WebSocket handler together
    ///
    /// The built-in handlers are registered; more can be added through
    /// [`message_router`](Self::message_router) before serving.
    pub fn new(config: GatewayConfig, auth: Arc<dyn AuthService>, metrics: Option<PrometheusHandle>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new());
        register_default_handlers(&router, auth.clone());

        let websocket = Arc::new(WebSocketHandler::new(
            config.server.gate_id.clone(),
            config.websocket.clone(),
            connections.clone(),
            router.clone(),
            auth,
        ));

        let state = AppState {
            gate_id: config.server.gate_id.clone(),
            websocket,
            connections,
            metrics,
        };

        Self { config, state, router }
    }

    pub fn message_router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }

    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.config.server.bind_address, self.config.server.port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))
    }

    pub fn app(&self) -> Router {
        let mut app = Router::new()
            .route(&self.config.server.ws_path, get(ws_upgrade))
            .route("/health", get(health));

        if self.config.observability.metrics_enabled && self.state.metrics.is_some() {
            app = app.route(&self.config.observability.metrics_path, get(render_metrics));
        }

        app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> GatewayResult<()> {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> GatewayResult<()> {
        let local_addr = listener.local_addr()?;
        let app = self.app();
        let connections = self.state.connections.clone();

        info!(
            addr = %local_addr,
            gate_id = %self.state.gate_id,
            ws_path = %self.config.server.ws_path,
            "Gateway listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                connections.close_all("server shutdown");
            })
            .await?;

        info!(gate_id = %self.state.gate_id, "Gateway stopped");
        Ok(())
    }
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    state.websocket.clone().handle_upgrade(ws)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "gate_id": state.gate_id,
        "active_connections": state.connections.len(),
        "users": state.connections.user_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
