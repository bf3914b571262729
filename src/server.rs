//! HTTP surface: the websocket endpoint plus health and status probes.

use crate::config::ServerConfig;
use crate::scheduler::RoundEngine;
use crate::ws::ws_handler;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RoundEngine>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub struct ApiServer {
    config: ServerConfig,
    engine: Arc<RoundEngine>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, engine: Arc<RoundEngine>) -> Self {
        Self { config, engine }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.socket_addr()?;
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("listening on http://{}", addr);
        info!("  GET  /ws          - websocket endpoint");
        info!("  GET  /health      - health check");
        info!("  GET  /api/status  - engine status");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.engine.stop();
        info!("server stopped gracefully");
        Ok(())
    }

    fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            started_at: chrono::Utc::now(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .route("/api/status", get(status))
            .with_state(state)
            .layer(cors_layer(&self.config.allowed_origins))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(
                allowed_origins
                    .iter()
                    .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let round = state.engine.snapshot().await;
    let now = chrono::Utc::now();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "now": now.to_rfc3339(),
        "uptimeSecs": (now - state.started_at).num_seconds(),
        "round": round,
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
