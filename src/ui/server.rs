//! HTTP control surface

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::error::{Error, Result};
use crate::session::SessionManager;
use crate::ui::handlers;

/// Shared state passed to all handlers
pub struct AppState {
    pub session: Arc<SessionManager>,
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, session: Arc<SessionManager>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { session }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/devices", get(handlers::get_devices))
            .route("/api/session/start", post(handlers::start_session))
            .route("/api/session/stop", post(handlers::stop_session))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub fn address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid UI bind address: {}", e)))
    }

    /// Serve until the process exits
    pub async fn run(self) -> Result<()> {
        let addr = self.address()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on http://{}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Serve on a background task
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Web server error: {}", e);
            }
        })
    }
}
