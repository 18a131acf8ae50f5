pub mod error;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::mcp::McpHandler;
use crate::session::SessionRegistry;
use crate::tunnel::TunnelSupervisor;

use handlers::*;

/// Interval between SSE keep-alive comments unless configured otherwise.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub handler: McpHandler,
    pub sessions: SessionRegistry,
    /// Port the engine actually bound, reported by `/health`.
    pub port: u16,
    pub supervisor: Option<Arc<TunnelSupervisor>>,
    pub keep_alive: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sse", get(sse))
        .route("/message", post(message))
        .route("/health", get(health))
        .route("/tunnels", get(tunnels))
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
