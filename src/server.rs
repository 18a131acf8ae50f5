//! Protocol engine lifecycle: binding with port fallback, serving the HTTP
//! router, and orderly shutdown.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState};
use crate::config::ServerSection;
use crate::mcp::dispatch::Dispatcher;
use crate::mcp::McpHandler;
use crate::session::{SessionRegistry, DEFAULT_MAX_SESSIONS};
use crate::tunnel::TunnelSupervisor;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no free port at or above {0}")]
    PortsExhausted(u16),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Bind `host:preferred`, walking upward past ports that are already in use.
///
/// Returns the listener and the port it actually holds. Any bind error other
/// than `AddrInUse` is returned immediately.
pub async fn bind_with_fallback(host: &str, preferred: u16) -> Result<(TcpListener, u16), EngineError> {
    let mut port = preferred;
    loop {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                if bound != preferred && preferred != 0 {
                    tracing::info!(preferred, port = bound, "preferred port taken, using fallback");
                }
                return Ok((listener, bound));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "port in use");
                port = port
                    .checked_add(1)
                    .ok_or(EngineError::PortsExhausted(preferred))?;
            }
            Err(e) => {
                return Err(EngineError::Bind {
                    addr: format!("{host}:{port}"),
                    source: e,
                })
            }
        }
    }
}

/// Entry point for starting the protocol engine.
pub struct Engine;

impl Engine {
    /// Bind, then serve the router in a background task.
    pub async fn start(
        config: &ServerSection,
        dispatcher: Dispatcher,
        supervisor: Option<Arc<TunnelSupervisor>>,
    ) -> Result<RunningEngine, EngineError> {
        let (listener, port) = bind_with_fallback(&config.host, config.port).await?;

        let sessions = SessionRegistry::with_limits(config.session_queue, DEFAULT_MAX_SESSIONS);
        let state = AppState {
            handler: McpHandler::new(dispatcher),
            sessions: sessions.clone(),
            port,
            supervisor,
            keep_alive: Duration::from_secs(config.keep_alive_secs.max(1)),
        };
        let app = api::router(state);

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        tracing::info!(host = %config.host, port, "protocol engine listening");
        Ok(RunningEngine {
            port,
            sessions,
            cancel,
            task,
        })
    }
}

/// Handle to a running engine. Call [`stop`](Self::stop) to shut it down.
pub struct RunningEngine {
    port: u16,
    sessions: SessionRegistry,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<io::Result<()>>,
}

impl RunningEngine {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Stop accepting connections, close every push channel, and wait for
    /// in-flight requests to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.sessions.close_all();
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "protocol engine exited with error"),
            Err(e) => tracing::error!(error = %e, "protocol engine task failed"),
        }
        tracing::info!(port = self.port, "protocol engine stopped");
    }
}
