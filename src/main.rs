//! beacon - tool protocol engine and reverse-tunnel supervisor
//!
//! ## Modes
//!
//! **Serve** (default, or `beacon serve`): starts the HTTP/SSE protocol
//! engine and every configured tunnel. SIGHUP reloads the tunnel list from
//! the config file; Ctrl+C stops everything.
//!
//! **Status** (`beacon status`): asks a running instance for its health and
//! tunnel states.
//!
//! **Tools** (`beacon tools`): prints the tool catalogue as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use beacon::{
    capability::{Capabilities, LoggingHost},
    config::{self, BeaconConfig, ConfigError, DEFAULT_PORT},
    mcp::{dispatch::Dispatcher, registry::ToolRegistry},
    server::{Engine, EngineError},
    tunnel::{SupervisorSettings, TunnelNotice, TunnelSupervisor},
};
use clap::{Args, Parser as ClapParser, Subcommand};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// beacon - tool protocol engine and reverse-tunnel supervisor
#[derive(ClapParser, Debug)]
#[command(name = "beacon", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the protocol engine and supervise configured tunnels
    Serve(ServeArgs),

    /// Show health and tunnel status of a running instance
    Status {
        /// Port of the running engine
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Host of the running engine
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Print the tool catalogue as JSON
    Tools,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Preferred port (the next free port is used if taken)
    #[arg(long)]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    host: Option<String>,
}

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), BeaconError> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Some(Commands::Serve(args)) => run_serve(args).await,
        Some(Commands::Status { port, host }) => run_status(&host, port).await,
        Some(Commands::Tools) => run_tools(),
        None => run_serve(ServeArgs::default()).await,
    }
}

/// Tracing goes to stderr so `tools` and `status` output stays clean.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "beacon=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Serve ──────────────────────────────────────────────────────────

async fn run_serve(args: ServeArgs) -> Result<(), BeaconError> {
    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let mut config = BeaconConfig::load_or_default(&config_path)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    tracing::info!(
        path = %config_path.display(),
        tunnels = config.tunnels.len(),
        "configuration loaded"
    );

    let supervisor = Arc::new(TunnelSupervisor::with_ssh(
        config.ssh_binary.clone(),
        SupervisorSettings::from(&config.reconnect),
    ));
    let notice_task = tokio::spawn(report_notices(supervisor.subscribe()));

    let dispatcher = Dispatcher::new(
        ToolRegistry::builtin(),
        Capabilities::uniform(Arc::new(LoggingHost)),
    );
    let engine = Engine::start(&config.server, dispatcher, Some(supervisor.clone())).await?;
    let started = supervisor.start_all(&config.enabled_tunnels()).await;
    tracing::info!(port = engine.port(), tunnels = started, "beacon ready");

    let outcome = wait_for_shutdown(&config_path, &supervisor).await;

    supervisor.stop_all().await;
    engine.stop().await;
    notice_task.abort();

    tracing::info!("beacon exiting");
    outcome
}

#[cfg(unix)]
async fn wait_for_shutdown(config_path: &Path, supervisor: &TunnelSupervisor) -> Result<(), BeaconError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("received Ctrl+C");
                return Ok(());
            }
            _ = hangup.recv() => {
                tracing::info!("received SIGHUP, reloading tunnels");
                reload_tunnels(config_path, supervisor).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_config_path: &Path, _supervisor: &TunnelSupervisor) -> Result<(), BeaconError> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C");
    Ok(())
}

/// Re-read the config file and reconcile the running tunnels with it.
/// On any error the current tunnels are left as they are.
async fn reload_tunnels(config_path: &Path, supervisor: &TunnelSupervisor) {
    let config = match BeaconConfig::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "config reload failed, keeping current tunnels");
            return;
        }
    };
    if SupervisorSettings::from(&config.reconnect) != supervisor.settings() {
        tracing::warn!("reconnect settings changed; restart beacon to apply them");
    }
    match supervisor.apply_configs(&config.tunnels).await {
        Ok(()) => tracing::info!(tunnels = supervisor.len(), "tunnels reloaded"),
        Err(e) => tracing::warn!(error = %e, "rejected reloaded tunnel config"),
    }
}

async fn report_notices(mut notices: broadcast::Receiver<TunnelNotice>) {
    loop {
        match notices.recv().await {
            Ok(TunnelNotice::Connected { key }) => {
                tracing::info!(tunnel = %key, "tunnel established");
            }
            Ok(TunnelNotice::Retrying {
                key,
                attempt,
                delay,
                error,
            }) => {
                tracing::warn!(
                    tunnel = %key,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = error.as_deref().unwrap_or("unknown"),
                    "tunnel lost, retrying"
                );
            }
            Ok(TunnelNotice::GaveUp { key, error }) => {
                tracing::error!(tunnel = %key, %error, "tunnel abandoned");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "tunnel notices lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ── Status ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HealthRow {
    status: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct TunnelRow {
    key: String,
    status: String,
    last_error: Option<String>,
    reconnect_attempts: u32,
}

async fn run_status(host: &str, port: u16) -> Result<(), BeaconError> {
    let base = format!("http://{}:{}", host, port);
    let client = reqwest::Client::new();

    let health: HealthRow = client
        .get(format!("{}/health", base))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let tunnels: Vec<TunnelRow> = client
        .get(format!("{}/tunnels", base))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    println!("engine: {} (port {})", health.status, health.port);
    if tunnels.is_empty() {
        println!("tunnels: none");
    }
    for t in tunnels {
        let detail = t.last_error.unwrap_or_default();
        println!(
            "  {:<40} {:<13} attempts={:<2} {}",
            t.key, t.status, t.reconnect_attempts, detail
        );
    }
    Ok(())
}

// ── Tools ──────────────────────────────────────────────────────────

fn run_tools() -> Result<(), BeaconError> {
    let registry = ToolRegistry::builtin();
    println!("{}", serde_json::to_string_pretty(registry.list())?);
    Ok(())
}
