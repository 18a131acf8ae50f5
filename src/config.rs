use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tunnel::{BackoffPolicy, HostSpec};

/// Preferred engine port, also the default remote and local tunnel port.
pub const DEFAULT_PORT: u16 = 9847;

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    /// Path or name of the ssh client used for tunnels.
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            reconnect: ReconnectSection::default(),
            ssh_binary: default_ssh_binary(),
            tunnels: Vec::new(),
        }
    }
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

/// Protocol engine section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Interface to bind. Loopback unless tunnels terminate elsewhere.
    pub host: String,
    /// Preferred port; the engine walks upward if it is taken.
    pub port: u16,
    /// Interval between SSE keep-alive comments.
    pub keep_alive_secs: u64,
    /// Per-session broadcast queue length.
    pub session_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            keep_alive_secs: 30,
            session_queue: crate::session::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Tunnel reconnect schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub base_delay_ms: u64,
    pub growth_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    /// How long a freshly spawned tunnel must stay alive to count as connected.
    pub confirm_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: 3000,
            growth_factor: 1.5,
            max_delay_ms: 60_000,
            max_attempts: 10,
            confirm_delay_ms: 3000,
        }
    }
}

impl ReconnectSection {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            growth_factor: self.growth_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }
}

/// A single reverse tunnel entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// `user@host` or `user@host:port`.
    pub host: String,
    /// Port bound on the remote side.
    #[serde(default = "default_port", alias = "remotePort")]
    pub remote_port: u16,
    /// Local port the remote side reaches through the tunnel.
    #[serde(default = "default_port", alias = "localPort")]
    pub local_port: u16,
    #[serde(default, alias = "identityFile")]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TunnelConfig {
    /// Tunnel with default ports for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            remote_port: DEFAULT_PORT,
            local_port: DEFAULT_PORT,
            identity_file: None,
            enabled: true,
        }
    }

    /// Supervisor map key: `host-spec:remotePort`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.remote_port)
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {}", .0.display(), .1)]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config {}: {}", .0.display(), .1)]
    ParseFailed(PathBuf, #[source] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl BeaconConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconnect;
        if r.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.base_delay_ms must be positive".into()));
        }
        if !(r.growth_factor > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "reconnect.growth_factor must be greater than 1 (got {})",
                r.growth_factor
            )));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must not be smaller than base_delay_ms".into(),
            ));
        }
        for tunnel in &self.tunnels {
            HostSpec::parse(&tunnel.host).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Enabled tunnels only.
    pub fn enabled_tunnels(&self) -> Vec<TunnelConfig> {
        self.tunnels.iter().filter(|t| t.enabled).cloned().collect()
    }
}

/// `$XDG_CONFIG_HOME/beacon/config.toml` (or the platform equivalent).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("beacon")
        .join("config.toml")
}
