use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::backoff::BackoffPolicy;
use super::connection::TunnelConnection;
use super::launcher::{HostSpec, SshLauncher, TunnelConfigError, TunnelLauncher};
use super::state::TunnelReport;
use crate::config::{ReconnectSection, TunnelConfig};

const NOTICE_CAPACITY: usize = 64;

/// Timing knobs shared by every tunnel a supervisor runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorSettings {
    pub policy: BackoffPolicy,
    /// How long a new subprocess must survive to count as connected.
    pub confirm_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::default(),
            confirm_delay: Duration::from_millis(3000),
        }
    }
}

impl From<&ReconnectSection> for SupervisorSettings {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            policy: section.policy(),
            confirm_delay: section.confirm_delay(),
        }
    }
}

/// Operator-facing tunnel lifecycle notice.
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelNotice {
    Connected {
        key: String,
    },
    Retrying {
        key: String,
        attempt: u32,
        delay: Duration,
        error: Option<String>,
    },
    GaveUp {
        key: String,
        error: String,
    },
}

impl TunnelNotice {
    pub fn key(&self) -> &str {
        match self {
            TunnelNotice::Connected { key }
            | TunnelNotice::Retrying { key, .. }
            | TunnelNotice::GaveUp { key, .. } => key,
        }
    }
}

/// Owns every supervised tunnel, keyed by `host-spec:remotePort`.
///
/// Each tunnel runs in its own task with independent backoff state, so one
/// tunnel's failures never delay another. Dropping the supervisor without
/// calling [`stop_all`](Self::stop_all) leaves the tasks running until the
/// runtime shuts down.
pub struct TunnelSupervisor {
    tunnels: Mutex<HashMap<String, TunnelConnection>>,
    launcher: Arc<dyn TunnelLauncher>,
    settings: SupervisorSettings,
    notices: broadcast::Sender<TunnelNotice>,
}

impl TunnelSupervisor {
    pub fn new(launcher: Arc<dyn TunnelLauncher>, settings: SupervisorSettings) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            tunnels: Mutex::new(HashMap::new()),
            launcher,
            settings,
            notices,
        }
    }

    /// Supervisor that launches tunnels with the ssh client at `binary`.
    pub fn with_ssh(binary: impl Into<String>, settings: SupervisorSettings) -> Self {
        Self::new(Arc::new(SshLauncher::new(binary)), settings)
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    /// Receive lifecycle notices for every tunnel started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelNotice> {
        self.notices.subscribe()
    }

    /// Start (or restart) the tunnel for `config`.
    ///
    /// Any tunnel already running under the same key is torn down first.
    /// Only a malformed host spec is an error; runtime failures are recorded
    /// in the tunnel's status and retried.
    pub async fn start_tunnel(&self, config: TunnelConfig) -> Result<String, TunnelConfigError> {
        let spec = HostSpec::parse(&config.host)?;
        let key = config.key();

        self.stop_tunnel(&key).await;

        tracing::info!(
            tunnel = %key,
            remote_port = config.remote_port,
            local_port = config.local_port,
            "starting tunnel"
        );
        let connection = TunnelConnection::spawn(
            config,
            spec,
            self.launcher.clone(),
            self.settings,
            self.notices.clone(),
        );
        let displaced = self.tunnels.lock().insert(key.clone(), connection);
        if let Some(old) = displaced {
            // A concurrent start for the same key won the race; keep ours.
            old.shutdown();
            old.join().await;
        }
        Ok(key)
    }

    /// Stop the tunnel under `key`: cancel any pending reconnect, terminate
    /// the subprocess, and forget the key. Returns false for unknown keys.
    pub async fn stop_tunnel(&self, key: &str) -> bool {
        let Some(connection) = self.tunnels.lock().remove(key) else {
            return false;
        };
        connection.shutdown();
        connection.join().await;
        tracing::info!(tunnel = %key, "tunnel stopped");
        true
    }

    pub async fn stop_all(&self) {
        let connections: Vec<_> = self.tunnels.lock().drain().collect();
        for (_, connection) in &connections {
            connection.shutdown();
        }
        for (key, connection) in connections {
            connection.join().await;
            tracing::debug!(tunnel = %key, "tunnel stopped");
        }
    }

    /// Status of every tracked tunnel, ordered by key.
    pub fn get_status(&self) -> Vec<TunnelReport> {
        let mut reports: Vec<_> = self.tunnels.lock().values().map(|c| c.report()).collect();
        reports.sort_by(|a, b| a.key.cmp(&b.key));
        reports
    }

    pub fn status_of(&self, key: &str) -> Option<TunnelReport> {
        self.tunnels.lock().get(key).map(|c| c.report())
    }

    pub fn len(&self) -> usize {
        self.tunnels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start every enabled tunnel. Malformed entries are logged and skipped.
    pub async fn start_all(&self, configs: &[TunnelConfig]) -> usize {
        let mut started = 0;
        for config in configs {
            if !config.enabled {
                tracing::debug!(tunnel = %config.key(), "tunnel disabled, skipping");
                continue;
            }
            match self.start_tunnel(config.clone()).await {
                Ok(_) => started += 1,
                Err(e) => tracing::warn!(error = %e, "skipping tunnel"),
            }
        }
        started
    }

    /// Reconcile the running set against `configs`.
    ///
    /// Removed or disabled keys are stopped, new keys started, changed
    /// configs restarted, and unchanged tunnels left alone. The whole set is
    /// validated before anything changes.
    pub async fn apply_configs(&self, configs: &[TunnelConfig]) -> Result<(), TunnelConfigError> {
        let mut desired: HashMap<String, TunnelConfig> = HashMap::new();
        for config in configs.iter().filter(|c| c.enabled) {
            HostSpec::parse(&config.host)?;
            desired.insert(config.key(), config.clone());
        }

        let running: HashMap<String, TunnelConfig> = self
            .tunnels
            .lock()
            .iter()
            .map(|(key, c)| (key.clone(), c.config()))
            .collect();

        for key in running.keys() {
            if !desired.contains_key(key) {
                self.stop_tunnel(key).await;
            }
        }

        for (key, config) in desired {
            match running.get(&key) {
                Some(current) if *current == config => {
                    tracing::debug!(tunnel = %key, "tunnel unchanged");
                }
                _ => {
                    self.start_tunnel(config).await?;
                }
            }
        }
        Ok(())
    }
}
