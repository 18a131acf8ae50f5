use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, ChildStderr};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::launcher::{HostSpec, TunnelLauncher};
use super::manager::{SupervisorSettings, TunnelNotice};
use super::state::{transition, Action, TunnelEvent, TunnelReport, TunnelState};
use crate::config::TunnelConfig;

/// How long to keep reading diagnostics after the process has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

type Diagnostics = Split<BufReader<ChildStderr>>;

/// A supervised tunnel: one task that launches the subprocess, watches it,
/// and relaunches it with backoff until cancelled or out of attempts.
pub struct TunnelConnection {
    state: Arc<Mutex<TunnelState>>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl TunnelConnection {
    pub fn spawn(
        config: TunnelConfig,
        spec: HostSpec,
        launcher: Arc<dyn TunnelLauncher>,
        settings: SupervisorSettings,
        notices: broadcast::Sender<TunnelNotice>,
    ) -> Self {
        let state = Arc::new(Mutex::new(TunnelState::new(config)));
        let cancel = CancellationToken::new();
        let driver = Driver {
            key: state.lock().key(),
            spec,
            state: state.clone(),
            launcher,
            settings,
            notices,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());
        Self {
            state,
            cancel,
            task,
        }
    }

    pub fn report(&self) -> TunnelReport {
        self.state.lock().report()
    }

    pub fn config(&self) -> TunnelConfig {
        self.state.lock().config.clone()
    }

    /// Cancel any pending reconnect and terminate the subprocess.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to finish. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

struct Driver {
    key: String,
    spec: HostSpec,
    state: Arc<Mutex<TunnelState>>,
    launcher: Arc<dyn TunnelLauncher>,
    settings: SupervisorSettings,
    notices: broadcast::Sender<TunnelNotice>,
    cancel: CancellationToken,
}

impl Driver {
    fn apply(&self, event: TunnelEvent) -> Action {
        let mut state = self.state.lock();
        transition(&mut state, event, &self.settings.policy)
    }

    fn notify(&self, notice: TunnelNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            self.apply(TunnelEvent::Launching);
            tracing::debug!(tunnel = %self.key, "launching tunnel");

            let Some(action) = self.run_once().await else {
                tracing::debug!(tunnel = %self.key, "tunnel stopped");
                return;
            };

            match action {
                Action::Reconnect { attempt, delay } => {
                    let error = self.state.lock().last_error.clone();
                    tracing::warn!(
                        tunnel = %self.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = error.as_deref().unwrap_or(""),
                        "tunnel down, scheduling reconnect"
                    );
                    self.notify(TunnelNotice::Retrying {
                        key: self.key.clone(),
                        attempt,
                        delay,
                        error,
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return,
                    }
                }
                Action::GiveUp { error } => {
                    tracing::error!(tunnel = %self.key, %error, "tunnel giving up");
                    self.notify(TunnelNotice::GaveUp {
                        key: self.key.clone(),
                        error,
                    });
                    return;
                }
                Action::Continue | Action::Connected => {
                    // run_once only returns after the process is gone.
                    return;
                }
            }
        }
    }

    /// Run one subprocess to completion. Returns `None` when cancelled.
    async fn run_once(&self) -> Option<Action> {
        let config = self.state.lock().config.clone();
        let mut command = self.launcher.command(&config, &self.spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(tunnel = %self.key, error = %e, "failed to spawn tunnel process");
                return Some(self.apply(TunnelEvent::SpawnFailed {
                    error: e.to_string(),
                }));
            }
        };
        self.apply(TunnelEvent::Spawned { pid: child.id() });

        // The pipe stays open until the process is gone, even once reading
        // stops: closing it early would kill ssh with SIGPIPE.
        let mut diagnostics = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
        let mut reading = diagnostics.is_some();
        let confirm = tokio::time::sleep(self.settings.confirm_delay);
        tokio::pin!(confirm);
        let mut confirmed = false;

        let exit = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    terminate(&self.key, &mut child).await;
                    return None;
                }
                _ = &mut confirm, if !confirmed => {
                    confirmed = true;
                    let alive = matches!(child.try_wait(), Ok(None));
                    if self.apply(TunnelEvent::ConfirmElapsed { alive }) == Action::Connected {
                        tracing::info!(tunnel = %self.key, "tunnel connected");
                        self.notify(TunnelNotice::Connected { key: self.key.clone() });
                    }
                }
                line = next_line(&mut diagnostics), if reading => match line {
                    Ok(Some(line)) => self.diagnostic(line),
                    Ok(None) => reading = false,
                    Err(e) => {
                        tracing::debug!(tunnel = %self.key, error = %e, "stopped reading tunnel diagnostics");
                        reading = false;
                    }
                },
                status = child.wait() => break status,
            }
        };

        // Lines written just before exit may still be buffered in the pipe.
        if reading {
            while let Ok(Ok(Some(line))) = tokio::time::timeout(DRAIN_TIMEOUT, next_line(&mut diagnostics)).await {
                self.diagnostic(line);
            }
        }

        let status = match exit {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        };
        Some(self.apply(TunnelEvent::Exited { status }))
    }

    fn diagnostic(&self, line: String) {
        let line = line.trim_end().to_string();
        if line.is_empty() {
            return;
        }
        let before = self.state.lock().last_error.clone();
        self.apply(TunnelEvent::Diagnostic { line: line.clone() });
        let after = self.state.lock().last_error.clone();
        if after != before {
            tracing::warn!(tunnel = %self.key, error = after.as_deref().unwrap_or(""), %line, "tunnel failure reported");
        } else {
            tracing::debug!(tunnel = %self.key, %line, "tunnel diagnostic");
        }
    }
}

/// Next stderr line, decoded lossily so a stray non-UTF-8 banner is just
/// another unmatched line.
async fn next_line(lines: &mut Option<Diagnostics>) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => Ok(lines
            .next_segment()
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())),
        None => std::future::pending().await,
    }
}

async fn terminate(key: &str, child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if let Err(e) = child.kill().await {
        tracing::warn!(tunnel = %key, error = %e, "failed to terminate tunnel process");
    }
}
