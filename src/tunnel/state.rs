//! Per-tunnel state machine.
//!
//! Every subprocess lifecycle event for a tunnel goes through [`transition`],
//! which mutates the [`TunnelState`] and tells the driver what to do next.
//! The function is pure so the whole state machine is testable without
//! spawning processes or waiting on timers.

use std::time::Duration;

use serde::Serialize;

use super::backoff::BackoffPolicy;
use super::classify::{classify, TunnelFailure};
use crate::config::TunnelConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

#[derive(Debug, Clone)]
pub struct TunnelState {
    pub config: TunnelConfig,
    pub status: TunnelStatus,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    /// Id of the live subprocess, if any.
    pub pid: Option<u32>,
    /// Failure classified from the current process's diagnostics.
    run_failure: Option<TunnelFailure>,
}

impl TunnelState {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            status: TunnelStatus::Connecting,
            last_error: None,
            reconnect_attempts: 0,
            pid: None,
            run_failure: None,
        }
    }

    pub fn key(&self) -> String {
        self.config.key()
    }

    pub fn report(&self) -> TunnelReport {
        TunnelReport {
            key: self.key(),
            status: self.status,
            last_error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

/// Externally visible snapshot of one tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelReport {
    pub key: String,
    pub status: TunnelStatus,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    /// A (re)connect attempt is starting.
    Launching,
    Spawned { pid: Option<u32> },
    SpawnFailed { error: String },
    /// The confirmation delay elapsed.
    ConfirmElapsed { alive: bool },
    /// One line of diagnostic output from the subprocess.
    Diagnostic { line: String },
    Exited { status: String },
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// The tunnel was just confirmed up.
    Connected,
    /// Wait `delay`, then launch again.
    Reconnect { attempt: u32, delay: Duration },
    /// Terminal: no further attempts.
    GiveUp { error: String },
}

pub fn transition(state: &mut TunnelState, event: TunnelEvent, policy: &BackoffPolicy) -> Action {
    match event {
        TunnelEvent::Launching => {
            state.status = TunnelStatus::Connecting;
            state.pid = None;
            state.run_failure = None;
            Action::Continue
        }
        TunnelEvent::Spawned { pid } => {
            state.pid = pid;
            Action::Continue
        }
        TunnelEvent::ConfirmElapsed { alive } => {
            if alive && state.status == TunnelStatus::Connecting {
                state.status = TunnelStatus::Connected;
                state.reconnect_attempts = 0;
                state.last_error = None;
                Action::Connected
            } else {
                Action::Continue
            }
        }
        TunnelEvent::Diagnostic { line } => {
            if let Some(failure) = classify(&line, &state.config.host, state.config.remote_port) {
                state.last_error = Some(failure.to_string());
                state.run_failure = Some(failure);
            }
            Action::Continue
        }
        TunnelEvent::SpawnFailed { error } => {
            state.pid = None;
            state.status = TunnelStatus::Error;
            state.last_error = Some(TunnelFailure::Spawn(error).to_string());
            retry_or_give_up(state, policy)
        }
        TunnelEvent::Exited { status } => {
            state.pid = None;
            state.status = if state.status == TunnelStatus::Connected {
                TunnelStatus::Disconnected
            } else {
                TunnelStatus::Error
            };
            let failure = state
                .run_failure
                .take()
                .unwrap_or(TunnelFailure::Exited(status));
            state.last_error = Some(failure.to_string());
            retry_or_give_up(state, policy)
        }
    }
}

fn retry_or_give_up(state: &mut TunnelState, policy: &BackoffPolicy) -> Action {
    if policy.allows(state.reconnect_attempts) {
        state.reconnect_attempts += 1;
        Action::Reconnect {
            attempt: state.reconnect_attempts,
            delay: policy.delay_for(state.reconnect_attempts),
        }
    } else {
        let error = TunnelFailure::ReconnectExhausted {
            attempts: state.reconnect_attempts,
            last: state.last_error.clone().unwrap_or_default(),
        }
        .to_string();
        state.status = TunnelStatus::Error;
        state.last_error = Some(error.clone());
        Action::GiveUp { error }
    }
}
