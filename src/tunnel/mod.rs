//! Supervised reverse tunnels.
//!
//! A [`TunnelSupervisor`] keeps one task per configured tunnel. Each task
//! launches a reverse-forwarding subprocess (ssh by default), confirms it
//! stays up, classifies its diagnostics, and reconnects with exponential
//! backoff until the attempt cap is reached.

pub mod backoff;
pub mod classify;
pub mod connection;
pub mod launcher;
pub mod manager;
pub mod state;

pub use backoff::BackoffPolicy;
pub use classify::{classify, TunnelFailure};
pub use launcher::{ssh_args, HostSpec, SshLauncher, TunnelConfigError, TunnelLauncher};
pub use manager::{SupervisorSettings, TunnelNotice, TunnelSupervisor};
pub use state::{transition, Action, TunnelEvent, TunnelReport, TunnelState, TunnelStatus};
