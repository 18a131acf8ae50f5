use std::ffi::OsString;

use thiserror::Error;
use tokio::process::Command;

use crate::config::TunnelConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelConfigError {
    #[error("invalid tunnel host '{spec}': {reason}")]
    InvalidHost { spec: String, reason: String },
}

/// Parsed `user@host[:port]` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
}

impl HostSpec {
    /// Parse `user@host`, `user@host:port` or `user@[v6addr]:port`.
    pub fn parse(spec: &str) -> Result<Self, TunnelConfigError> {
        let invalid = |reason: &str| TunnelConfigError::InvalidHost {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (user, rest) = spec
            .split_once('@')
            .ok_or_else(|| invalid("expected user@host"))?;
        if user.is_empty() {
            return Err(invalid("empty user"));
        }
        if user.chars().any(|c| c.is_whitespace()) {
            return Err(invalid("user contains whitespace"));
        }

        let (host, port_str) = if let Some(inner) = rest.strip_prefix('[') {
            let end = inner
                .find(']')
                .ok_or_else(|| invalid("unterminated IPv6 bracket"))?;
            let after = &inner[end + 1..];
            let port = match after {
                "" => None,
                p => Some(
                    p.strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after IPv6 address"))?,
                ),
            };
            (&inner[..end], port)
        } else {
            match rest.rsplit_once(':') {
                Some((h, _)) if h.contains(':') => {
                    return Err(invalid("IPv6 addresses must be bracketed, e.g. user@[fe80::1]:22"))
                }
                Some((h, p)) => (h, Some(p)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '@') {
            return Err(invalid("host contains invalid characters"));
        }

        let port = match port_str {
            None => None,
            Some(p) => match p.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid(&format!("invalid port '{p}'"))),
                Ok(port) => Some(port),
            },
        };

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Destination argument for ssh (`user@host`, port passed separately).
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Builds the subprocess that carries a tunnel.
///
/// The supervisor configures stdio and process lifetime on the returned
/// command; implementations only choose the program and its arguments.
pub trait TunnelLauncher: Send + Sync {
    fn command(&self, config: &TunnelConfig, spec: &HostSpec) -> Command;
}

/// Launches `ssh -N -R` reverse forwards.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    binary: String,
}

impl SshLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SshLauncher {
    fn default() -> Self {
        Self::new("ssh")
    }
}

/// Arguments for a keep-alive, fail-fast reverse forward.
pub fn ssh_args(config: &TunnelConfig, spec: &HostSpec) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-N".into(),
        "-R".into(),
        format!("{}:localhost:{}", config.remote_port, config.local_port).into(),
        "-o".into(),
        "ServerAliveInterval=30".into(),
        "-o".into(),
        "ServerAliveCountMax=3".into(),
        "-o".into(),
        "ExitOnForwardFailure=yes".into(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
    ];
    if let Some(identity) = &config.identity_file {
        args.push("-i".into());
        args.push(identity.clone().into_os_string());
    }
    if let Some(port) = spec.port {
        args.push("-p".into());
        args.push(port.to_string().into());
    }
    args.push(spec.destination().into());
    args
}

impl TunnelLauncher for SshLauncher {
    fn command(&self, config: &TunnelConfig, spec: &HostSpec) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(ssh_args(config, spec));
        cmd
    }
}
