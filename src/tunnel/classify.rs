use thiserror::Error;

/// Known tunnel failure modes recognised in ssh diagnostic output, plus the
/// failures the supervisor itself observes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelFailure {
    #[error("Remote port {port} is already in use on {host}")]
    PortInUse { host: String, port: u16 },

    #[error("Authentication failed for {host}")]
    AuthRejected { host: String },

    #[error("Connection refused by {host}")]
    ConnectionRefused { host: String },

    #[error("Could not resolve host {host}")]
    HostUnresolved { host: String },

    #[error("Failed to start tunnel process: {0}")]
    Spawn(String),

    #[error("Tunnel process exited ({0})")]
    Exited(String),

    #[error("Reconnect attempts exhausted after {attempts} tries: {last}")]
    ReconnectExhausted { attempts: u32, last: String },
}

const PORT_IN_USE: &[&str] = &["remote port forwarding failed", "address already in use"];
const AUTH_REJECTED: &[&str] = &[
    "permission denied",
    "authentication failed",
    "host key verification failed",
];
const CONNECTION_REFUSED: &[&str] = &["connection refused"];
const HOST_UNRESOLVED: &[&str] = &["could not resolve hostname", "name or service not known"];

/// Match a diagnostic line against the known failure phrases.
/// Returns `None` for lines that carry no recognised failure.
pub fn classify(line: &str, host: &str, remote_port: u16) -> Option<TunnelFailure> {
    let lower = line.to_ascii_lowercase();
    let matches = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

    if matches(PORT_IN_USE) {
        Some(TunnelFailure::PortInUse {
            host: host.to_string(),
            port: remote_port,
        })
    } else if matches(AUTH_REJECTED) {
        Some(TunnelFailure::AuthRejected {
            host: host.to_string(),
        })
    } else if matches(CONNECTION_REFUSED) {
        Some(TunnelFailure::ConnectionRefused {
            host: host.to_string(),
        })
    } else if matches(HOST_UNRESOLVED) {
        Some(TunnelFailure::HostUnresolved {
            host: host.to_string(),
        })
    } else {
        None
    }
}
