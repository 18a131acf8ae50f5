//! beacon: a JSON-RPC tool protocol engine served over SSE, and a supervisor
//! that keeps reverse tunnels to remote hosts alive.

pub mod api;
pub mod capability;
pub mod config;
pub mod mcp;
pub mod server;
pub mod session;
pub mod tunnel;
