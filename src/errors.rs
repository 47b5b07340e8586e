//! Process-level error types.
//!
//! Per-session failures are `ProtocolError`s and never leave their session; the variants here
//! are the ones that end a whole front end.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    /// Listener could not bind its address.
    #[error("{transport} listener failed to bind {addr}: {source}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// SSH host key could not be loaded or generated.
    #[error("SSH host key {path}: {message}")]
    HostKey { path: String, message: String },

    /// Listener stopped accepting connections.
    #[error("{transport} server stopped: {source}")]
    Serve {
        transport: &'static str,
        #[source]
        source: std::io::Error,
    },
}
