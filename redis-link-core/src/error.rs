//! Error types for connection operations

use std::io;
use thiserror::Error;

/// Result type used throughout the client
pub type Result<T> = std::result::Result<T, Error>;

/// Error type covering transport failures, server replies and local
/// request outcomes
#[derive(Error, Debug)]
pub enum Error {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Malformed RESP data on the wire
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reply returned by the server
    #[error("Server error: {0}")]
    Server(String),

    /// AUTH rejected during the connection handshake
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No sentinel could resolve the master address
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Transport-level connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The per-request timeout fired before a reply arrived
    #[error("Request timed out")]
    Timeout,

    /// The command was submitted while the connection was down
    #[error("Connection is closed")]
    Closed,

    /// The connection was lost while the request was in flight
    #[error("Disconnected with the request in flight")]
    Disconnected,
}

impl Error {
    /// Whether this error originated as a reply from the server rather than
    /// from the transport. A server reply as a disconnect reason terminates
    /// the connection instead of triggering a reconnect.
    #[must_use]
    pub const fn is_server_reply(&self) -> bool {
        matches!(self, Self::Server(_) | Self::Auth(_))
    }
}
