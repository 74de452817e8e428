//! Connection lifecycle telemetry
//!
//! The controller publishes lifecycle transitions on a broadcast channel.
//! Subscribers receive events best-effort; a lagging subscriber misses
//! events rather than slowing the connection down.

/// Telemetry event published by a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection was re-established after at least one failure
    Reconnected {
        /// Address of the server that accepted the connection
        address: String,
    },
    /// An established connection was lost
    Disconnection {
        /// Address of the peer the connection was lost to
        address: String,
        /// Human-readable reason
        reason: String,
    },
    /// A connection attempt failed before reaching the connected state
    FailedConnection {
        /// Address the attempt was made against
        address: String,
        /// Human-readable reason
        reason: String,
    },
}
