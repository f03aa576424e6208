//! Error and disconnect types shared by the client and server paths.

use linebeat_wire::WireError;
use std::fmt;
use thiserror::Error;

/// Failure reported by a line transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Peer closed its write side
    #[error("connection closed by peer")]
    Eof,

    /// Operation on a transport that was already closed locally
    #[error("connection already closed")]
    Closed,

    /// Socket error (reset, broken pipe, ...)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error
    #[error("line codec error: {0}")]
    Wire(#[from] WireError),
}

/// Errors returned by [`crate::ClientHandle`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The client task has exited
    #[error("client has stopped")]
    Stopped,
}

/// Why a connection was torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Read or write failed, or the peer hung up
    Transport(String),
    /// No valid ping inside the liveness window (server)
    LivenessTimeout,
    /// Too many consecutive unanswered pings (client, escalating policy)
    MissedPongs {
        /// Consecutive ping timeouts observed
        count: u32,
    },
    /// Local shutdown or explicit close
    Shutdown,
}

impl DisconnectReason {
    /// Build a transport reason from a transport error
    pub fn transport(err: &TransportError) -> Self {
        DisconnectReason::Transport(err.to_string())
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Transport(detail) => write!(f, "transport failure: {}", detail),
            DisconnectReason::LivenessTimeout => f.write_str("liveness timeout"),
            DisconnectReason::MissedPongs { count } => {
                write!(f, "{} consecutive pings unanswered", count)
            }
            DisconnectReason::Shutdown => f.write_str("shutdown"),
        }
    }
}
