//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Heartbeat line whose epoch is not a decimal `u64`
    #[error("malformed epoch in {line:?}")]
    Epoch {
        /// The offending line, without delimiter
        line: String,
    },

    /// Inbound line exceeded the configured maximum
    #[error("line too long: {len} bytes (max {max})")]
    LineTooLong {
        /// Bytes buffered without finding a delimiter
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Outbound line contains the line delimiter
    #[error("line contains a newline delimiter")]
    EmbeddedDelimiter,
}

impl WireError {
    /// Whether this error poisons the connection it was raised on.
    ///
    /// Epoch errors are local to a single line; an over-long line leaves
    /// the stream without a usable frame boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WireError::LineTooLong { .. })
    }
}
