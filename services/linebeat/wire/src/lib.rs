//! Newline-delimited line grammar and framing for linebeat.
//!
//! This crate provides the low-level wire protocol for linebeat: a fixed,
//! newline-delimited ASCII exchange with three heartbeat shapes and opaque
//! application text.
//!
//! ## Wire Format
//!
//! ```text
//! Ping <epoch:u64>\n            client heartbeat
//! Pong <epoch:u64>\n            server acknowledgment
//! Invalid epoch <epoch:u64>\n   server rejection (epoch <= watermark)
//! <text>\n                      application message
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod line;

// Re-export main types
pub use codec::{encode_line, LineDecoder, DEFAULT_MAX_LINE_LEN, DELIMITER};
pub use error::WireError;
pub use line::{Line, INVALID_EPOCH_PREFIX, PING_PREFIX, PONG_PREFIX};
