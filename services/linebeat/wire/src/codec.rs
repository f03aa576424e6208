//! Newline framing over byte buffers.
//!
//! The decoder pulls complete lines out of a `BytesMut` that the caller
//! keeps filling from the socket, so a partially received line survives
//! across reads.

use crate::error::WireError;
use bytes::{BufMut, BytesMut};

/// Line delimiter
pub const DELIMITER: u8 = b'\n';

/// Default maximum inbound line length (64 KiB)
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// Incremental line decoder
#[derive(Debug, Clone)]
pub struct LineDecoder {
    max_line_len: usize,
    /// Bytes already searched for a delimiter
    scanned: usize,
}

impl LineDecoder {
    /// Create a decoder with the default line limit
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Create a decoder with a custom line limit
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            max_line_len,
            scanned: 0,
        }
    }

    /// Configured line limit
    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    /// Decode one line from a buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete line yet. The
    /// delimiter and an optional trailing `\r` are stripped. Invalid UTF-8
    /// is replaced rather than rejected.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, WireError> {
        let start = self.scanned.min(buf.len());
        let found = buf[start..]
            .iter()
            .position(|&b| b == DELIMITER)
            .map(|offset| start + offset);

        let Some(idx) = found else {
            if buf.len() > self.max_line_len {
                return Err(WireError::LineTooLong {
                    len: buf.len(),
                    max: self.max_line_len,
                });
            }
            self.scanned = buf.len();
            return Ok(None);
        };

        self.scanned = 0;
        if idx > self.max_line_len {
            return Err(WireError::LineTooLong {
                len: idx,
                max: self.max_line_len,
            });
        }

        let frame = buf.split_to(idx + 1);
        let mut line = &frame[..idx];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }

        Ok(Some(String::from_utf8_lossy(line).into_owned()))
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `line` plus the delimiter to `dst`
pub fn encode_line(line: &str, dst: &mut BytesMut) -> Result<(), WireError> {
    if line.as_bytes().contains(&DELIMITER) {
        return Err(WireError::EmbeddedDelimiter);
    }
    dst.reserve(line.len() + 1);
    dst.put_slice(line.as_bytes());
    dst.put_u8(DELIMITER);
    Ok(())
}
