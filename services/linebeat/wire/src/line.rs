//! Line grammar for the heartbeat protocol.
//!
//! Every message is one ASCII line. Three shapes carry heartbeat meaning:
//!
//! ```text
//! Ping <epoch>            client -> server
//! Pong <epoch>            server -> client
//! Invalid epoch <epoch>   server -> client
//! ```
//!
//! Anything else is application text and opaque to the protocol.

use crate::error::WireError;
use std::fmt;

/// Prefix of a client heartbeat
pub const PING_PREFIX: &str = "Ping ";
/// Prefix of a server acknowledgment
pub const PONG_PREFIX: &str = "Pong ";
/// Prefix of a server rejection
pub const INVALID_EPOCH_PREFIX: &str = "Invalid epoch ";

/// A classified protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// `Ping <epoch>`
    Ping(u64),
    /// `Pong <epoch>`
    Pong(u64),
    /// `Invalid epoch <epoch>`
    InvalidEpoch(u64),
    /// Application payload
    Text(String),
}

impl Line {
    /// Classify a raw line (delimiter already removed).
    ///
    /// A heartbeat prefix followed by anything but decimal digits is an
    /// error rather than application text.
    pub fn parse(raw: &str) -> Result<Self, WireError> {
        if let Some(digits) = raw.strip_prefix(PING_PREFIX) {
            return parse_epoch(raw, digits).map(Line::Ping);
        }
        if let Some(digits) = raw.strip_prefix(PONG_PREFIX) {
            return parse_epoch(raw, digits).map(Line::Pong);
        }
        if let Some(digits) = raw.strip_prefix(INVALID_EPOCH_PREFIX) {
            return parse_epoch(raw, digits).map(Line::InvalidEpoch);
        }
        Ok(Line::Text(raw.to_string()))
    }

    /// Epoch carried by a heartbeat line
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Line::Ping(epoch) | Line::Pong(epoch) | Line::InvalidEpoch(epoch) => Some(*epoch),
            Line::Text(_) => None,
        }
    }

    /// Whether this line belongs to the heartbeat grammar
    pub fn is_heartbeat(&self) -> bool {
        !matches!(self, Line::Text(_))
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Ping(epoch) => write!(f, "{}{}", PING_PREFIX, epoch),
            Line::Pong(epoch) => write!(f, "{}{}", PONG_PREFIX, epoch),
            Line::InvalidEpoch(epoch) => write!(f, "{}{}", INVALID_EPOCH_PREFIX, epoch),
            Line::Text(text) => f.write_str(text),
        }
    }
}

fn parse_epoch(line: &str, digits: &str) -> Result<u64, WireError> {
    // `u64::from_str` accepts a leading '+', the grammar does not
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireError::Epoch {
            line: line.to_string(),
        });
    }
    digits.parse::<u64>().map_err(|_| WireError::Epoch {
        line: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heartbeat_lines() {
        assert_eq!(Line::parse("Ping 1").unwrap(), Line::Ping(1));
        assert_eq!(Line::parse("Pong 42").unwrap(), Line::Pong(42));
        assert_eq!(
            Line::parse("Invalid epoch 7").unwrap(),
            Line::InvalidEpoch(7)
        );
        assert_eq!(
            Line::parse(&format!("Ping {}", u64::MAX)).unwrap(),
            Line::Ping(u64::MAX)
        );
    }

    #[test]
    fn test_parse_application_text() {
        assert_eq!(
            Line::parse("hello there").unwrap(),
            Line::Text("hello there".to_string())
        );
        // No space after the keyword: not heartbeat grammar
        assert_eq!(Line::parse("Ping").unwrap(), Line::Text("Ping".to_string()));
        assert_eq!(
            Line::parse("Pinging 5").unwrap(),
            Line::Text("Pinging 5".to_string())
        );
        assert_eq!(Line::parse("").unwrap(), Line::Text(String::new()));
    }

    #[test]
    fn test_malformed_epochs() {
        for raw in ["Ping ", "Ping abc", "Ping +5", "Ping 5 ", "Pong -1", "Ping 1x"] {
            let err = Line::parse(raw).unwrap_err();
            assert!(matches!(err, WireError::Epoch { .. }), "{raw:?}");
            assert!(!err.is_fatal());
        }
        // Overflows u64
        assert!(Line::parse("Ping 18446744073709551616").is_err());
    }

    #[test]
    fn test_display_matches_wire_text() {
        assert_eq!(Line::Ping(3).to_string(), "Ping 3");
        assert_eq!(Line::Pong(3).to_string(), "Pong 3");
        assert_eq!(Line::InvalidEpoch(1).to_string(), "Invalid epoch 1");
        assert_eq!(Line::Text("hi".into()).to_string(), "hi");
    }

    #[test]
    fn test_epoch_accessor() {
        assert_eq!(Line::Pong(9).epoch(), Some(9));
        assert!(Line::Pong(9).is_heartbeat());
        assert_eq!(Line::Text("x".into()).epoch(), None);
        assert!(!Line::Text("x".into()).is_heartbeat());
    }
}
