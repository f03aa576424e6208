//! Per-connection counters, logged when a connection ends.

use std::time::Duration;
use tokio::time::Instant;

/// Statistics for one connection
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Lines read from the peer
    pub lines_in: u64,
    /// Lines written to the peer
    pub lines_out: u64,
    /// Pings queued (client)
    pub pings_sent: u64,
    /// Pings accepted (server)
    pub pings_accepted: u64,
    /// Pings rejected as stale (server)
    pub pings_rejected: u64,
    /// Pongs that matched a pending ping (client)
    pub pongs_received: u64,
    /// Pings that timed out (client)
    pub ping_timeouts: u64,
    /// Lines dropped because they did not parse
    pub malformed_lines: u64,
    /// Time of the last inbound line
    pub last_line_in: Option<Instant>,
    /// Most recent heartbeat round trip (client)
    pub last_rtt: Option<Duration>,
}

impl SessionStats {
    /// Count an inbound line
    pub fn record_line_in(&mut self, now: Instant) {
        self.lines_in += 1;
        self.last_line_in = Some(now);
    }
}
