//! Server-side liveness monitor, one per peer session.
//!
//! The monitor keeps the session's epoch watermark and the deadline by
//! which the next valid ping must arrive. Only pings with an epoch above
//! the watermark move the watermark and rearm the deadline.

use linebeat_wire::Line;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of a monitored session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// No valid ping yet (watermark 0); the accept-time deadline is running
    Idle,
    /// At least one valid ping accepted
    Armed,
    /// Terminal
    Closed,
}

/// Outcome of a received ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingVerdict {
    /// Epoch above the watermark: watermark moved, deadline rearmed
    Accepted {
        /// Accepted epoch, now the watermark
        epoch: u64,
    },
    /// Epoch at or below the watermark
    Rejected {
        /// Offending epoch
        epoch: u64,
        /// Unchanged watermark
        watermark: u64,
    },
    /// Monitor already closed; nothing happens
    Closed,
}

impl PingVerdict {
    /// Line to send back to the peer
    pub fn reply(&self) -> Option<Line> {
        match *self {
            PingVerdict::Accepted { epoch } => Some(Line::Pong(epoch)),
            PingVerdict::Rejected { epoch, .. } => Some(Line::InvalidEpoch(epoch)),
            PingVerdict::Closed => None,
        }
    }
}

/// Watermark plus liveness deadline for one peer
#[derive(Debug)]
pub struct LivenessMonitor {
    watermark: u64,
    window: Duration,
    deadline: Instant,
    state: LivenessState,
}

impl LivenessMonitor {
    /// Create a monitor for a session accepted at `now`
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            watermark: 0,
            window,
            deadline: now + window,
            state: LivenessState::Idle,
        }
    }

    /// Validate a ping epoch against the watermark
    pub fn on_ping(&mut self, epoch: u64, now: Instant) -> PingVerdict {
        if self.state == LivenessState::Closed {
            return PingVerdict::Closed;
        }

        if epoch > self.watermark {
            self.watermark = epoch;
            self.deadline = now + self.window;
            self.state = LivenessState::Armed;
            debug!(component = "liveness", "Accepted epoch {}; next ping due within {:?}", epoch, self.window);
            PingVerdict::Accepted { epoch }
        } else {
            warn!(component = "liveness", "Rejected epoch {} (watermark {})", epoch, self.watermark);
            PingVerdict::Rejected {
                epoch,
                watermark: self.watermark,
            }
        }
    }

    /// Deadline for the next valid ping; `None` once closed
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            LivenessState::Closed => None,
            _ => Some(self.deadline),
        }
    }

    /// Whether the window elapsed without a valid ping
    pub fn is_expired(&self, now: Instant) -> bool {
        self.state != LivenessState::Closed && now >= self.deadline
    }

    /// Enter the terminal state. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if self.state == LivenessState::Closed {
            return false;
        }
        self.state = LivenessState::Closed;
        true
    }

    /// Highest accepted epoch
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Current state
    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Configured liveness window
    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    #[test]
    fn test_increasing_epochs_are_all_accepted() {
        let now = Instant::now();
        let mut monitor = LivenessMonitor::new(WINDOW, now);
        assert_eq!(monitor.state(), LivenessState::Idle);

        for epoch in [1, 2, 5, 9, 1000] {
            let verdict = monitor.on_ping(epoch, now);
            assert_eq!(verdict, PingVerdict::Accepted { epoch });
            assert_eq!(verdict.reply(), Some(Line::Pong(epoch)));
        }
        assert_eq!(monitor.watermark(), 1000);
        assert_eq!(monitor.state(), LivenessState::Armed);
    }

    #[test]
    fn test_stale_epoch_rejected_without_rearm() {
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(WINDOW, start);
        monitor.on_ping(1, start);

        let later = start + Duration::from_secs(4);
        let verdict = monitor.on_ping(1, later);
        assert_eq!(
            verdict,
            PingVerdict::Rejected {
                epoch: 1,
                watermark: 1
            }
        );
        assert_eq!(verdict.reply(), Some(Line::InvalidEpoch(1)));
        assert_eq!(monitor.watermark(), 1);
        assert_eq!(monitor.deadline(), Some(start + WINDOW));

        // Epoch 0 never beats the initial watermark
        let mut fresh = LivenessMonitor::new(WINDOW, start);
        assert!(matches!(fresh.on_ping(0, start), PingVerdict::Rejected { .. }));
        assert_eq!(fresh.state(), LivenessState::Idle);
    }

    #[test]
    fn test_valid_ping_rearms_deadline() {
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(WINDOW, start);
        assert_eq!(monitor.deadline(), Some(start + WINDOW));

        let ping_at = start + Duration::from_secs(9);
        monitor.on_ping(1, ping_at);
        assert!(!monitor.is_expired(start + WINDOW));
        assert!(monitor.is_expired(ping_at + WINDOW));
    }

    #[test]
    fn test_close_is_terminal_and_once() {
        let now = Instant::now();
        let mut monitor = LivenessMonitor::new(WINDOW, now);
        monitor.on_ping(3, now);

        assert!(monitor.close());
        assert!(!monitor.close());
        assert_eq!(monitor.deadline(), None);
        assert!(!monitor.is_expired(now + WINDOW * 2));
        assert_eq!(monitor.on_ping(4, now), PingVerdict::Closed);
        assert_eq!(monitor.watermark(), 3);
    }
}
