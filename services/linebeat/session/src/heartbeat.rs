//! Client-side heartbeat engine.
//!
//! Each tick allocates the next epoch, produces a `Ping <epoch>` line and
//! arms a timeout for it. Pongs are reconciled against the outstanding
//! epochs; epochs whose timeout elapses are reported as liveness suspects.
//! The engine holds no timers itself: the connection task sleeps until
//! [`HeartbeatEngine::next_deadline`] and then calls
//! [`HeartbeatEngine::expire`], so dropping the task cancels everything.

use linebeat_wire::Line;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// An unacknowledged ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPing {
    /// Epoch carried by the ping
    pub epoch: u64,
    /// When the ping was queued
    pub sent_at: Instant,
    /// When the ping times out
    pub deadline: Instant,
}

/// Result of reconciling a pong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// Pong matched an outstanding ping
    Acknowledged {
        /// Acknowledged epoch
        epoch: u64,
        /// Time between queuing the ping and receiving the pong
        rtt: Duration,
    },
    /// Late, duplicate or unknown epoch
    Unknown {
        /// Epoch carried by the pong
        epoch: u64,
    },
}

/// Epoch allocation and pending-ping bookkeeping
#[derive(Debug)]
pub struct HeartbeatEngine {
    last_epoch: u64,
    pending: BTreeMap<u64, PendingPing>,
    ping_timeout: Duration,
    consecutive_misses: u32,
}

impl HeartbeatEngine {
    /// Create an engine whose pings time out after `ping_timeout`
    pub fn new(ping_timeout: Duration) -> Self {
        Self {
            last_epoch: 0,
            pending: BTreeMap::new(),
            ping_timeout,
            consecutive_misses: 0,
        }
    }

    /// Allocate the next epoch and arm its timeout
    pub fn tick(&mut self, now: Instant) -> Line {
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        self.pending.insert(
            epoch,
            PendingPing {
                epoch,
                sent_at: now,
                deadline: now + self.ping_timeout,
            },
        );
        debug!(component = "heartbeat", "Queued ping for epoch {} ({} outstanding)", epoch, self.pending.len());
        Line::Ping(epoch)
    }

    /// Reconcile a pong against the outstanding pings
    pub fn on_pong(&mut self, epoch: u64, now: Instant) -> PongOutcome {
        match self.pending.remove(&epoch) {
            Some(ping) => {
                self.consecutive_misses = 0;
                let rtt = now.saturating_duration_since(ping.sent_at);
                debug!(component = "heartbeat", "Pong for epoch {} (rtt {:?})", epoch, rtt);
                PongOutcome::Acknowledged { epoch, rtt }
            }
            None => {
                debug!(component = "heartbeat", "Ignoring pong for unknown epoch {}", epoch);
                PongOutcome::Unknown { epoch }
            }
        }
    }

    /// Remove every ping whose deadline has passed, returning their epochs
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let expired: Vec<u64> = self
            .pending
            .values()
            .filter(|ping| ping.deadline <= now)
            .map(|ping| ping.epoch)
            .collect();

        for epoch in &expired {
            self.pending.remove(epoch);
            self.consecutive_misses = self.consecutive_misses.saturating_add(1);
            warn!(
                component = "heartbeat",
                "No pong for epoch {} within {:?}; peer liveness suspect",
                epoch, self.ping_timeout
            );
        }

        expired
    }

    /// Earliest pending deadline, if any ping is outstanding
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|ping| ping.deadline).min()
    }

    /// Forget pings sent on a connection that is gone.
    ///
    /// The epoch counter is kept, so numbering continues on the next
    /// connection. Returns the number of pings discarded.
    pub fn reset_connection(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.consecutive_misses = 0;
        dropped
    }

    /// Last allocated epoch (0 before the first tick)
    pub fn last_epoch(&self) -> u64 {
        self.last_epoch
    }

    /// Number of outstanding pings
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `epoch` is still awaiting its pong
    pub fn is_pending(&self, epoch: u64) -> bool {
        self.pending.contains_key(&epoch)
    }

    /// Ping timeouts since the last acknowledged pong
    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    /// Configured per-ping timeout
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }
}
