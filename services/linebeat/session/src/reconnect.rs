//! Reconnect state for the client.
//!
//! The controller only tracks state; the client task performs the actual
//! connect, sleep and teardown. Backoff is a fixed delay with unbounded
//! retries. Every successful connect bumps a generation number, which
//! identifies the connection that owns any in-flight state.

use crate::error::DisconnectReason;
use std::time::Duration;
use tracing::{info, warn};

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Connection established
    Connected,
    /// Stopped by request; terminal
    Stopped,
}

/// Fixed-delay reconnect bookkeeping
#[derive(Debug)]
pub struct ReconnectController {
    target: String,
    delay: Duration,
    state: ConnectionState,
    generation: u64,
    attempts: u64,
    consecutive_failures: u32,
}

impl ReconnectController {
    /// Create a controller for `target`, starting disconnected
    pub fn new(target: impl Into<String>, delay: Duration) -> Self {
        Self {
            target: target.into(),
            delay,
            state: ConnectionState::Disconnected,
            generation: 0,
            attempts: 0,
            consecutive_failures: 0,
        }
    }

    /// Disconnected -> Connecting. Returns the attempt number (1-based).
    pub fn begin_attempt(&mut self) -> u64 {
        if self.state != ConnectionState::Disconnected {
            warn!(component = "reconnect", "Connect attempt started from {:?}", self.state);
        }
        self.state = ConnectionState::Connecting;
        self.attempts += 1;
        self.attempts
    }

    /// Connecting -> Connected. Returns the new connection generation.
    pub fn on_connected(&mut self) -> u64 {
        self.state = ConnectionState::Connected;
        self.generation += 1;
        if self.consecutive_failures > 0 {
            info!(
                component = "reconnect",
                "Connected to {} after {} failed attempts", self.target, self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.generation
    }

    /// Connecting -> Disconnected. Returns the delay before the next attempt.
    pub fn on_connect_failed(&mut self, error: &std::io::Error) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            component = "reconnect",
            "Failed to connect to {}: {}; retrying in {:?}", self.target, error, self.delay
        );
        self.delay
    }

    /// Connected -> Disconnected. Returns the delay before the next attempt.
    pub fn on_transport_failure(&mut self, reason: &DisconnectReason) -> Duration {
        self.state = ConnectionState::Disconnected;
        warn!(
            component = "reconnect",
            "Connection {} to {} lost ({}); reconnecting in {:?}",
            self.generation, self.target, reason, self.delay
        );
        self.delay
    }

    /// Enter the terminal state
    pub fn stop(&mut self) {
        self.state = ConnectionState::Stopped;
    }

    /// Whether `generation` names the live connection
    pub fn is_current(&self, generation: u64) -> bool {
        self.state == ConnectionState::Connected && self.generation == generation
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the latest connection (0 before the first)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total connect attempts so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Failed attempts since the last successful connect
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Fixed backoff delay
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Connect target, for logs
    pub fn target(&self) -> &str {
        &self.target
    }
}
