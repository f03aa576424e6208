//! Inbound line routing.
//!
//! [`classify`] decides, per role, whether a line is heartbeat traffic,
//! application text, or something to drop. [`ServerDispatcher`] applies
//! that decision on the server: pings go to the session's liveness
//! monitor, application text to the message handler.

use crate::handler::MessageHandler;
use crate::liveness::{LivenessMonitor, PingVerdict};
use crate::stats::SessionStats;
use linebeat_wire::{Line, WireError, INVALID_EPOCH_PREFIX};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Which end of the protocol is reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts pings, answers pongs
    Server,
    /// Sends pings, receives pongs
    Client,
}

/// Routing decision for one inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Heartbeat addressed to this role: a ping on the server, a pong on the client
    Heartbeat(u64),
    /// Server rejected one of our pings (client only)
    Rejected(u64),
    /// Application text for the message handler
    Application(String),
    /// Heartbeat line this role never expects
    Unexpected(Line),
    /// Heartbeat prefix with a bad epoch
    Malformed(WireError),
}

/// Classify a raw line for `role`
pub fn classify(role: Role, raw: &str) -> Inbound {
    // Rejections only flow server -> client; from a client any such line,
    // well-formed or not, is just text
    if role == Role::Server && raw.starts_with(INVALID_EPOCH_PREFIX) {
        return Inbound::Application(raw.to_string());
    }

    let line = match Line::parse(raw) {
        Ok(line) => line,
        Err(e) => return Inbound::Malformed(e),
    };

    match (role, line) {
        (Role::Server, Line::Ping(epoch)) | (Role::Client, Line::Pong(epoch)) => {
            Inbound::Heartbeat(epoch)
        }
        (Role::Client, Line::InvalidEpoch(epoch)) => Inbound::Rejected(epoch),
        (_, Line::Text(text)) => Inbound::Application(text),
        (_, line) => Inbound::Unexpected(line),
    }
}

/// Server-side dispatch onto liveness monitor and message handler
#[derive(Debug)]
pub struct ServerDispatcher<H> {
    handler: H,
}

impl<H: MessageHandler> ServerDispatcher<H> {
    /// Create a dispatcher around `handler`
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Route one inbound line, returning the reply to enqueue, if any
    pub fn on_line(
        &self,
        peer: &str,
        raw: &str,
        liveness: &mut LivenessMonitor,
        stats: &mut SessionStats,
        now: Instant,
    ) -> Option<String> {
        debug!(component = "dispatch", "Received message from {}: {}", peer, raw);

        match classify(Role::Server, raw) {
            Inbound::Heartbeat(epoch) => {
                let verdict = liveness.on_ping(epoch, now);
                match verdict {
                    PingVerdict::Accepted { .. } => stats.pings_accepted += 1,
                    PingVerdict::Rejected { .. } => stats.pings_rejected += 1,
                    PingVerdict::Closed => {}
                }
                verdict.reply().map(|line| line.to_string())
            }
            Inbound::Application(text) => Some(self.handler.handle(&text)),
            Inbound::Malformed(e) => {
                stats.malformed_lines += 1;
                warn!(component = "dispatch", "Dropping line from {}: {}", peer, e);
                None
            }
            Inbound::Rejected(_) | Inbound::Unexpected(_) => {
                warn!(component = "dispatch", "Dropping unexpected line from {}: {}", peer, raw);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classify_server() {
        assert_eq!(classify(Role::Server, "Ping 4"), Inbound::Heartbeat(4));
        assert_eq!(
            classify(Role::Server, "Pong 4"),
            Inbound::Unexpected(Line::Pong(4))
        );
        assert_eq!(
            classify(Role::Server, "Invalid epoch 2"),
            Inbound::Application("Invalid epoch 2".to_string())
        );
        assert_eq!(
            classify(Role::Server, "hi"),
            Inbound::Application("hi".to_string())
        );
        assert!(matches!(
            classify(Role::Server, "Ping four"),
            Inbound::Malformed(_)
        ));
    }

    #[test]
    fn test_invalid_epoch_text_from_client_reaches_handler() {
        for raw in ["Invalid epoch abc", "Invalid epoch ", "Invalid epoch 99999999999999999999"] {
            assert_eq!(
                classify(Role::Server, raw),
                Inbound::Application(raw.to_string())
            );
        }
        // On the client a bad epoch is still malformed
        assert!(matches!(
            classify(Role::Client, "Invalid epoch abc"),
            Inbound::Malformed(_)
        ));

        let dispatcher = ServerDispatcher::new(|line: &str| format!("echo {}", line));
        let now = Instant::now();
        let mut liveness = LivenessMonitor::new(Duration::from_secs(10), now);
        let mut stats = SessionStats::default();
        assert_eq!(
            dispatcher
                .on_line("peer", "Invalid epoch abc", &mut liveness, &mut stats, now)
                .as_deref(),
            Some("echo Invalid epoch abc")
        );
        assert_eq!(stats.malformed_lines, 0);
        assert_eq!(liveness.watermark(), 0);
    }

    #[test]
    fn test_classify_client() {
        assert_eq!(classify(Role::Client, "Pong 4"), Inbound::Heartbeat(4));
        assert_eq!(
            classify(Role::Client, "Ping 4"),
            Inbound::Unexpected(Line::Ping(4))
        );
        assert_eq!(classify(Role::Client, "Invalid epoch 2"), Inbound::Rejected(2));
        assert_eq!(
            classify(Role::Client, "Your message is 'x'. Good deal!"),
            Inbound::Application("Your message is 'x'. Good deal!".to_string())
        );
    }

    #[test]
    fn test_server_dispatch_scenario() {
        let dispatcher = ServerDispatcher::new(|line: &str| format!("echo {}", line));
        let now = Instant::now();
        let mut liveness = LivenessMonitor::new(Duration::from_secs(10), now);
        let mut stats = SessionStats::default();
        let mut send = |raw: &str| dispatcher.on_line("peer", raw, &mut liveness, &mut stats, now);

        assert_eq!(send("Ping 1").as_deref(), Some("Pong 1"));
        assert_eq!(send("Ping 1").as_deref(), Some("Invalid epoch 1"));
        assert_eq!(send("Ping 2").as_deref(), Some("Pong 2"));
        assert_eq!(send("hello").as_deref(), Some("echo hello"));
        assert_eq!(send("Ping x"), None);
        assert_eq!(send("Pong 2"), None);

        assert_eq!(liveness.watermark(), 2);
        assert_eq!(stats.pings_accepted, 2);
        assert_eq!(stats.pings_rejected, 1);
        assert_eq!(stats.malformed_lines, 1);
    }
}
