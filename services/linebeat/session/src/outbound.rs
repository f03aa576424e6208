//! Per-connection outbound line queue.
//!
//! Heartbeat and application producers both append here; the owning
//! connection task drains the queue strictly from the head with at most
//! one line staged on the transport.

use crate::error::TransportError;
use crate::transport::LineTransport;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, warn};

/// FIFO of lines waiting for the transport
#[derive(Debug, Default)]
pub struct OutboundQueue {
    lines: VecDeque<String>,
    in_flight: bool,
    sent: u64,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line at the tail.
    ///
    /// Returns `true` when the queue was idle, i.e. this enqueue is the one
    /// that has to start a drain.
    pub fn enqueue(&mut self, line: impl Into<String>) -> bool {
        let was_idle = self.lines.is_empty() && !self.in_flight;
        self.lines.push_back(line.into());
        was_idle
    }

    /// Number of queued lines, including one being written
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether the head line is partly written
    pub fn is_draining(&self) -> bool {
        self.in_flight
    }

    /// Queued lines, head first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Drop every queued line, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.lines.len();
        self.lines.clear();
        self.in_flight = false;
        dropped
    }

    /// Lines fully written over the lifetime of this queue
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Write queued lines until the queue is empty.
    ///
    /// Returns the number of lines written. On a transport failure the line
    /// at the head is discarded (never retried) and the error is returned;
    /// lines behind it stay queued for the caller to keep or clear.
    ///
    /// Cancel safe: the head line stays queued until the transport has taken
    /// all of it, and the next drain finishes that line before any other.
    pub async fn drain<S>(&mut self, transport: &mut LineTransport<S>) -> Result<usize, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut written = 0;

        while let Some(line) = self.lines.front() {
            if !self.in_flight {
                match transport.stage_line(line) {
                    Ok(()) => self.in_flight = true,
                    Err(TransportError::Wire(e)) if !e.is_fatal() => {
                        warn!(component = "outbound", "Dropping unsendable line for {}: {}", transport.peer(), e);
                        self.lines.pop_front();
                        continue;
                    }
                    Err(e) => {
                        error!(component = "outbound", "Error sending message to {}: {}", transport.peer(), e);
                        self.lines.pop_front();
                        return Err(e);
                    }
                }
            }

            let result = transport.flush_staged().await;
            self.in_flight = false;
            self.lines.pop_front();

            match result {
                Ok(()) => {
                    written += 1;
                    self.sent += 1;
                }
                Err(e) => {
                    error!(component = "outbound", "Error sending message to {}: {}", transport.peer(), e);
                    return Err(e);
                }
            }
        }

        Ok(written)
    }

    /// Flush queued lines if there are any, otherwise wait for the next
    /// inbound line.
    ///
    /// Both halves are cancel safe, so a connection loop can race this
    /// against its timers and commands without a stalled peer blocking them.
    pub async fn next_io<S>(&mut self, transport: &mut LineTransport<S>) -> ConnectionIo
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.lines.is_empty() {
            ConnectionIo::Line(transport.read_line().await)
        } else {
            ConnectionIo::Flushed(self.drain(transport).await)
        }
    }
}

/// Outcome of one [`OutboundQueue::next_io`] step
#[derive(Debug)]
pub enum ConnectionIo {
    /// An inbound line, or the read error that ended the connection
    Line(Result<String, TransportError>),
    /// The queue was drained, returning the lines written
    Flushed(Result<usize, TransportError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_enqueue_reports_idle_transition() {
        let mut queue = OutboundQueue::new();
        assert!(queue.enqueue("Ping 1"));
        assert!(!queue.enqueue("hello"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec!["Ping 1", "hello"]);

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.enqueue("again"));
    }

    #[tokio::test]
    async fn test_drain_preserves_fifo_across_producers() {
        let (a, b) = duplex(1024);
        let mut transport = LineTransport::new(a, "peer");
        let mut queue = OutboundQueue::new();

        // Interleaved heartbeat and application producers
        queue.enqueue("Ping 1");
        queue.enqueue("A");
        queue.enqueue("Ping 2");
        queue.enqueue("B");

        assert_eq!(queue.drain(&mut transport).await.unwrap(), 4);
        assert!(queue.is_empty());
        assert!(!queue.is_draining());

        let mut lines = BufReader::new(b).lines();
        for expected in ["Ping 1", "A", "Ping 2", "B"] {
            assert_eq!(lines.next_line().await.unwrap().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_drain_failure_drops_head_and_stops() {
        let (a, b) = duplex(64);
        drop(b);
        let mut transport = LineTransport::new(a, "gone");
        let mut queue = OutboundQueue::new();
        queue.enqueue("first");
        queue.enqueue("second");

        assert!(queue.drain(&mut transport).await.is_err());
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec!["second"]);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn test_cancelled_drain_finishes_head_line_first() {
        let (a, b) = duplex(16);
        let mut transport = LineTransport::new(a, "slow-peer");
        let mut queue = OutboundQueue::new();
        queue.enqueue("Your message is 'a long line'");
        queue.enqueue("Ping 4");

        // The peer is not reading yet, so the drain stalls inside the head line
        let stalled =
            tokio::time::timeout(std::time::Duration::from_millis(20), queue.drain(&mut transport)).await;
        assert!(stalled.is_err());
        assert!(queue.is_draining());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.sent(), 0);

        queue.enqueue("Ping 5");
        let mut lines = BufReader::new(b).lines();
        let (drained, _) = tokio::join!(queue.drain(&mut transport), async {
            assert_eq!(
                lines.next_line().await.unwrap().unwrap(),
                "Your message is 'a long line'"
            );
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "Ping 4");
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "Ping 5");
        });
        assert_eq!(drained.unwrap(), 3);
        assert_eq!(queue.sent(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_io_prefers_queued_lines() {
        let (a, b) = duplex(256);
        let mut transport = LineTransport::new(a, "peer");
        let (read, mut write) = tokio::io::split(b);
        let mut queue = OutboundQueue::new();

        write.write_all(b"hello\n").await.unwrap();
        queue.enqueue("Pong 1");

        assert!(matches!(
            queue.next_io(&mut transport).await,
            ConnectionIo::Flushed(Ok(1))
        ));
        match queue.next_io(&mut transport).await {
            ConnectionIo::Line(Ok(line)) => assert_eq!(line, "hello"),
            other => panic!("unexpected {:?}", other),
        }
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "Pong 1");
    }

    #[tokio::test]
    async fn test_unsendable_line_is_skipped() {
        let (a, b) = duplex(256);
        let mut transport = LineTransport::new(a, "peer");
        let mut queue = OutboundQueue::new();
        queue.enqueue("bad\nline");
        queue.enqueue("good");

        assert_eq!(queue.drain(&mut transport).await.unwrap(), 1);
        let mut lines = BufReader::new(b).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "good");
    }
}
