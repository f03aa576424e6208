//! Reconnecting heartbeat client.
//!
//! A single task owns the connection, the heartbeat engine and the
//! outbound queue. Callers talk to it through a [`ClientHandle`] and
//! observe it through a stream of [`ClientEvent`]s. Every timer (ping
//! interval, ping deadlines, reconnect delay) is a local of the task's
//! loops, so a torn-down connection leaves nothing behind that can fire.

use crate::dispatch::{classify, Inbound, Role};
use crate::error::{ClientError, DisconnectReason};
use crate::heartbeat::{HeartbeatEngine, PongOutcome};
use crate::outbound::{ConnectionIo, OutboundQueue};
use crate::reconnect::ReconnectController;
use crate::stats::SessionStats;
use crate::transport::{Connector, LineTransport};
use linebeat_wire::DEFAULT_MAX_LINE_LEN;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What the client does when pongs stop arriving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissedPongPolicy {
    /// Log and report, keep the connection
    #[default]
    Advisory,
    /// Treat the connection as failed after `threshold` consecutive misses
    Reconnect {
        /// Consecutive ping timeouts that trigger a reconnect
        threshold: u32,
    },
}

impl MissedPongPolicy {
    /// Whether `consecutive_misses` should fail the connection
    pub fn should_escalate(&self, consecutive_misses: u32) -> bool {
        match self {
            MissedPongPolicy::Advisory => false,
            MissedPongPolicy::Reconnect { threshold } => consecutive_misses >= (*threshold).max(1),
        }
    }
}

/// Configuration for the client side
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Time between pings
    pub ping_interval: Duration,
    /// How long a ping may wait for its pong
    pub ping_timeout: Duration,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Reaction to unanswered pings
    pub missed_pong_policy: MissedPongPolicy,
    /// Longest accepted inbound line
    pub max_line_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            missed_pong_policy: MissedPongPolicy::Advisory,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Requests from a [`ClientHandle`] to the client task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Queue an application line
    Send(String),
    /// Close the connection and stop reconnecting
    Stop,
}

/// Notifications from the client task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connection established
    Connected {
        /// Remote address
        peer: String,
        /// Connection generation, starting at 1
        generation: u64,
    },
    /// Connect attempt failed
    ConnectFailed {
        /// Attempt number, starting at 1
        attempt: u64,
        /// Error text
        error: String,
    },
    /// Established connection was torn down
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },
    /// Next connect attempt is scheduled
    ReconnectScheduled {
        /// Wait before the attempt
        delay: Duration,
    },
    /// Pong matched an outstanding ping
    Pong {
        /// Acknowledged epoch
        epoch: u64,
        /// Round trip time
        rtt: Duration,
    },
    /// A ping went unanswered within the ping timeout
    LivenessSuspect {
        /// Epoch of the unanswered ping
        epoch: u64,
        /// Misses since the last pong
        consecutive_misses: u32,
    },
    /// Server answered a ping with `Invalid epoch`
    InvalidEpoch {
        /// Rejected epoch
        epoch: u64,
    },
    /// Application line from the server
    Message {
        /// Line text
        line: String,
    },
    /// Heartbeat line the client never expects (e.g. a `Ping`)
    Unexpected {
        /// Raw line
        line: String,
    },
    /// Client task exited
    Stopped,
}

/// Cloneable handle for feeding a running [`Client`]
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    /// Queue an application line for the server.
    ///
    /// Lines sent while disconnected are delivered, in order, right after
    /// the next successful connect.
    pub fn send(&self, line: impl Into<String>) -> Result<(), ClientError> {
        self.commands
            .send(ClientCommand::Send(line.into()))
            .map_err(|_| ClientError::Stopped)
    }

    /// Ask the client to disconnect and exit
    pub fn stop(&self) -> Result<(), ClientError> {
        self.commands
            .send(ClientCommand::Stop)
            .map_err(|_| ClientError::Stopped)
    }

    /// Whether the client task has exited
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Heartbeat client driving one logical connection through reconnects
pub struct Client<C: Connector> {
    config: ClientConfig,
    connector: C,
    reconnect: ReconnectController,
    heartbeat: HeartbeatEngine,
    queue: OutboundQueue,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<C: Connector> Client<C> {
    /// Build a client, its handle and its event stream
    pub fn new(
        config: ClientConfig,
        connector: C,
    ) -> (Self, ClientHandle, mpsc::UnboundedReceiver<ClientEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let client = Self {
            reconnect: ReconnectController::new(connector.target(), config.reconnect_delay),
            heartbeat: HeartbeatEngine::new(config.ping_timeout),
            queue: OutboundQueue::new(),
            config,
            connector,
            commands: command_rx,
            events: event_tx,
        };
        let handle = ClientHandle {
            commands: command_tx,
        };
        (client, handle, event_rx)
    }

    /// Connect, heartbeat and reconnect until stopped
    pub async fn run(mut self) {
        info!("Starting client for {}", self.reconnect.target());

        loop {
            let attempt = self.reconnect.begin_attempt();
            debug!("Connect attempt {} to {}", attempt, self.reconnect.target());

            let connect_timeout = self.config.connect_timeout;
            let outcome = {
                let connect = tokio::time::timeout(connect_timeout, self.connector.connect());
                tokio::pin!(connect);

                loop {
                    tokio::select! {
                        biased;

                        command = self.commands.recv() => {
                            if !Self::accept_command(&mut self.queue, command) {
                                break None;
                            }
                        }

                        result = &mut connect => {
                            break Some(result.unwrap_or_else(|_| {
                                Err(io::Error::new(
                                    io::ErrorKind::TimedOut,
                                    format!("connect timed out after {:?}", connect_timeout),
                                ))
                            }));
                        }
                    }
                }
            };

            let delay = match outcome {
                None => break,
                Some(Ok((stream, peer))) => {
                    let generation = self.reconnect.on_connected();
                    info!("Connected to server at {}", peer);
                    self.emit(ClientEvent::Connected {
                        peer: peer.clone(),
                        generation,
                    });

                    let reason = self.run_connection(stream, peer, generation).await;
                    if reason == DisconnectReason::Shutdown {
                        break;
                    }

                    let pings = self.heartbeat.reset_connection();
                    let lines = self.queue.clear();
                    debug!("Discarded {} pending pings and {} queued lines", pings, lines);
                    let delay = self.reconnect.on_transport_failure(&reason);
                    self.emit(ClientEvent::Disconnected { reason });
                    delay
                }
                Some(Err(e)) => {
                    let delay = self.reconnect.on_connect_failed(&e);
                    self.emit(ClientEvent::ConnectFailed {
                        attempt,
                        error: e.to_string(),
                    });
                    delay
                }
            };

            self.emit(ClientEvent::ReconnectScheduled { delay });
            if !self.backoff(delay).await {
                break;
            }
        }

        self.reconnect.stop();
        self.heartbeat.reset_connection();
        self.queue.clear();
        info!("Client for {} stopped", self.reconnect.target());
        self.emit(ClientEvent::Stopped);
    }

    /// Wait out the reconnect delay, still accepting commands
    async fn backoff(&mut self, delay: Duration) -> bool {
        let until = Instant::now() + delay;
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    if !Self::accept_command(&mut self.queue, command) {
                        return false;
                    }
                }

                _ = sleep_until(until) => return true,
            }
        }
    }

    async fn run_connection(
        &mut self,
        stream: C::Stream,
        peer: String,
        generation: u64,
    ) -> DisconnectReason {
        let mut transport = LineTransport::with_max_line_len(stream, peer, self.config.max_line_len);
        let mut stats = SessionStats::default();
        let sent_before = self.queue.sent();
        let mut reason = None;

        // The first tick is immediate, so the first ping queues up behind
        // any lines sent while disconnected
        let mut ticker = interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while reason.is_none() {
            let ping_deadline = self.heartbeat.next_deadline();

            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(ClientCommand::Send(line)) => {
                            self.queue.enqueue(line);
                        }
                        Some(ClientCommand::Stop) | None => reason = Some(DisconnectReason::Shutdown),
                    }
                }

                _ = sleep_until(ping_deadline.unwrap_or_else(Instant::now)), if ping_deadline.is_some() => {
                    reason = self.on_ping_deadline(&mut stats);
                }

                _ = ticker.tick() => {
                    let ping = self.heartbeat.tick(Instant::now());
                    stats.pings_sent += 1;
                    self.queue.enqueue(ping.to_string());
                }

                // A stalled write never holds up the arms above
                io = self.queue.next_io(&mut transport) => {
                    match io {
                        ConnectionIo::Line(Ok(raw)) => self.on_line(&raw, &mut stats),
                        ConnectionIo::Line(Err(e)) => {
                            debug!("Read error from {}: {}", transport.peer(), e);
                            reason = Some(DisconnectReason::transport(&e));
                        }
                        ConnectionIo::Flushed(Ok(_)) => {}
                        ConnectionIo::Flushed(Err(e)) => reason = Some(DisconnectReason::transport(&e)),
                    }
                }
            }
        }

        let reason = reason.unwrap_or(DisconnectReason::Shutdown);
        stats.lines_out = self.queue.sent() - sent_before;
        transport.close().await;
        info!(
            "Connection {} to {} ended ({}). Stats: {:?}",
            generation,
            transport.peer(),
            reason,
            stats
        );
        reason
    }

    fn on_line(&mut self, raw: &str, stats: &mut SessionStats) {
        let now = Instant::now();
        stats.record_line_in(now);

        match classify(Role::Client, raw) {
            Inbound::Heartbeat(epoch) => {
                if let PongOutcome::Acknowledged { epoch, rtt } = self.heartbeat.on_pong(epoch, now) {
                    stats.pongs_received += 1;
                    stats.last_rtt = Some(rtt);
                    self.emit(ClientEvent::Pong { epoch, rtt });
                }
            }
            Inbound::Rejected(epoch) => {
                warn!("Server rejected ping with epoch {}", epoch);
                self.emit(ClientEvent::InvalidEpoch { epoch });
            }
            Inbound::Application(line) => {
                debug!("Response from server: {}", line);
                self.emit(ClientEvent::Message { line });
            }
            Inbound::Unexpected(line) => {
                warn!("Unexpected heartbeat line from server: {}", line);
                self.emit(ClientEvent::Unexpected {
                    line: raw.to_string(),
                });
            }
            Inbound::Malformed(e) => {
                stats.malformed_lines += 1;
                warn!("Dropping malformed line from server: {}", e);
            }
        }
    }

    fn on_ping_deadline(&mut self, stats: &mut SessionStats) -> Option<DisconnectReason> {
        let expired = self.heartbeat.expire(Instant::now());
        for epoch in expired {
            stats.ping_timeouts += 1;
            self.emit(ClientEvent::LivenessSuspect {
                epoch,
                consecutive_misses: self.heartbeat.consecutive_misses(),
            });
        }

        let misses = self.heartbeat.consecutive_misses();
        if self.config.missed_pong_policy.should_escalate(misses) {
            Some(DisconnectReason::MissedPongs { count: misses })
        } else {
            None
        }
    }

    /// Returns `false` when the client should stop
    fn accept_command(queue: &mut OutboundQueue, command: Option<ClientCommand>) -> bool {
        match command {
            Some(ClientCommand::Send(line)) => {
                queue.enqueue(line);
                debug!("Queued line while disconnected ({} pending)", queue.len());
                true
            }
            Some(ClientCommand::Stop) | None => false,
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("Client event dropped; no listener");
        }
    }
}
