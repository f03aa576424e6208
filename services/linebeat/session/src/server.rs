//! Server accept loop and per-peer session task.
//!
//! Every accepted connection gets its own task that owns the transport,
//! the liveness monitor and the outbound queue. The task serializes line
//! I/O, the liveness deadline and registry commands through one `select!`
//! loop; the registry is the only state it shares.

use crate::dispatch::ServerDispatcher;
use crate::error::DisconnectReason;
use crate::handler::MessageHandler;
use crate::liveness::LivenessMonitor;
use crate::outbound::{ConnectionIo, OutboundQueue};
use crate::registry::{SessionCommand, SessionId, SessionRegistry};
use crate::stats::SessionStats;
use crate::transport::LineTransport;
use linebeat_wire::DEFAULT_MAX_LINE_LEN;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for the server side
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How long a session may go without a valid ping
    pub liveness_window: Duration,
    /// Longest accepted inbound line
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(10),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Line server with a shared session registry
pub struct Server<H> {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<ServerDispatcher<H>>,
}

impl<H: MessageHandler> Server<H> {
    /// Create a server replying to application lines with `handler`
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            dispatcher: Arc::new(ServerDispatcher::new(handler)),
        }
    }

    /// Shared session registry
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept connections until `shutdown` resolves, then close all sessions
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    info!("Accepted connection from {}", peer_addr);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
                    }
                    let (id, _task) = self.spawn_session(stream, peer_addr.to_string());
                    debug!("Session {} spawned for {}", id, peer_addr);
                }
                Err(e) => {
                    // Usually fd exhaustion; back off briefly instead of spinning
                    warn!("Accept error: {}; continuing", e);
                    if !accept_backoff(shutdown.as_mut()).await {
                        break;
                    }
                }
            }
        }

        let closing = self.registry.close_all();
        info!("Shutdown requested; closing {} sessions", closing);
        Ok(())
    }

    /// Register and spawn a session for an established stream
    pub fn spawn_session<S>(
        &self,
        stream: S,
        peer: String,
    ) -> (SessionId, JoinHandle<DisconnectReason>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (id, commands) = self.registry.register(peer.clone());
        let session = PeerSession {
            id,
            transport: LineTransport::with_max_line_len(stream, peer, self.config.max_line_len),
            liveness: LivenessMonitor::new(self.config.liveness_window, Instant::now()),
            queue: OutboundQueue::new(),
            stats: SessionStats::default(),
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            commands,
        };
        (id, tokio::spawn(session.run()))
    }
}

/// Pause after an accept error. Returns `false` if `shutdown` fired first.
async fn accept_backoff<F>(shutdown: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

/// State owned by one server connection
struct PeerSession<S, H> {
    id: SessionId,
    transport: LineTransport<S>,
    liveness: LivenessMonitor,
    queue: OutboundQueue,
    stats: SessionStats,
    dispatcher: Arc<ServerDispatcher<H>>,
    registry: Arc<SessionRegistry>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl<S, H> PeerSession<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: MessageHandler,
{
    async fn run(mut self) -> DisconnectReason {
        info!("Starting session {} with {}", self.id, self.transport.peer());

        let reason = loop {
            // Always Some while the monitor is open
            let deadline = self.liveness.deadline().unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Close) | None => break DisconnectReason::Shutdown,
                    }
                }

                _ = sleep_until(deadline) => {
                    warn!(
                        component = "liveness",
                        "Client {} failed to send ping in time. Closing connection.",
                        self.transport.peer()
                    );
                    break DisconnectReason::LivenessTimeout;
                }

                // Replies are flushed before the next read; a peer that stops
                // reading stalls only this arm
                io = self.queue.next_io(&mut self.transport) => {
                    match io {
                        ConnectionIo::Line(Ok(raw)) => {
                            let now = Instant::now();
                            self.stats.record_line_in(now);
                            let reply = self.dispatcher.on_line(
                                self.transport.peer(),
                                &raw,
                                &mut self.liveness,
                                &mut self.stats,
                                now,
                            );
                            if let Some(reply) = reply {
                                self.queue.enqueue(reply);
                            }
                        }
                        ConnectionIo::Line(Err(e)) => {
                            debug!("Read error from {}: {}", self.transport.peer(), e);
                            break DisconnectReason::transport(&e);
                        }
                        ConnectionIo::Flushed(Ok(_)) => {}
                        ConnectionIo::Flushed(Err(e)) => break DisconnectReason::transport(&e),
                    }
                }
            }
        };

        self.teardown(reason).await
    }

    async fn teardown(mut self, reason: DisconnectReason) -> DisconnectReason {
        self.liveness.close();
        self.stats.lines_out = self.queue.sent();
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("Discarded {} unsent lines for {}", dropped, self.transport.peer());
        }
        if !self.transport.close().await {
            error!("Session {} transport was closed before teardown", self.id);
        }
        self.registry.unregister(self.id);

        info!(
            "Session with {} ended ({}); watermark {}. Stats: {:?}",
            self.transport.peer(),
            reason,
            self.liveness.watermark(),
            self.stats
        );
        reason
    }
}
