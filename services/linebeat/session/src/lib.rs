//! TCP line sessions with epoch heartbeats, liveness and reconnect.
//!
//! This crate provides both ends of the linebeat protocol: a server that
//! answers pings and reaps silent peers, and a client that pings on an
//! interval, watches for missing pongs and reconnects after failures.
//!
//! ## Features
//!
//! - **Line Transport**: newline-delimited TCP with cancel-safe reads
//! - **Heartbeat**: `Ping <epoch>` / `Pong <epoch>` with per-ping timeouts
//! - **Liveness**: per-session watermark and rolling ping deadline (server)
//! - **Reconnect**: fixed-delay retry, queued lines flushed on reconnect
//! - **Registry**: concurrent map of live server sessions
//!
//! ## Example
//!
//! ```rust,no_run
//! use linebeat_session::{Client, ClientConfig, ClientEvent, TcpConnector};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (client, handle, mut events) =
//!     Client::new(ClientConfig::default(), TcpConnector::new("127.0.0.1:5001"));
//! tokio::spawn(client.run());
//!
//! handle.send("hello")?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::Message { line } => println!("Response from server: {}", line),
//!         ClientEvent::Stopped => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod liveness;
pub mod outbound;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod stats;
pub mod transport;

// Re-export main types
pub use client::{Client, ClientCommand, ClientConfig, ClientEvent, ClientHandle, MissedPongPolicy};
pub use dispatch::{classify, Inbound, Role, ServerDispatcher};
pub use error::{ClientError, DisconnectReason, TransportError};
pub use handler::{MessageHandler, PhraseReplyHandler, PhraseSource, RandomPhrases, DEFAULT_PHRASES};
pub use heartbeat::{HeartbeatEngine, PendingPing, PongOutcome};
pub use liveness::{LivenessMonitor, LivenessState, PingVerdict};
pub use outbound::{ConnectionIo, OutboundQueue};
pub use reconnect::{ConnectionState, ReconnectController};
pub use registry::{SessionCommand, SessionId, SessionInfo, SessionRegistry};
pub use server::{Server, ServerConfig};
pub use stats::SessionStats;
pub use transport::{connect_tcp, listen_tcp, Connector, LineTransport, TcpConnector};
