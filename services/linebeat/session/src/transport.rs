//! TCP line transport for linebeat sessions.
//!
//! [`LineTransport`] wraps any duplex byte stream and exposes the four
//! operations the lifecycle core needs: read a line, write a line, close,
//! and is-open. [`Connector`] abstracts the client's connect step so the
//! reconnect path can be driven by in-memory streams in tests.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use linebeat_wire::{encode_line, LineDecoder};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tracing::{debug, trace};

const READ_CHUNK: usize = 4 * 1024;

/// Newline-delimited transport over a byte stream
pub struct LineTransport<S> {
    stream: S,
    peer: String,
    decoder: LineDecoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    open: bool,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self::with_decoder(stream, peer, LineDecoder::new())
    }

    /// Wrap a connected stream with a custom inbound line limit
    pub fn with_max_line_len(stream: S, peer: impl Into<String>, max_line_len: usize) -> Self {
        Self::with_decoder(stream, peer, LineDecoder::with_max_line_len(max_line_len))
    }

    fn with_decoder(stream: S, peer: impl Into<String>, decoder: LineDecoder) -> Self {
        Self {
            stream,
            peer: peer.into(),
            decoder,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            open: true,
        }
    }

    /// Label of the remote end, for logs
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether [`close`](Self::close) has not been called yet
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Read the next line, suspending until a delimiter arrives.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call, so
    /// this can sit in a `select!` next to timers.
    pub async fn read_line(&mut self) -> Result<String, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        loop {
            if let Some(line) = self.decoder.decode(&mut self.read_buf)? {
                trace!("Read line from {} ({} bytes)", self.peer, line.len());
                return Ok(line);
            }

            self.read_buf.reserve(READ_CHUNK);
            let bytes_read = self.stream.read_buf(&mut self.read_buf).await?;
            if bytes_read == 0 {
                return Err(TransportError::Eof);
            }
        }
    }

    /// Write one line and its delimiter
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.stage_line(line)?;
        self.flush_staged().await
    }

    /// Encode a line behind any bytes already staged, without writing it
    pub fn stage_line(&mut self, line: &str) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        encode_line(line, &mut self.write_buf)?;
        trace!("Staged line for {}: {}", self.peer, line);
        Ok(())
    }

    /// Whether staged bytes are still waiting to be written
    pub fn has_staged(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Write out everything staged so far.
    ///
    /// Cancel safe: bytes are dropped from the stage only once the stream
    /// took them, so a cancelled flush resumes exactly where it stopped.
    pub async fn flush_staged(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        while !self.write_buf.is_empty() {
            let written = self.stream.write(&self.write_buf).await?;
            if written == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            self.write_buf.advance(written);
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Shut the stream down. Returns `true` only for the call that closed it.
    pub async fn close(&mut self) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of {} reported: {}", self.peer, e);
        }
        true
    }
}

/// Opens fresh connections to a fixed target
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stream type produced on success
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new connection, returning the stream and a peer label
    async fn connect(&self) -> io::Result<(Self::Stream, String)>;

    /// Human-readable target, for logs
    fn target(&self) -> &str;
}

/// Connector that resolves `host:port` on every attempt
#[derive(Debug, Clone)]
pub struct TcpConnector {
    target: String,
}

impl TcpConnector {
    /// Create a connector for `host:port`
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<(TcpStream, String)> {
        let stream = connect_tcp(&self.target).await?;
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.target.clone());
        Ok((stream, peer))
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Resolve `target` and connect to the first address that accepts
pub async fn connect_tcp(target: &str) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in lookup_host(target).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} ({}) failed: {}", target, addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {}", target),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let connector = TcpConnector::new(bound_addr.to_string());
        let (client, peer) = connector.connect().await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(peer, bound_addr.to_string());

        let mut client = LineTransport::new(client, peer);
        let mut server = LineTransport::new(server, "client");
        client.write_line("Ping 1").await.unwrap();
        assert_eq!(server.read_line().await.unwrap(), "Ping 1");
        server.write_line("Pong 1").await.unwrap();
        assert_eq!(client.read_line().await.unwrap(), "Pong 1");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(connect_tcp(&addr.to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_eof_and_close() {
        let (a, b) = duplex(64);
        let mut left = LineTransport::new(a, "right");
        let mut right = LineTransport::new(b, "left");

        left.write_line("bye").await.unwrap();
        assert!(left.close().await);
        assert!(!left.close().await);
        assert!(!left.is_open());
        assert!(matches!(
            left.write_line("again").await,
            Err(TransportError::Closed)
        ));

        assert_eq!(right.read_line().await.unwrap(), "bye");
        assert!(matches!(right.read_line().await, Err(TransportError::Eof)));
    }

    #[tokio::test]
    async fn test_read_line_survives_cancellation() {
        let (a, b) = duplex(64);
        let mut reader = LineTransport::new(a, "writer");
        let mut writer = b;

        writer.write_all(b"Pong ").await.unwrap();
        // Partial line: the read is cancelled by the timeout
        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.read_line()).await;
        assert!(cancelled.is_err());

        writer.write_all(b"7\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap(), "Pong 7");
    }

    #[tokio::test]
    async fn test_flush_resumes_after_cancellation() {
        let (a, b) = duplex(8);
        let mut writer = LineTransport::new(a, "reader");
        let mut reader = LineTransport::new(b, "writer");

        // Larger than the pipe: the flush stalls until the reader drains it
        writer.stage_line("Your message is 'hello'").unwrap();
        let stalled =
            tokio::time::timeout(std::time::Duration::from_millis(20), writer.flush_staged()).await;
        assert!(stalled.is_err());
        assert!(writer.has_staged());

        writer.stage_line("Pong 3").unwrap();
        let (flushed, first) = tokio::join!(writer.flush_staged(), reader.read_line());
        flushed.unwrap();
        assert!(!writer.has_staged());
        assert_eq!(first.unwrap(), "Your message is 'hello'");
        assert_eq!(reader.read_line().await.unwrap(), "Pong 3");
    }

    #[tokio::test]
    async fn test_oversized_line_is_fatal() {
        let (a, mut b) = duplex(256);
        let mut reader = LineTransport::with_max_line_len(a, "writer", 8);
        b.write_all(b"this line is far too long\n").await.unwrap();

        assert!(matches!(
            reader.read_line().await,
            Err(TransportError::Wire(_))
        ));
    }
}
