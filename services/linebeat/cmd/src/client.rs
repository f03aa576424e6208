//! Linebeat client binary.
//!
//! Sends each stdin line to the server, prints the responses and keeps the
//! connection alive with pings, reconnecting whenever it drops.

use clap::Parser;
use linebeat_session::{Client, ClientEvent, ClientHandle, TcpConnector};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

mod config;
mod logging;

use config::{checked_duration, missed_pong_policy, LinebeatConfig};

/// Heartbeat client that forwards stdin lines
#[derive(Parser, Debug)]
#[command(name = "linebeat-client", version, about = "Heartbeat client that forwards stdin lines")]
struct Args {
    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Ping interval, e.g. 5s
    #[arg(long)]
    ping_interval: Option<humantime::Duration>,

    /// How long to wait for each pong, e.g. 2s
    #[arg(long)]
    ping_timeout: Option<humantime::Duration>,

    /// Delay between reconnect attempts, e.g. 5s
    #[arg(long)]
    reconnect_delay: Option<humantime::Duration>,

    /// Reconnect after this many consecutive missed pongs (0 = only log)
    #[arg(long)]
    missed_pong_threshold: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "linebeat.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init("linebeat", &args.log_level)?;

    let mut config = LinebeatConfig::load_from_file(&args.config)?;
    let settings = &mut config.client;
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(interval) = args
        .ping_interval
        .and_then(|d| checked_duration("--ping-interval", d.into()))
    {
        settings.session.ping_interval = interval;
    }
    if let Some(timeout) = args
        .ping_timeout
        .and_then(|d| checked_duration("--ping-timeout", d.into()))
    {
        settings.session.ping_timeout = timeout;
    }
    if let Some(delay) = args
        .reconnect_delay
        .and_then(|d| checked_duration("--reconnect-delay", d.into()))
    {
        settings.session.reconnect_delay = delay;
    }
    if let Some(threshold) = args.missed_pong_threshold {
        settings.session.missed_pong_policy = missed_pong_policy(threshold);
    }

    let target = format!("{}:{}", settings.host, settings.port);
    info!("Starting linebeat client v{} for {}", env!("CARGO_PKG_VERSION"), target);

    let (client, handle, mut events) = Client::new(settings.session.clone(), TcpConnector::new(target));
    let client_task = tokio::spawn(client.run());
    let stdin_task = tokio::spawn(forward_stdin(handle.clone()));

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ClientEvent::Message { line }) => println!("Response from server: {}", line),
                    Some(ClientEvent::Stopped) | None => break,
                    Some(other) => debug!("Client event: {:?}", other),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping client");
                if handle.stop().is_err() {
                    break;
                }
            }
        }
    }

    stdin_task.abort();
    client_task.await?;
    Ok(())
}

/// Send every stdin line as an application message, then stop the client
async fn forward_stdin(handle: ClientHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if handle.send(line).is_err() {
                    return;
                }
            }
            Ok(None) => {
                info!("End of input; stopping client");
                break;
            }
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }

    // Already stopped is fine
    let _ = handle.stop();
}
