//! Linebeat server binary.
//!
//! Listens on a TCP port, answers `Ping <epoch>` heartbeats and replies to
//! every other line with a quoted echo and a random phrase. Peers that stop
//! pinging are disconnected after the liveness window.

use anyhow::Context;
use clap::Parser;
use linebeat_session::{listen_tcp, PhraseReplyHandler, RandomPhrases, Server};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing::info;

mod config;
mod logging;

use config::{checked_duration, LinebeatConfig};

/// Line server with epoch heartbeats
#[derive(Parser, Debug)]
#[command(name = "linebeat-server", version, about = "Line server with epoch heartbeats")]
struct Args {
    /// Port to listen on
    port: Option<u16>,

    /// Address to bind, e.g. 127.0.0.1
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Close peers that send no valid ping within this window, e.g. 10s
    #[arg(long)]
    liveness_window: Option<humantime::Duration>,

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

    let Some(port) = args.port.or(config.server.port) else {
        eprintln!("Usage: linebeat-server <port>");
        std::process::exit(1);
    };

    let bind = match args.bind {
        Some(ip) => ip,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", config.server.bind))?,
    };
    if let Some(window) = args
        .liveness_window
        .and_then(|d| checked_duration("--liveness-window", d.into()))
    {
        config.server.session.liveness_window = window;
    }

    info!("Starting linebeat server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Liveness window {:?}, max line length {}",
        config.server.session.liveness_window, config.server.session.max_line_len
    );

    let addr = SocketAddr::new(bind, port);
    let listener = listen_tcp(addr)
        .await
        .with_context(|| format!("failed to listen on {}", addr))?;

    let server = Server::new(
        config.server.session,
        PhraseReplyHandler::new(RandomPhrases::default()),
    );
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
