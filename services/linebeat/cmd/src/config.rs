//! Configuration handling for the linebeat binaries.
//!
//! Settings come from built-in defaults, then an optional YAML file, then
//! `LINEBEAT_*` environment variables. Command-line flags are applied last
//! by each binary.

// Shared by both binaries; each one reads a single section.
#![allow(dead_code)]

use anyhow::Result;
use linebeat_session::{ClientConfig, MissedPongPolicy, ServerConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Server section
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Address to bind
    pub bind: String,
    /// Port to listen on; the positional argument wins
    pub port: Option<u16>,
    /// Session core settings
    pub session: ServerConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: None,
            session: ServerConfig::default(),
        }
    }
}

/// Client section
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Session core settings
    pub session: ClientConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            session: ClientConfig::default(),
        }
    }
}

/// Combined configuration for both binaries
#[derive(Debug, Clone, Default)]
pub struct LinebeatConfig {
    /// Server settings
    pub server: ServerSettings,
    /// Client settings
    pub client: ClientSettings,
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Default, Deserialize)]
struct RootConfig {
    server: Option<ServerFile>,
    client: Option<ClientFile>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerFile {
    bind: Option<String>,
    port: Option<u16>,
    liveness_window: Option<String>,
    max_line_len: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientFile {
    host: Option<String>,
    port: Option<u16>,
    ping_interval: Option<String>,
    ping_timeout: Option<String>,
    reconnect_delay: Option<String>,
    connect_timeout: Option<String>,
    missed_pong_threshold: Option<u32>,
    max_line_len: Option<usize>,
}

impl LinebeatConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        // A missing or unreadable file is not an error
        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?}: {}; using defaults", config_path.as_ref(), e);
                }
            },
            Err(_) => {
                info!("Config file {:?} not found, using defaults", config_path.as_ref());
            }
        }

        config.apply_environment_overrides();
        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(server) = root_config.server {
            if let Some(bind) = server.bind {
                self.server.bind = bind;
            }
            if server.port.is_some() {
                self.server.port = server.port;
            }
            set_duration(&mut self.server.session.liveness_window, "server.liveness_window", server.liveness_window);
            if let Some(max) = server.max_line_len {
                self.server.session.max_line_len = max;
            }
        }

        if let Some(client) = root_config.client {
            if let Some(host) = client.host {
                self.client.host = host;
            }
            if let Some(port) = client.port {
                self.client.port = port;
            }
            let session = &mut self.client.session;
            set_duration(&mut session.ping_interval, "client.ping_interval", client.ping_interval);
            set_duration(&mut session.ping_timeout, "client.ping_timeout", client.ping_timeout);
            set_duration(&mut session.reconnect_delay, "client.reconnect_delay", client.reconnect_delay);
            set_duration(&mut session.connect_timeout, "client.connect_timeout", client.connect_timeout);
            if let Some(threshold) = client.missed_pong_threshold {
                session.missed_pong_policy = missed_pong_policy(threshold);
            }
            if let Some(max) = client.max_line_len {
                session.max_line_len = max;
            }
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("LINEBEAT_BIND") {
            info!("Bind address overridden by environment: {}", bind);
            self.server.bind = bind;
        }

        if let Some(port) = lookup("LINEBEAT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.server.port = Some(port);
                    self.client.port = port;
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid LINEBEAT_PORT {:?}", port),
            }
        }

        if let Some(host) = lookup("LINEBEAT_HOST") {
            info!("Host overridden by environment: {}", host);
            self.client.host = host;
        }

        set_duration(
            &mut self.server.session.liveness_window,
            "LINEBEAT_LIVENESS_WINDOW",
            lookup("LINEBEAT_LIVENESS_WINDOW"),
        );
        set_duration(
            &mut self.client.session.ping_interval,
            "LINEBEAT_PING_INTERVAL",
            lookup("LINEBEAT_PING_INTERVAL"),
        );
        set_duration(
            &mut self.client.session.ping_timeout,
            "LINEBEAT_PING_TIMEOUT",
            lookup("LINEBEAT_PING_TIMEOUT"),
        );
        set_duration(
            &mut self.client.session.reconnect_delay,
            "LINEBEAT_RECONNECT_DELAY",
            lookup("LINEBEAT_RECONNECT_DELAY"),
        );
    }
}

/// Threshold 0 keeps the advisory behavior
pub fn missed_pong_policy(threshold: u32) -> MissedPongPolicy {
    if threshold == 0 {
        MissedPongPolicy::Advisory
    } else {
        MissedPongPolicy::Reconnect { threshold }
    }
}

/// Longest accepted timer setting
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// `Some(duration)` if it is usable as a timer setting, else logs and `None`
pub fn checked_duration(key: &str, duration: Duration) -> Option<Duration> {
    if duration.is_zero() {
        warn!("Ignoring zero duration for {}", key);
        None
    } else if duration > MAX_DURATION {
        warn!("Ignoring duration {:?} for {}; the limit is {:?}", duration, key, MAX_DURATION);
        None
    } else {
        Some(duration)
    }
}

fn set_duration(target: &mut Duration, key: &str, value: Option<String>) {
    let Some(value) = value else {
        return;
    };
    match humantime::parse_duration(value.trim()) {
        Ok(duration) => {
            if let Some(duration) = checked_duration(key, duration) {
                *target = duration;
            }
        }
        Err(e) => warn!("Ignoring invalid duration {:?} for {}: {}", value, key, e),
    }
}
