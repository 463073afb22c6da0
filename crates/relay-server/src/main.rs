//! Identifier relay entry point.
//!
//! Accepts WebSocket connections, registers each peer under the identifier it
//! offers in the `from` query parameter, and relays binary envelopes between
//! peers and in-process hosts.
//!
//! # Usage
//!
//! ```text
//! relay-server [OPTIONS]
//!
//! Options:
//!   --port <PORT>                   Listening port [default: 24900]
//!   --bind <IP>                     Interface to bind [default: 0.0.0.0]
//!   --path <PATH>                   WebSocket base path [default: /]
//!   --config <FILE>                 TOML config file
//!   --host <ID>                     Register an in-process host (repeatable)
//!   --presence-debounce-ms <MS>     Presence debounce window [default: 10]
//!   --ping-interval <SECS>          Keepalive ping interval [default: 25]
//!   --max-frame-size <BYTES>        Largest inbound message [default: 1048576]
//! ```
//!
//! Flags override values from the config file, which override built-in
//! defaults.
//!
//! | Variable       | Flag       |
//! |----------------|------------|
//! | `RELAY_PORT`   | `--port`   |
//! | `RELAY_BIND`   | `--bind`   |
//! | `RELAY_PATH`   | `--path`   |
//! | `RELAY_CONFIG` | `--config` |

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use relay_server::application::{HostEndpoint, Inbound, Relay};
use relay_server::domain::RelayConfig;
use relay_server::infrastructure::{load_config, run_server, ConfigFile};

// ── CLI argument definitions ─────────────────────────────────────────────────

/// Identifier-addressed WebSocket relay.
#[derive(Debug, Parser)]
#[command(
    name = "relay-server",
    about = "Routes binary envelopes between WebSocket peers and in-process hosts by identifier",
    version
)]
struct Cli {
    /// TCP port to listen on.
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// IP address to bind.  `0.0.0.0` accepts connections on every interface.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<String>,

    /// Base path WebSocket upgrades must target.
    #[arg(long, env = "RELAY_PATH")]
    path: Option<String>,

    /// TOML config file.  Missing files are treated as empty.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host identifier to register at startup.  May be repeated.
    #[arg(long = "host", value_name = "ID")]
    hosts: Vec<String>,

    /// Window in which host-set changes collapse into one presence broadcast.
    #[arg(long)]
    presence_debounce_ms: Option<u64>,

    /// Seconds between keepalive pings on each connection.
    #[arg(long)]
    ping_interval: Option<u64>,

    /// Largest inbound WebSocket message accepted, in bytes.
    #[arg(long)]
    max_frame_size: Option<usize>,
}

impl Cli {
    /// Merges the flags over `file` into a [`RelayConfig`] plus the list of
    /// hosts to attach.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address is not a valid IP address.
    fn into_relay_config(self, file: ConfigFile) -> anyhow::Result<(RelayConfig, Vec<String>)> {
        let bind = self.bind.unwrap_or(file.server.bind_host);
        let bind_ip: IpAddr = bind
            .parse()
            .with_context(|| format!("invalid bind address: '{bind}'"))?;

        let mut hosts = file.relay.hosts;
        for host in self.hosts {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }

        let config = RelayConfig {
            port: Some(self.port.unwrap_or(file.server.port)),
            bind_ip,
            path: self.path.unwrap_or(file.server.path),
            presence_debounce: Duration::from_millis(
                self.presence_debounce_ms
                    .unwrap_or(file.relay.presence_debounce_ms),
            ),
            ping_interval: Duration::from_secs(
                self.ping_interval
                    .unwrap_or(file.transport.ping_interval_secs),
            ),
            max_frame_size: self.max_frame_size.unwrap_or(file.transport.max_frame_size),
            event_capacity: file.relay.event_capacity,
        };
        Ok((config, hosts))
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };
    let (config, hosts) = cli.into_relay_config(file)?;

    info!(
        "relay starting on {}:{}{}",
        config.bind_ip,
        config.port.unwrap_or_default(),
        config.normalized_path()
    );

    let relay = Relay::new(config);

    for identifier in hosts {
        let endpoint = HostEndpoint::attach(&relay, identifier);
        tokio::spawn(log_host_traffic(endpoint));
    }

    let relay_for_signal = relay.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                relay_for_signal.destroy();
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(relay.clone(), None).await?;
    relay.destroyed().await;

    info!("relay stopped");
    Ok(())
}

/// Logs everything a startup host receives.  These hosts have no behaviour of
/// their own; they only make the identifier routable and visible in presence.
async fn log_host_traffic(mut endpoint: HostEndpoint) {
    while let Some(inbound) = endpoint.recv().await {
        match inbound {
            Inbound::Message { from, data } => info!(
                host = endpoint.identifier(),
                from = %from,
                len = data.len(),
                "message for host"
            ),
            Inbound::Connect(id) => debug!(host = endpoint.identifier(), client = %id, "client connected"),
            Inbound::Disconnect(id) => {
                debug!(host = endpoint.identifier(), client = %id, "client disconnected")
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
