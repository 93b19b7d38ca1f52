use std::{net::SocketAddr, time::Duration};

use anyhow::{ensure, Context};
use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the signaling listener to.
    #[arg(long, env = "BEACH_PIER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Frames buffered per connection before new ones are dropped.
    #[arg(long, env = "BEACH_PIER_OUTBOUND_BUFFER", default_value_t = 64)]
    pub outbound_buffer: usize,

    /// Interval between keep-alive pings sent to each peer.
    #[arg(long, env = "BEACH_PIER_PING_INTERVAL_SECS", default_value_t = 15)]
    pub ping_interval_secs: u64,

    /// Extra silence tolerated after a missed ping before the peer is dropped.
    #[arg(long, env = "BEACH_PIER_IDLE_TIMEOUT_SECS", default_value_t = 15)]
    pub idle_timeout_secs: u64,

    /// Largest inbound message accepted; transport default when unset.
    #[arg(long, env = "BEACH_PIER_MAX_MESSAGE_BYTES")]
    pub max_message_bytes: Option<usize>,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_PIER_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub outbound_buffer: usize,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub max_message_bytes: Option<usize>,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// How long a connection may stay silent, pongs included.
    pub fn read_timeout(&self) -> Duration {
        self.ping_interval + self.idle_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            outbound_buffer: 64,
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(15),
            max_message_bytes: None,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        ensure!(args.outbound_buffer > 0, "outbound buffer must be greater than zero");
        ensure!(args.ping_interval_secs > 0, "ping interval must be greater than zero");
        ensure!(args.idle_timeout_secs > 0, "idle timeout must be greater than zero");
        if let Some(limit) = args.max_message_bytes {
            ensure!(limit > 0, "max message size must be greater than zero");
        }

        Ok(ServerConfig {
            listen_addr,
            outbound_buffer: args.outbound_buffer,
            ping_interval: Duration::from_secs(args.ping_interval_secs),
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            max_message_bytes: args.max_message_bytes,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}
