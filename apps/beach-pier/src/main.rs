use anyhow::Result;
use clap::Parser;
use tracing::info;

use beach_pier::{
    cli::{self, Cli, Commands},
    config::ServerConfig,
    server,
    telemetry::{self, Telemetry},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Peer(args)) = cli.command {
        telemetry::init_client_logging()?;
        return cli::run_peer_client(args).await;
    }

    let telemetry = Telemetry::init()?;
    let config = ServerConfig::try_from(cli.serve)?;
    info!(
        listen_addr = %config.listen_addr,
        outbound_buffer = config.outbound_buffer,
        ping_interval_secs = config.ping_interval.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "starting beach-pier signaling relay"
    );

    server::run(config, Some(telemetry.metrics_handle())).await
}
