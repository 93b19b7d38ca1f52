use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, timeout_at, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::config::ServeArgs;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "beach-pier",
    author,
    version,
    about = "Two-party WebRTC signaling relay and peer client",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server options, used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a running relay as a peer and print everything it sends back
    Peer(PeerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PeerArgs {
    /// Signaling endpoint (e.g., ws://localhost:8080/rtc)
    #[arg(short, long, default_value = "ws://localhost:8080/rtc")]
    pub url: String,

    /// Line to send after connecting, e.g. "STATE" or "ICE candidate:..."; repeatable
    #[arg(short, long = "send")]
    pub send: Vec<String>,

    /// Seconds to keep listening before disconnecting
    #[arg(short, long, default_value_t = 5)]
    pub wait_secs: u64,
}

pub async fn run_peer_client(args: PeerArgs) -> Result<()> {
    for line in collect_transcript(&args).await? {
        println!("{line}");
    }
    Ok(())
}

/// Connect, send the configured lines in order, and gather every text frame
/// received until the wait elapses or the relay closes the connection.
pub async fn collect_transcript(args: &PeerArgs) -> Result<Vec<String>> {
    debug!("Connecting to {}", args.url);

    let (ws_stream, _) = match timeout(CONNECT_TIMEOUT, connect_async(args.url.as_str())).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", args.url, e);
            return Err(anyhow::anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after {:?}", CONNECT_TIMEOUT);
            return Err(anyhow::anyhow!(
                "Connection timeout - is the signaling server running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    for line in &args.send {
        write
            .send(Message::Text(line.clone().into()))
            .await
            .with_context(|| format!("failed to send {line:?}"))?;
    }

    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    let mut transcript = Vec::new();
    while let Ok(next) = timeout_at(deadline, read.next()).await {
        match next {
            Some(Ok(Message::Text(text))) => transcript.push(text.as_str().to_owned()),
            Some(Ok(Message::Close(frame))) => {
                debug!("Relay closed the connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("websocket error"),
            None => break,
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(transcript)
}
