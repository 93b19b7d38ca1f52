use std::{borrow::Cow, net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use metrics::counter;
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant},
};
use tracing::{debug, info, warn};

use crate::coordinator::{JoinOutcome, SignalingCoordinator};
use crate::registry::{ConnectionId, Outbound, PeerHandle};
use crate::server::AppState;

const REJECT_REASON: &str = "session full";

/// WebSocket upgrade handler for `/rtc`
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    let ws = match state.config.max_message_bytes {
        Some(limit) => ws.max_message_size(limit),
        None => ws,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let connection_id = ConnectionId::new();
    let (ws_tx, mut ws_rx) = socket.split();
    let (handle, rx) = PeerHandle::channel(connection_id, state.config.outbound_buffer);
    let mut writer = tokio::spawn(write_outbound(
        ws_tx,
        rx,
        state.config.ping_interval,
        connection_id,
    ));

    debug!(connection_id = %connection_id, remote_addr = %remote_addr, "websocket connected");

    if let JoinOutcome::Rejected = state.coordinator.on_connect(handle) {
        // The writer exits on its own once the close frame is out.
        if timeout(state.config.ping_interval, &mut writer).await.is_err() {
            writer.abort();
        }
        return;
    }

    let read_timeout = state.config.read_timeout();
    loop {
        let next = match timeout(read_timeout, ws_rx.next()).await {
            Ok(next) => next,
            Err(_) => {
                counter!("beach_pier_idle_disconnects_total").increment(1);
                info!(
                    connection_id = %connection_id,
                    silent_for = ?read_timeout,
                    "peer went silent; dropping connection"
                );
                break;
            }
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                warn!(connection_id = %connection_id, error = %err, "error receiving frame");
                break;
            }
            None => break,
        };

        match frame {
            Message::Text(text) => dispatch(&state.coordinator, connection_id, &text),
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => dispatch(&state.coordinator, connection_id, &text),
                Err(err) => {
                    debug!(
                        connection_id = %connection_id,
                        bytes = err.as_bytes().len(),
                        "ignoring non-UTF-8 binary frame"
                    );
                }
            },
            Message::Close(frame) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    state.coordinator.on_disconnect(connection_id);
    writer.abort();

    debug!(connection_id = %connection_id, "websocket disconnected");
}

fn dispatch(coordinator: &SignalingCoordinator, connection_id: ConnectionId, text: &str) {
    match coordinator.on_message(connection_id, text) {
        Ok(outcome) => debug!(connection_id = %connection_id, ?outcome, "signaling message handled"),
        Err(violation) => warn!(
            connection_id = %connection_id,
            error = %violation,
            "dropping out-of-order signaling message"
        ),
    }
}

/// Drain a connection's outbound queue into its socket, pinging on the side.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    ping_interval: Duration,
    connection_id: ConnectionId,
) {
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: Cow::Borrowed(REJECT_REASON),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(connection_id = %connection_id, "writer task finished");
}
