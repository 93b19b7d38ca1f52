use std::{net::SocketAddr, sync::OnceLock, time::Duration};

use beach_pier::{
    config::ServerConfig,
    coordinator::SessionSnapshot,
    server::{self, AppState},
    session::SessionPhase,
};
use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_relay(config: ServerConfig) -> (SocketAddr, AppState) {
    start_relay_with_metrics(config, None).await
}

async fn start_relay_with_metrics(
    config: ServerConfig,
    metrics: Option<PrometheusHandle>,
) -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState::new(config, metrics);
    tokio::spawn(server::serve(
        listener,
        state.clone(),
        std::future::pending::<()>(),
    ));
    (addr, state)
}

struct Peer {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let (socket, _) = connect_async(format!("ws://{addr}/rtc")).await.unwrap();
        Self { socket }
    }

    /// Connect and consume the acknowledgment plus the first state broadcast.
    async fn join(addr: SocketAddr) -> (Self, String) {
        let mut peer = Self::connect(addr).await;
        let ack = peer.next_text().await;
        assert!(ack.starts_with("Added as a client: "), "unexpected ack {ack:?}");
        let state = peer.next_text().await;
        (peer, state)
    }

    async fn send(&mut self, text: &str) {
        self.socket.send(Message::text(text.to_owned())).await.unwrap();
    }

    async fn next_frame(&mut self) -> Option<Message> {
        loop {
            let next = timeout(STEP_TIMEOUT, self.socket.next())
                .await
                .expect("timed out waiting for a frame");
            match next {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(message)) => return Some(message),
                Some(Err(_)) | None => return None,
            }
        }
    }

    async fn next_text(&mut self) -> String {
        match self.next_frame().await {
            Some(Message::Text(text)) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    async fn close_frame(&mut self) -> Option<CloseFrame> {
        match self.next_frame().await {
            Some(Message::Close(frame)) => frame,
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    async fn close(mut self) {
        let _ = self.socket.close(None).await;
    }
}

async fn ready_pair(addr: SocketAddr) -> (Peer, Peer) {
    let (mut first, state) = Peer::join(addr).await;
    assert_eq!(state, "STATE Impossible");
    let (second, state) = Peer::join(addr).await;
    assert_eq!(state, "STATE Ready");
    assert_eq!(first.next_text().await, "STATE Ready");
    (first, second)
}

async fn negotiate(first: &mut Peer, second: &mut Peer) {
    first.send("OFFER xyz").await;
    assert_eq!(first.next_text().await, "STATE Creating");
    assert_eq!(second.next_text().await, "STATE Creating");
    assert_eq!(second.next_text().await, "OFFER xyz");

    second.send("ANSWER abc").await;
    assert_eq!(first.next_text().await, "ANSWER abc");
    assert_eq!(first.next_text().await, "STATE Active");
    assert_eq!(second.next_text().await, "STATE Active");
}

/// The recorder is process-wide, so every test in this binary shares it.
fn prometheus_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| PrometheusBuilder::new().install_recorder().unwrap())
        .clone()
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    timeout(STEP_TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[test_timeout::tokio_timeout_test(30)]
async fn two_peers_negotiate_a_session() {
    let (addr, state) = start_relay(ServerConfig::default()).await;
    let (mut first, mut second) = ready_pair(addr).await;

    negotiate(&mut first, &mut second).await;

    first.send("ICE cand1").await;
    assert_eq!(second.next_text().await, "ICE cand1");
    second.send("ice cand2 with spaces").await;
    assert_eq!(first.next_text().await, "ice cand2 with spaces");

    assert_eq!(
        state.coordinator.snapshot(),
        SessionSnapshot {
            state: SessionPhase::Active,
            peers: 2
        }
    );
}

#[test_timeout::tokio_timeout_test(30)]
async fn third_peer_is_turned_away() {
    let (addr, state) = start_relay(ServerConfig::default()).await;
    let (mut first, mut second) = ready_pair(addr).await;
    negotiate(&mut first, &mut second).await;

    let mut third = Peer::connect(addr).await;
    let frame = third.close_frame().await.expect("close frame");
    assert_eq!(frame.code, CloseCode::Policy);

    // The next frame each peer sees is the reply to its own request.
    first.send("STATE").await;
    assert_eq!(first.next_text().await, "STATE Active");
    second.send("STATE").await;
    assert_eq!(second.next_text().await, "STATE Active");
    assert_eq!(state.coordinator.snapshot().peers, 2);
}

#[test_timeout::tokio_timeout_test(30)]
async fn disconnect_resets_the_remaining_peer() {
    let (addr, state) = start_relay(ServerConfig::default()).await;
    let (mut first, mut second) = ready_pair(addr).await;
    negotiate(&mut first, &mut second).await;

    first.close().await;
    assert_eq!(second.next_text().await, "STATE Impossible");
    assert_eq!(
        state.coordinator.snapshot(),
        SessionSnapshot {
            state: SessionPhase::Impossible,
            peers: 1
        }
    );

    let (_replacement, replacement_state) = Peer::join(addr).await;
    assert_eq!(replacement_state, "STATE Ready");
    assert_eq!(second.next_text().await, "STATE Ready");
}

#[test_timeout::tokio_timeout_test(30)]
async fn bad_messages_are_dropped_without_closing() {
    let (addr, _state) = start_relay(ServerConfig::default()).await;
    let (mut first, mut second) = ready_pair(addr).await;

    first.send("ANSWER too-early").await;
    first.send("HELLO relay").await;
    first.send("STATE").await;
    assert_eq!(first.next_text().await, "STATE Ready");

    first
        .socket
        .send(Message::binary(b"ICE from-binary".to_vec()))
        .await
        .unwrap();
    assert_eq!(second.next_text().await, "ICE from-binary");

    second.send("offer late-but-valid").await;
    assert_eq!(second.next_text().await, "STATE Creating");
    assert_eq!(first.next_text().await, "STATE Creating");
    assert_eq!(first.next_text().await, "offer late-but-valid");
}

#[test_timeout::tokio_timeout_test(30)]
async fn silent_peer_is_dropped_after_idle_timeout() {
    let config = ServerConfig {
        ping_interval: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(1),
        ..ServerConfig::default()
    };
    let (addr, _state) = start_relay(config).await;
    let (first, mut second) = ready_pair(addr).await;

    // `first` never polls its socket again, so it never answers pings.
    assert_eq!(second.next_text().await, "STATE Impossible");
    drop(first);
}

#[test_timeout::tokio_timeout_test(30)]
async fn http_endpoints_report_relay_status() {
    let (addr, _state) = start_relay(ServerConfig::default()).await;

    let greeting = http_get(addr, "/").await;
    assert!(greeting.starts_with("HTTP/1.1 200"));
    assert!(greeting.ends_with("Hello from WebRTC signaling server"));

    let health = http_get(addr, "/healthz").await;
    assert!(health.contains(r#"{"status":"ok"}"#));

    let (_peer, _) = Peer::join(addr).await;
    let stats = http_get(addr, "/debug/stats").await;
    assert!(stats.contains(r#"{"state":"Impossible","peers":1}"#), "{stats}");

    let metrics = http_get(addr, "/metrics").await;
    assert!(metrics.starts_with("HTTP/1.1 404"), "relay started without a recorder");
}

#[test_timeout::tokio_timeout_test(30)]
async fn metrics_endpoint_renders_relay_counters() {
    let (addr, _state) =
        start_relay_with_metrics(ServerConfig::default(), Some(prometheus_handle())).await;
    let (mut first, mut second) = ready_pair(addr).await;
    first.send("ICE cand1").await;
    assert_eq!(second.next_text().await, "ICE cand1");

    let metrics = http_get(addr, "/metrics").await;
    assert!(metrics.starts_with("HTTP/1.1 200"), "{metrics}");
    assert!(metrics.contains("beach_pier_joins_total"), "{metrics}");
    assert!(metrics.contains("beach_pier_peers_connected"), "{metrics}");
    assert!(
        metrics.contains(r#"beach_pier_messages_relayed_total{kind="ICE"}"#),
        "{metrics}"
    );
}

#[test_timeout::tokio_timeout_test(30)]
async fn undecodable_binary_frames_are_ignored() {
    let (addr, _state) = start_relay(ServerConfig::default()).await;
    let (mut first, mut second) = ready_pair(addr).await;

    first
        .socket
        .send(Message::binary(vec![0xff, 0xfe, 0x00, 0x9f]))
        .await
        .unwrap();

    // The connection survives and the invalid frame never reaches the other peer.
    first.send("STATE").await;
    assert_eq!(first.next_text().await, "STATE Ready");
    first.send("ICE after-binary").await;
    assert_eq!(second.next_text().await, "ICE after-binary");
}
