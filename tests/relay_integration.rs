//! End-to-end relay tests
//!
//! Each test binds the real router on an ephemeral port and drives it with
//! WebSocket clients, so auth, registration, fan-out and close handling are
//! exercised exactly as a deployed relay runs them.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use ws_relay::config::Settings;
use ws_relay::server::{serve_listener, AppState};
use ws_relay::shutdown::GracefulShutdown;

const TOKEN: &str = "supersecret123";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(200);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

impl TestServer {
    async fn start(settings: Settings) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(settings);

        let server_state = state.clone();
        tokio::spawn(async move {
            serve_listener(listener, server_state, std::future::pending())
                .await
                .unwrap();
        });

        Self { addr, state }
    }

    async fn with_defaults() -> Self {
        Self::start(Settings::with_token(TOKEN)).await
    }

    async fn connect(&self, token: &str) -> Client {
        let url = format!("ws://{}/ws?token={}", self.addr, token);
        let (client, _) = connect_async(url).await.unwrap();
        client
    }

    /// Connect with the right token and wait until the registry has `expected` members
    async fn connect_registered(&self, expected: usize) -> Client {
        let client = self.connect(TOKEN).await;
        self.wait_for_connections(expected).await;
        client
    }

    fn registered(&self) -> usize {
        self.state.connection_manager.len()
    }

    async fn wait_for_connections(&self, expected: usize) {
        let manager = self.state.connection_manager.clone();
        tokio::time::timeout(RECV_TIMEOUT, async move {
            while manager.len() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "registry never reached {} members (has {})",
                expected,
                self.registered()
            )
        });
    }
}

/// Next text frame, skipping control frames
async fn recv_text(client: &mut Client) -> String {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for text frame")
}

/// Next frame must be a close frame; returns its code
async fn recv_close_code(client: &mut Client) -> CloseCode {
    let frame = tokio::time::timeout(RECV_TIMEOUT, client.next())
        .await
        .expect("timed out waiting for close frame");

    match frame {
        Some(Ok(Message::Close(Some(frame)))) => frame.code,
        other => panic!("expected close frame, got {:?}", other),
    }
}

async fn assert_no_message(client: &mut Client) {
    if let Ok(frame) = tokio::time::timeout(QUIET_PERIOD, client.next()).await {
        panic!("expected no frame, got {:?}", frame);
    }
}

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn test_wrong_token_closed_with_policy_violation() {
        let server = TestServer::with_defaults().await;

        let mut client = server.connect("wrong").await;

        assert_eq!(recv_close_code(&mut client).await, CloseCode::Policy);
        assert_eq!(server.registered(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_closed_with_policy_violation() {
        let server = TestServer::with_defaults().await;

        let url = format!("ws://{}/ws", server.addr);
        let (mut client, _) = connect_async(url).await.unwrap();

        assert_eq!(recv_close_code(&mut client).await, CloseCode::Policy);
        assert_eq!(server.registered(), 0);
    }

    #[tokio::test]
    async fn test_repeated_token_param_closed_with_policy_violation() {
        let server = TestServer::with_defaults().await;

        let url = format!("ws://{}/ws?token=wrong&token={}", server.addr, TOKEN);
        let (mut client, _) = connect_async(url).await.unwrap();

        assert_eq!(recv_close_code(&mut client).await, CloseCode::Policy);
        assert_eq!(server.registered(), 0);
    }

    #[tokio::test]
    async fn test_rejected_client_never_receives_broadcasts() {
        let server = TestServer::with_defaults().await;
        let mut a = server.connect_registered(1).await;
        let mut rejected = server.connect("wrong").await;

        a.send(Message::text("secret")).await.unwrap();
        assert_eq!(recv_text(&mut a).await, "secret");

        assert_eq!(recv_close_code(&mut rejected).await, CloseCode::Policy);
        assert_eq!(server.registered(), 1);
    }
}

mod relay_tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_world_scenario() {
        let server = TestServer::with_defaults().await;

        // A is accepted
        let mut a = server.connect_registered(1).await;

        // B is refused
        let mut b = server.connect("wrong").await;
        assert_eq!(recv_close_code(&mut b).await, CloseCode::Policy);

        // A alone: the broadcast echoes back to A
        a.send(Message::text("hello")).await.unwrap();
        assert_eq!(recv_text(&mut a).await, "hello");

        // C joins; both A and C receive "world"
        let mut c = server.connect_registered(2).await;
        a.send(Message::text("world")).await.unwrap();
        assert_eq!(recv_text(&mut a).await, "world");
        assert_eq!(recv_text(&mut c).await, "world");

        assert_eq!(server.registered(), 2);
    }

    #[tokio::test]
    async fn test_each_peer_receives_exactly_once() {
        let server = TestServer::with_defaults().await;
        let mut sender = server.connect_registered(1).await;
        let mut peers = Vec::new();
        for n in 2..=4 {
            peers.push(server.connect_registered(n).await);
        }

        sender.send(Message::text("fan-out")).await.unwrap();

        assert_eq!(recv_text(&mut sender).await, "fan-out");
        for peer in peers.iter_mut() {
            assert_eq!(recv_text(peer).await, "fan-out");
            assert_no_message(peer).await;
        }
    }

    #[tokio::test]
    async fn test_payload_is_relayed_verbatim() {
        let server = TestServer::with_defaults().await;
        let mut a = server.connect_registered(1).await;
        let mut b = server.connect_registered(2).await;

        let payload = r#"{"not":"parsed"} ünïcödé ✓"#;
        b.send(Message::text(payload)).await.unwrap();

        assert_eq!(recv_text(&mut a).await, payload);
        assert_eq!(recv_text(&mut b).await, payload);
    }

    #[tokio::test]
    async fn test_echo_disabled() {
        let mut settings = Settings::with_token(TOKEN);
        settings.relay.echo_to_sender = false;
        let server = TestServer::start(settings).await;

        let mut a = server.connect_registered(1).await;
        let mut c = server.connect_registered(2).await;

        a.send(Message::text("only for others")).await.unwrap();

        assert_eq!(recv_text(&mut c).await, "only for others");
        assert_no_message(&mut a).await;
    }
}

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_frame_unregisters() {
        let server = TestServer::with_defaults().await;
        let mut a = server.connect_registered(1).await;
        let mut b = server.connect_registered(2).await;

        b.close(None).await.unwrap();
        server.wait_for_connections(1).await;

        a.send(Message::text("still here")).await.unwrap();
        assert_eq!(recv_text(&mut a).await, "still here");
    }

    #[tokio::test]
    async fn test_dropped_socket_unregisters() {
        let server = TestServer::with_defaults().await;
        let mut a = server.connect_registered(1).await;
        let b = server.connect_registered(2).await;

        drop(b);
        server.wait_for_connections(1).await;

        a.send(Message::text("after drop")).await.unwrap();
        assert_eq!(recv_text(&mut a).await, "after drop");
        assert_eq!(server.state.broadcaster.stats().total_failed, 0);
    }

    #[tokio::test]
    async fn test_binary_frame_closes_connection() {
        let server = TestServer::with_defaults().await;
        let mut a = server.connect_registered(1).await;

        a.send(Message::binary(vec![0u8, 1, 2])).await.unwrap();

        assert_eq!(recv_close_code(&mut a).await, CloseCode::Unsupported);
        server.wait_for_connections(0).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients_with_going_away() {
        let server = TestServer::with_defaults().await;
        let mut a = server.connect_registered(1).await;
        let mut b = server.connect_registered(2).await;

        let shutdown = GracefulShutdown::new(
            server.state.connection_manager.clone(),
            Duration::from_secs(2),
        );
        let result = shutdown.execute("test shutdown").await;

        assert_eq!(result.connections_signalled, 2);
        assert_eq!(result.remaining, 0);
        assert_eq!(recv_close_code(&mut a).await, CloseCode::Away);
        assert_eq!(recv_close_code(&mut b).await, CloseCode::Away);
    }
}
