//! Integration tests for the dev server.
//!
//! # Purpose
//!
//! These tests start a real [`DevServer`] on an ephemeral loopback port and
//! drive it with a tokio-tungstenite client playing the Flow Builder.  The
//! SDK side is played by the test itself: it watches the
//! [`TargetEnvRegistry`], attaches listeners to the registered environment,
//! and posts messages back through it.
//!
//! ```text
//! test client ──ws──► DevServer ──► SocketTargetEnv ──► test listeners
//!      ▲                                   │
//!      └─────────── post_builder_message ◄─┘
//! ```
//!
//! # Synchronising with the server
//!
//! Frames on one connection are handled in order, so a test that wants to
//! prove a frame had *no* effect sends a `userflow:marker` frame after it and
//! waits for the marker to arrive.  Anything the earlier frame would have
//! triggered has happened by then.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use image::{Rgba, RgbaImage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use userflow_dev_bridge::application::compositor::decode_data_url;
use userflow_dev_bridge::application::{
    CurrentEnv, Host, HostError, HostWindow, ListenerHandle, TargetEnv, TargetEnvError,
    TargetEnvRegistry,
};
use userflow_dev_bridge::domain::{CaptureRect, DevServerConfig, SdkMessage};
use userflow_dev_bridge::infrastructure::socket_env::OUTBOUND_QUEUE_CAPACITY;
use userflow_dev_bridge::infrastructure::DevServer;

const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Host window that counts show requests and captures solid blue.
struct RecordingWindow {
    shows: AtomicUsize,
    ratio: f64,
}

#[async_trait]
impl HostWindow for RecordingWindow {
    fn show(&self) -> Result<(), HostError> {
        self.shows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.ratio
    }

    async fn capture_page(&self, rect: CaptureRect) -> Result<RgbaImage, HostError> {
        let w = (f64::from(rect.width) * self.ratio) as u32;
        let h = (f64::from(rect.height) * self.ratio) as u32;
        Ok(RgbaImage::from_pixel(w, h, Rgba([0, 0, 255, 255])))
    }
}

struct RecordingHost {
    window: Arc<RecordingWindow>,
}

impl RecordingHost {
    fn shows(&self) -> usize {
        self.window.shows.load(Ordering::SeqCst)
    }
}

impl Host for RecordingHost {
    fn current_window(&self) -> Option<Arc<dyn HostWindow>> {
        Some(self.window.clone())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct Harness {
    server: DevServer,
    registry: Arc<TargetEnvRegistry>,
    host: Arc<RecordingHost>,
    changes: watch::Receiver<Option<CurrentEnv>>,
}

impl Harness {
    async fn start() -> Self {
        let host = Arc::new(RecordingHost {
            window: Arc::new(RecordingWindow {
                shows: AtomicUsize::new(0),
                ratio: 2.0,
            }),
        });
        let registry = TargetEnvRegistry::new();
        let changes = registry.subscribe();
        let config = DevServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..DevServerConfig::default()
        };
        let server = DevServer::start(config, host.clone(), Arc::clone(&registry))
            .await
            .expect("dev server must start on an ephemeral port");
        Self {
            server,
            registry,
            host,
            changes,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Connects a builder client and waits until its environment is registered.
    async fn connect(&mut self) -> (Client, CurrentEnv) {
        let (client, _response) = connect_async(format!("ws://{}", self.addr()))
            .await
            .expect("client must connect");
        let env = next_env(&mut self.changes).await;
        (client, env)
    }
}

async fn next_env(changes: &mut watch::Receiver<Option<CurrentEnv>>) -> CurrentEnv {
    timeout(WAIT, async {
        loop {
            changes.changed().await.expect("registry dropped");
            if let Some(current) = changes.borrow_and_update().clone() {
                return current;
            }
        }
    })
    .await
    .expect("no target environment was registered")
}

/// Attaches a listener that forwards every SDK message into a channel.
fn listen(env: &CurrentEnv) -> (mpsc::UnboundedReceiver<SdkMessage>, ListenerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = env.env().on_builder_message(Arc::new(move |msg: SdkMessage| {
        let _ = tx.send(msg);
    }));
    (rx, handle)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<SdkMessage>) -> SdkMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an SDK message")
        .expect("listener channel closed")
}

async fn send_text(client: &mut Client, text: &str) {
    client
        .send(Message::Text(text.to_string()))
        .await
        .expect("client send failed");
}

/// Next text frame from the server, skipping control frames.
async fn next_text(client: &mut Client) -> String {
    timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a text frame")
}

/// Reads until the server closes the connection.
async fn expect_closed(client: &mut Client) {
    timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("server did not close the connection");
}

// ── End-to-end scenarios ──────────────────────────────────────────────────────

/// The builder says hello, the SDK sees it verbatim, the SDK acks, and the
/// builder receives exactly the ack text.
#[tokio::test]
async fn test_hello_is_relayed_and_ack_reaches_builder() {
    // Arrange
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    // Act: builder → SDK
    send_text(&mut client, r#"{"kind":"userflow:hello","payload":1}"#).await;
    let hello = recv(&mut inbox).await;

    // Assert
    assert_eq!(hello.to_json().unwrap(), r#"{"kind":"userflow:hello","payload":1}"#);

    // Act: SDK → builder
    env.env()
        .post_builder_message(&SdkMessage::new("userflow:ack").unwrap())
        .unwrap();

    // Assert
    assert_eq!(next_text(&mut client).await, r#"{"kind":"userflow:ack"}"#);

    h.server.stop().await;
}

/// A show frame shows the host window once and reaches no SDK listener.
#[tokio::test]
async fn test_show_frame_shows_window_and_is_not_relayed() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    send_text(&mut client, r#"{"kind":"userflow-electron:show"}"#).await;
    send_text(&mut client, r#"{"kind":"userflow:marker"}"#).await;

    assert_eq!(recv(&mut inbox).await.kind(), "userflow:marker");
    assert!(inbox.try_recv().is_err());
    assert_eq!(h.host.shows(), 1);

    h.server.stop().await;
}

#[tokio::test]
async fn test_each_show_frame_shows_exactly_once() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    for _ in 0..3 {
        send_text(&mut client, r#"{"kind":"userflow-electron:show","extra":true}"#).await;
    }
    send_text(&mut client, r#"{"kind":"userflow:marker"}"#).await;
    recv(&mut inbox).await;

    assert_eq!(h.host.shows(), 3);
    h.server.stop().await;
}

#[tokio::test]
async fn test_frames_outside_both_namespaces_fire_nothing() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    send_text(&mut client, r#"{"kind":"analytics:track"}"#).await;
    send_text(&mut client, r#"{"kind":"userflowx:hello"}"#).await;
    send_text(&mut client, r#"{"kind":"userflow-electron:minimize"}"#).await;
    send_text(&mut client, r#"{"kind":"userflow:marker"}"#).await;

    assert_eq!(recv(&mut inbox).await.kind(), "userflow:marker");
    assert!(inbox.try_recv().is_err());
    assert_eq!(h.host.shows(), 0);

    h.server.stop().await;
}

/// Malformed frames are dropped; the session keeps working in both directions.
#[tokio::test]
async fn test_malformed_json_does_not_break_the_session() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    send_text(&mut client, "{oops").await;
    send_text(&mut client, r#"{"payload":"no kind"}"#).await;
    send_text(&mut client, "42").await;
    send_text(&mut client, r#"{"kind":"userflow:still-alive"}"#).await;

    assert_eq!(recv(&mut inbox).await.kind(), "userflow:still-alive");

    env.env()
        .post_builder_message(&SdkMessage::new("userflow:pong").unwrap())
        .unwrap();
    assert_eq!(next_text(&mut client).await, r#"{"kind":"userflow:pong"}"#);

    h.server.stop().await;
}

#[tokio::test]
async fn test_binary_utf8_frames_are_treated_as_text() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    client
        .send(Message::Binary(br#"{"kind":"userflow:bin"}"#.to_vec()))
        .await
        .unwrap();

    assert_eq!(recv(&mut inbox).await.kind(), "userflow:bin");
    h.server.stop().await;
}

#[tokio::test]
async fn test_sdk_messages_arrive_in_receipt_order() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut inbox, _handle) = listen(&env);

    for i in 0..25 {
        send_text(&mut client, &format!(r#"{{"kind":"userflow:seq","i":{i}}}"#)).await;
    }

    for i in 0..25 {
        let msg = recv(&mut inbox).await;
        assert_eq!(msg.get("i"), Some(&serde_json::json!(i)));
    }
    assert!(inbox.try_recv().is_err());

    h.server.stop().await;
}

// ── Listener deregistration ───────────────────────────────────────────────────

#[tokio::test]
async fn test_unsubscribed_listener_is_never_called_again() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let (mut removed, removed_handle) = listen(&env);
    let (mut kept, _kept_handle) = listen(&env);

    send_text(&mut client, r#"{"kind":"userflow:first"}"#).await;
    assert_eq!(recv(&mut removed).await.kind(), "userflow:first");
    assert_eq!(recv(&mut kept).await.kind(), "userflow:first");

    removed_handle.unsubscribe();
    removed_handle.unsubscribe();

    send_text(&mut client, r#"{"kind":"userflow:second"}"#).await;
    assert_eq!(recv(&mut kept).await.kind(), "userflow:second");
    assert!(removed.try_recv().is_err());

    h.server.stop().await;
}

// ── Adapter lifecycle ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_destroy_closes_the_builder_connection() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;

    env.env().destroy();
    env.env().destroy();

    expect_closed(&mut client).await;
    let err = env
        .env()
        .post_builder_message(&SdkMessage::new("userflow:late").unwrap())
        .unwrap_err();
    assert!(matches!(err, TargetEnvError::ConnectionClosed));

    h.server.stop().await;
}

#[tokio::test]
async fn test_builder_disconnect_deregisters_environment() {
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;

    client.close(None).await.unwrap();
    timeout(WAIT, h.changes.wait_for(Option::is_none))
        .await
        .expect("environment was not deregistered")
        .expect("registry dropped");

    assert!(h.registry.current().is_none());
    let err = env
        .env()
        .post_builder_message(&SdkMessage::new("userflow:gone").unwrap())
        .unwrap_err();
    assert!(matches!(err, TargetEnvError::ConnectionClosed));

    h.server.stop().await;
}

#[tokio::test]
async fn test_newest_connection_wins() {
    let mut h = Harness::start().await;
    let (mut first, first_env) = h.connect().await;
    let (mut second, second_env) = h.connect().await;

    // The old connection is closed; the new one is current.
    expect_closed(&mut first).await;
    assert_ne!(first_env.id(), second_env.id());
    assert_eq!(
        h.changes.borrow().as_ref().map(CurrentEnv::id),
        Some(second_env.id())
    );

    let (mut inbox, _handle) = listen(&second_env);
    send_text(&mut second, r#"{"kind":"userflow:from-second"}"#).await;
    assert_eq!(recv(&mut inbox).await.kind(), "userflow:from-second");

    h.server.stop().await;
}

#[tokio::test]
async fn test_capture_screenshot_through_connected_env() {
    let mut h = Harness::start().await;
    let (_client, env) = h.connect().await;

    let url = env
        .env()
        .capture_screenshot(CaptureRect::new(10, 10, 40, 25))
        .await
        .unwrap();

    let img = decode_data_url(&url).unwrap();
    assert_eq!(img.dimensions(), (80, 50));
    assert!(img.pixels().all(|p| *p == Rgba([0, 0, 255, 255])));

    h.server.stop().await;
}

// ── Server lifecycle ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_twice_is_safe_and_frees_the_port() {
    // Arrange
    let mut h = Harness::start().await;
    let addr = h.addr();

    // Act
    h.server.stop().await;
    h.server.stop().await;

    // Assert: the exact address can be bound again, and nobody answers on it
    let rebound = tokio::net::TcpListener::bind(addr).await;
    assert!(rebound.is_ok(), "port must be free after stop");
    drop(rebound);
    assert!(!h.server.is_running());
}

#[tokio::test]
async fn test_second_server_on_same_address_fails_to_start() {
    let mut h = Harness::start().await;

    let result = DevServer::start(
        DevServerConfig {
            bind_addr: h.addr(),
            ..DevServerConfig::default()
        },
        h.host.clone(),
        TargetEnvRegistry::new(),
    )
    .await;

    let err = result.err().expect("binding a taken port must fail");
    assert!(format!("{err:#}").contains("failed to bind"));

    h.server.stop().await;
}

#[tokio::test]
async fn test_stop_closes_active_sessions() {
    let mut h = Harness::start().await;
    let (mut client, _env) = h.connect().await;

    h.server.stop().await;

    expect_closed(&mut client).await;
    assert!(h.registry.current().is_none());
}

/// A builder that never reads must not pin memory or keep its socket open
/// past `stop`: the queue is bounded, and the stuck writer is torn down.
#[tokio::test(flavor = "current_thread")]
async fn test_stop_tears_down_session_whose_builder_stopped_reading() {
    // Arrange: frames far larger than loopback socket buffers can absorb
    let mut h = Harness::start().await;
    let (mut client, env) = h.connect().await;
    let bulk = SdkMessage::new("userflow:bulk")
        .unwrap()
        .with_field("payload", serde_json::Value::String("x".repeat(1 << 20)));

    // Act: the writer cannot run between these synchronous posts
    let mut accepted = 0;
    let mut rejection = None;
    for _ in 0..1000 {
        match env.env().post_builder_message(&bulk) {
            Ok(()) => accepted += 1,
            Err(e) => {
                rejection = Some(e);
                break;
            }
        }
    }

    // Assert: the queue refused the overflow
    assert_eq!(accepted, OUTBOUND_QUEUE_CAPACITY);
    assert!(matches!(rejection, Some(TargetEnvError::QueueFull)));

    // Act: stop while the writer is blocked on the unread socket
    timeout(WAIT, h.server.stop())
        .await
        .expect("stop must not hang on a stalled builder");

    // Assert: the connection ends after at most what the socket buffers held
    let received = timeout(WAIT, async {
        let mut received = 0;
        loop {
            match client.next().await {
                Some(Ok(Message::Text(_))) => received += 1,
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return received,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("connection must end once the server has stopped");
    assert!(
        received < accepted,
        "writer kept sending after stop: {received} of {accepted} frames arrived"
    );
}

#[tokio::test]
async fn test_separate_servers_keep_separate_registries() {
    let mut a = Harness::start().await;
    let mut b = Harness::start().await;

    let (_client, _env) = a.connect().await;

    assert!(a.registry.current().is_some());
    assert!(b.registry.current().is_none());

    a.server.stop().await;
    b.server.stop().await;
}
