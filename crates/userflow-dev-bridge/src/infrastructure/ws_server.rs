//! WebSocket dev server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured loopback address.
//! 2. Accepting connections from the Flow Builder and upgrading them to
//!    WebSocket sessions.
//! 3. Creating one [`SocketTargetEnv`] per session and registering it as the
//!    SDK's current target environment.
//! 4. Reading frames in order: `userflow-electron:show` shows the host window,
//!    `userflow:*` messages go to the environment's listeners, everything
//!    else is dropped.
//! 5. Shutting everything down when [`DevServer::stop`] is called.
//!
//! # Session lifetime
//!
//! A session ends when the builder disconnects, when the SDK destroys the
//! environment (or a newer connection replaces it), or when the server stops.
//! In every case the environment is destroyed and deregistered, and the
//! writer task gets a short grace period to send its Close frame.  A writer
//! stuck on a builder that stopped reading is aborted, which drops the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::host::Host;
use crate::application::registry::TargetEnvRegistry;
use crate::application::target_env::TargetEnv;
use crate::domain::config::DevServerConfig;
use crate::domain::messages::{decode_frame, BuilderMessage};
use crate::infrastructure::socket_env::{wait_until_set, write_outbound, SocketTargetEnv};

/// How long a closing session waits for its writer to flush the Close frame.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long [`DevServer::stop`] waits for sessions before aborting them.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Collaborators shared by every session of one server.
struct SessionContext {
    config: DevServerConfig,
    host: Arc<dyn Host>,
    registry: Arc<TargetEnvRegistry>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// A running dev server.
///
/// Owning the value is owning the listening socket: there is no global
/// instance.  Call [`DevServer::stop`] to close it; dropping the value also
/// signals shutdown but does not wait for it.
pub struct DevServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl DevServer {
    /// Binds `config.bind_addr` and starts accepting builder connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound, e.g. because another
    /// dev server (or anything else) already holds the port.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use userflow_dev_bridge::application::TargetEnvRegistry;
    /// use userflow_dev_bridge::domain::DevServerConfig;
    /// use userflow_dev_bridge::infrastructure::{DevServer, StaticHost};
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let registry = TargetEnvRegistry::new();
    /// let host = Arc::new(StaticHost::new(None, 1.0));
    /// let mut server = DevServer::start(DevServerConfig::default(), host, registry).await?;
    /// server.stop().await;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start(
        config: DevServerConfig,
        host: Arc<dyn Host>,
        registry: Arc<TargetEnvRegistry>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind dev server on {}", config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read dev server local address")?;

        info!("userflow dev server listening on ws://{local_addr}");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(SessionContext {
            config,
            host,
            registry,
        });
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            accept_task: Some(accept_task),
        })
    }

    /// The address actually bound (useful when the configured port was 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Closes the listener and every open session.
    ///
    /// When this returns the port is free again.  Calling `stop` on a server
    /// that is already stopped does nothing.
    pub async fn stop(&mut self) {
        let Some(accept_task) = self.accept_task.take() else {
            debug!("dev server on {} already stopped", self.local_addr);
            return;
        };
        self.shutdown.send_replace(true);
        if let Err(e) = accept_task.await {
            error!("dev server accept task failed: {e}");
        }
        info!("userflow dev server on {} stopped", self.local_addr);
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = wait_until_set(&mut shutdown) => {
                info!("shutdown requested; stopping accept loop");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    info!("new builder connection from {peer_addr}");
                    sessions.spawn(handle_builder_session(
                        stream,
                        peer_addr,
                        Arc::clone(&ctx),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    // Transient accept error (e.g., too many open file descriptors).
                    error!("accept error: {e}");
                }
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    // Free the port before waiting on sessions.
    drop(listener);

    let drained = timeout(SESSION_DRAIN_TIMEOUT, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("sessions did not close within {SESSION_DRAIN_TIMEOUT:?}; aborting them");
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

/// Wraps [`run_session`] and logs the outcome.
async fn handle_builder_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    ctx: Arc<SessionContext>,
    shutdown: watch::Receiver<bool>,
) {
    let session_id = Uuid::new_v4();
    match run_session(raw_stream, peer_addr, session_id, ctx, shutdown).await {
        Ok(()) => info!("session {session_id} ({peer_addr}) closed"),
        Err(e) => warn!("session {session_id} ({peer_addr}) closed with error: {e:#}"),
    }
}

/// Runs one builder connection from handshake to close.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.  Everything after the
/// handshake is logged and ends the session normally.
async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    session_id: Uuid,
    ctx: Arc<SessionContext>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    info!("session {session_id}: WebSocket established with {peer_addr}");

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (env, outbound) = SocketTargetEnv::new(
        session_id,
        Arc::clone(&ctx.host),
        ctx.config.capture_timeout,
    );
    // Dropping the set aborts the writer, so it never outlives the session.
    let mut writer = JoinSet::new();
    writer.spawn(write_outbound(ws_tx, outbound, session_id));
    let mut destroyed = env.destroyed_signal();

    let registration = ctx.registry.register(env.clone());
    debug!(
        "session {session_id}: registered as target env #{}",
        registration.id()
    );

    loop {
        let next = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = wait_until_set(&mut destroyed) => {
                debug!("session {session_id}: environment destroyed; closing");
                break;
            }
            _ = wait_until_set(&mut shutdown) => {
                debug!("session {session_id}: server stopping; closing");
                break;
            }
        };

        let ws_msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("session {session_id}: builder WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("session {session_id}: builder WebSocket error: {e}");
                break;
            }
            None => {
                debug!("session {session_id}: builder stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(text) => handle_frame(&text, &env, ctx.host.as_ref()),
            WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => handle_frame(&text, &env, ctx.host.as_ref()),
                Err(_) => warn!("session {session_id}: non-UTF-8 binary frame (ignored)"),
            },
            WsMessage::Ping(data) => {
                // tokio-tungstenite queues the Pong reply itself.
                debug!("session {session_id}: WebSocket ping ({} bytes)", data.len());
            }
            WsMessage::Pong(_) => {
                debug!("session {session_id}: WebSocket pong received");
            }
            WsMessage::Close(_) => {
                debug!("session {session_id}: WebSocket Close frame received");
                break;
            }
            WsMessage::Frame(_) => {
                debug!("session {session_id}: raw frame (ignored)");
            }
        }
    }

    env.destroy();
    registration.deregister();
    if timeout(WRITER_DRAIN_TIMEOUT, writer.join_next()).await.is_err() {
        debug!("session {session_id}: writer did not finish in time; aborting it");
        writer.abort_all();
        while writer.join_next().await.is_some() {}
    }
    Ok(())
}

/// Decodes one text frame and routes it.
///
/// Never fails: protocol errors are logged and the frame is dropped, so one
/// bad frame cannot end the session.
fn handle_frame(text: &str, env: &SocketTargetEnv, host: &dyn Host) {
    let session_id = env.session_id();
    match decode_frame(text) {
        Ok(BuilderMessage::Show) => show_host_window(host, session_id),
        Ok(BuilderMessage::Sdk(message)) => {
            let delivered = env.deliver(&message);
            debug!(
                "session {session_id}: builder → sdk: {} ({delivered} listeners)",
                message.kind()
            );
        }
        Ok(BuilderMessage::UnknownControl { kind }) => {
            debug!("session {session_id}: unknown control message {kind} (ignored)");
        }
        Ok(BuilderMessage::Foreign { kind }) => {
            debug!("session {session_id}: message outside userflow namespaces: {kind} (ignored)");
        }
        Err(e) => {
            warn!("session {session_id}: dropping malformed frame: {e}");
        }
    }
}

fn show_host_window(host: &dyn Host, session_id: Uuid) {
    match host.current_window() {
        Some(window) => match window.show() {
            Ok(()) => info!("session {session_id}: host window shown"),
            Err(e) => warn!("session {session_id}: {e}"),
        },
        None => warn!("session {session_id}: show requested but the host has no window"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
