//! [`TargetEnv`] backed by one builder WebSocket connection.
//!
//! The adapter never touches the socket directly.  Outbound frames go through
//! a bounded channel to the session's writer task ([`write_outbound`]), and
//! inbound SDK messages are pushed in by the session's reader loop via
//! [`SocketTargetEnv::deliver`].  A `watch` flag marks the adapter destroyed;
//! the writer, the reader loop and pending captures all observe it.
//!
//! ```text
//!            post_builder_message ──► mpsc ──► writer task ──► WebSocket
//! SDK ◄── listeners ◄── deliver ◄── reader loop ◄───────────── WebSocket
//!            destroy ──► watch(true) ──► writer sends Close, captures abort
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::compositor::{capture_composited, CaptureError};
use crate::application::host::Host;
use crate::application::target_env::{
    BuilderListener, ListenerHandle, ListenerSet, TargetEnv, TargetEnvError,
};
use crate::domain::{CaptureRect, SdkMessage};

/// Frames the SDK may queue ahead of the writer before posting fails with
/// [`TargetEnvError::QueueFull`].
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// Resolves once `flag` is `true`, or once its sender is gone.
pub(crate) async fn wait_until_set(flag: &mut watch::Receiver<bool>) {
    // The guard returned by `wait_for` must not live across the caller's
    // next await, so it is dropped here.
    let _ = flag.wait_for(|set| *set).await;
}

/// Receiving side of a [`SocketTargetEnv`], consumed by the writer task.
pub struct OutboundQueue {
    frames: mpsc::Receiver<String>,
    closed: watch::Receiver<bool>,
}

/// The SDK's view of one connected Flow Builder.
pub struct SocketTargetEnv {
    session_id: Uuid,
    outbound: mpsc::Sender<String>,
    closed: watch::Sender<bool>,
    listeners: Arc<ListenerSet>,
    host: Arc<dyn Host>,
    capture_timeout: Duration,
}

impl SocketTargetEnv {
    /// Creates an adapter and the queue its writer task drains.
    pub fn new(
        session_id: Uuid,
        host: Arc<dyn Host>,
        capture_timeout: Duration,
    ) -> (Arc<Self>, OutboundQueue) {
        let (outbound, frames) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (closed, closed_rx) = watch::channel(false);
        let env = Arc::new(Self {
            session_id,
            outbound,
            closed,
            listeners: ListenerSet::new(),
            host,
            capture_timeout,
        });
        (
            env,
            OutboundQueue {
                frames,
                closed: closed_rx,
            },
        )
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn is_destroyed(&self) -> bool {
        *self.closed.borrow()
    }

    /// A receiver that flips to `true` when the adapter is destroyed.
    pub fn destroyed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Hands an inbound SDK message to the registered listeners.
    ///
    /// Returns the number of listeners called; always 0 once destroyed.
    pub fn deliver(&self, message: &SdkMessage) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        self.listeners.dispatch(message)
    }
}

#[async_trait]
impl TargetEnv for SocketTargetEnv {
    fn destroy(&self) {
        let was_destroyed = self.closed.send_replace(true);
        if !was_destroyed {
            info!("session {}: target environment destroyed", self.session_id);
        }
        self.listeners.clear();
    }

    fn post_builder_message(&self, message: &SdkMessage) -> Result<(), TargetEnvError> {
        if self.is_destroyed() {
            return Err(TargetEnvError::ConnectionClosed);
        }
        let text = message.to_json()?;
        debug!("session {}: sdk → builder: {}", self.session_id, message.kind());
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => TargetEnvError::QueueFull,
            TrySendError::Closed(_) => TargetEnvError::ConnectionClosed,
        })
    }

    fn on_builder_message(&self, listener: BuilderListener) -> ListenerHandle {
        self.listeners.subscribe(listener)
    }

    async fn capture_screenshot(&self, rect: CaptureRect) -> Result<String, CaptureError> {
        let mut destroyed = self.closed.subscribe();
        let already_destroyed = *destroyed.borrow();
        if already_destroyed {
            return Err(CaptureError::Destroyed);
        }

        let capture = timeout(
            self.capture_timeout,
            capture_composited(self.host.as_ref(), rect),
        );
        tokio::select! {
            result = capture => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(CaptureError::TimedOut(self.capture_timeout)),
            },
            _ = wait_until_set(&mut destroyed) => {
                debug!("session {}: capture abandoned, environment destroyed", self.session_id);
                Err(CaptureError::Destroyed)
            }
        }
    }
}

/// Drains `queue` into the WebSocket sink until the adapter is destroyed or
/// the peer goes away.
///
/// Frames queued before the destroy signal are flushed, then a Close frame is
/// sent.
pub async fn write_outbound<S>(mut sink: S, queue: OutboundQueue, session_id: Uuid)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let OutboundQueue {
        mut frames,
        mut closed,
    } = queue;

    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        debug!("session {session_id}: WebSocket send failed (builder disconnected): {e}");
                        return;
                    }
                }
                None => break,
            },
            _ = wait_until_set(&mut closed) => break,
        }
    }

    while let Ok(text) = frames.try_recv() {
        if sink.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }
    if let Err(e) = sink.send(WsMessage::Close(None)).await {
        debug!("session {session_id}: Close frame not sent: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
