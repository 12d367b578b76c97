//! The SDK's target-environment capability set.
//!
//! The embedded Userflow SDK normally runs against a real end-user
//! environment.  In dev mode it runs against a [`TargetEnv`] instead: an
//! object that relays builder messages, accepts messages from the SDK, and
//! answers screenshot requests.
//!
//! [`ListenerSet`] is the listener bookkeeping every implementation needs for
//! `on_builder_message`.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use thiserror::Error;

use crate::application::compositor::CaptureError;
use crate::domain::{CaptureRect, SdkMessage};

/// Callback receiving SDK protocol messages from the builder.
pub type BuilderListener = Arc<dyn Fn(SdkMessage) + Send + Sync>;

/// Errors returned when the SDK tries to talk to the builder.
#[derive(Debug, Error)]
pub enum TargetEnvError {
    /// The builder connection is closed or the environment was destroyed.
    #[error("builder connection is closed")]
    ConnectionClosed,

    /// The builder is not reading; too many frames are already queued.
    #[error("outbound queue to the builder is full")]
    QueueFull,

    /// The message could not be serialized.
    #[error("failed to serialize builder message: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What the SDK needs from the environment it runs in.
#[async_trait]
pub trait TargetEnv: Send + Sync {
    /// Tears the environment down and closes its builder connection.
    ///
    /// Calling it more than once is a no-op.
    fn destroy(&self);

    /// Sends an SDK message to the builder.
    ///
    /// # Errors
    ///
    /// [`TargetEnvError::ConnectionClosed`] once the connection is gone,
    /// [`TargetEnvError::QueueFull`] when the builder has stopped reading.
    fn post_builder_message(&self, message: &SdkMessage) -> Result<(), TargetEnvError>;

    /// Registers `listener` for every inbound `userflow:*` message.
    ///
    /// Messages are delivered in the order they arrived.  Dropping the
    /// returned handle does not unsubscribe; call
    /// [`ListenerHandle::unsubscribe`].
    fn on_builder_message(&self, listener: BuilderListener) -> ListenerHandle;

    /// Captures a rectangle of the host window as an opaque PNG data URL.
    async fn capture_screenshot(&self, rect: CaptureRect) -> Result<String, CaptureError>;
}

// ── Listener bookkeeping ──────────────────────────────────────────────────────

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, BuilderListener)>,
}

/// An ordered set of builder-message listeners.
#[derive(Default)]
pub struct ListenerSet {
    table: Mutex<ListenerTable>,
}

impl ListenerSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a listener and returns the handle that removes it.
    pub fn subscribe(self: &Arc<Self>, listener: BuilderListener) -> ListenerHandle {
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, listener));
        ListenerHandle {
            set: Arc::downgrade(self),
            id,
        }
    }

    /// Delivers `message` to every current listener, in subscription order.
    ///
    /// Returns how many listeners were called.  Listeners run outside the
    /// lock, so they may subscribe or unsubscribe from inside the callback.
    pub fn dispatch(&self, message: &SdkMessage) -> usize {
        let snapshot: Vec<BuilderListener> = self
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &snapshot {
            listener(message.clone());
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every listener.  Used when the owning environment is destroyed.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    fn remove(&self, id: u64) {
        self.lock().entries.retain(|(entry_id, _)| *entry_id != id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerTable> {
        // A listener panicking on another thread must not wedge the session.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes one listener from its [`ListenerSet`].
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    set: Weak<ListenerSet>,
    id: u64,
}

impl ListenerHandle {
    /// Removes the listener.  Safe to call repeatedly, and after the owning
    /// environment is gone.
    pub fn unsubscribe(&self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
