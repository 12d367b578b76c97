//! The SDK's "current target environment" slot.
//!
//! The SDK holds exactly one environment at a time.  Rather than a global, the
//! slot is an explicit [`TargetEnvRegistry`] value shared between the dev
//! server (which registers environments) and the SDK glue (which watches for
//! changes and reads the current one).  Separate registries never interfere,
//! which keeps tests independent.
//!
//! Registering a new environment destroys the one it replaces, so a builder
//! that reconnects closes its stale connection: last connection wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tracing::debug;

use crate::application::target_env::TargetEnv;

/// The environment currently installed in a registry.
#[derive(Clone)]
pub struct CurrentEnv {
    id: u64,
    env: Arc<dyn TargetEnv>,
}

impl CurrentEnv {
    /// Registration sequence number, unique within one registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn env(&self) -> &Arc<dyn TargetEnv> {
        &self.env
    }
}

impl std::fmt::Debug for CurrentEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurrentEnv").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Single-slot holder for the SDK's active [`TargetEnv`].
pub struct TargetEnvRegistry {
    slot: watch::Sender<Option<CurrentEnv>>,
    next_id: AtomicU64,
}

impl TargetEnvRegistry {
    pub fn new() -> Arc<Self> {
        let (slot, _) = watch::channel(None);
        Arc::new(Self {
            slot,
            next_id: AtomicU64::new(1),
        })
    }

    /// Installs `env` as the current environment.
    ///
    /// The previously installed environment, if any, is destroyed.
    pub fn register(self: &Arc<Self>, env: Arc<dyn TargetEnv>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.slot.send_replace(Some(CurrentEnv { id, env }));
        if let Some(previous) = previous {
            debug!("target env #{} replaced by #{id}", previous.id);
            previous.env.destroy();
        }
        Registration {
            registry: Arc::downgrade(self),
            id,
        }
    }

    /// The environment the SDK should talk to right now.
    pub fn current(&self) -> Option<Arc<dyn TargetEnv>> {
        self.slot.borrow().as_ref().map(|cur| Arc::clone(&cur.env))
    }

    /// Watches the slot.  The receiver sees every install and removal.
    pub fn subscribe(&self) -> watch::Receiver<Option<CurrentEnv>> {
        self.slot.subscribe()
    }

    fn deregister(&self, id: u64) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.as_ref().is_some_and(|cur| cur.id == id) {
                *slot = None;
                true
            } else {
                false
            }
        })
    }
}

/// Proof of one [`TargetEnvRegistry::register`] call.
#[derive(Debug)]
pub struct Registration {
    registry: Weak<TargetEnvRegistry>,
    id: u64,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Clears the slot if it still holds this registration's environment.
    ///
    /// Returns `false` when a newer environment has taken over (or the slot
    /// was already cleared); the newer one is left alone.  Does not destroy
    /// the environment.
    pub fn deregister(&self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.deregister(self.id))
            .unwrap_or(false)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
