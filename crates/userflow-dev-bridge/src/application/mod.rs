//! Application layer for userflow-dev-bridge.
//!
//! Knows *what* the bridge does without owning any sockets:
//!
//! - the ports to the host runtime ([`Host`], [`HostWindow`])
//! - the SDK's environment contract ([`TargetEnv`]) and its listener bookkeeping
//! - the single "current environment" slot ([`TargetEnvRegistry`])
//! - screenshot compositing
//!
//! WebSocket framing, task spawning and the accept loop live in the
//! infrastructure layer.

pub mod compositor;
pub mod host;
pub mod registry;
pub mod target_env;

pub use compositor::{capture_composited, CaptureError, CompositeError};
pub use host::{Host, HostError, HostWindow};
pub use registry::{CurrentEnv, Registration, TargetEnvRegistry};
pub use target_env::{BuilderListener, ListenerHandle, ListenerSet, TargetEnv, TargetEnvError};
