//! Dev server configuration types.
//!
//! [`DevServerConfig`] is the single source of truth for runtime settings.
//! The defaults match what the Flow Builder expects out of the box: a loopback
//! listener on port 4059.  The binary can override them from a TOML file, the
//! environment, or CLI flags (see `main.rs` and `infrastructure::config_file`).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the Flow Builder connects to when previewing in a desktop app.
pub const DEFAULT_PORT: u16 = 4059;

/// How long a screenshot request may wait on the host before failing.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// All runtime configuration for the dev server.
///
/// # Example
///
/// ```rust
/// use userflow_dev_bridge::domain::DevServerConfig;
///
/// let cfg = DevServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 4059);
/// assert!(cfg.bind_addr.ip().is_loopback());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevServerConfig {
    /// Address the WebSocket listener binds to.
    ///
    /// The Flow Builder runs in a browser on the same machine, so this stays
    /// on loopback.  Binding a public interface would expose remote control of
    /// the app to the network.
    pub bind_addr: SocketAddr,

    /// Upper bound on a single `capture_screenshot` call, including the host
    /// capture and compositing.
    pub capture_timeout: Duration,
}

impl Default for DevServerConfig {
    /// | Field           | Default          |
    /// |-----------------|------------------|
    /// | bind_addr       | `127.0.0.1:4059` |
    /// | capture_timeout | 10 seconds       |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
