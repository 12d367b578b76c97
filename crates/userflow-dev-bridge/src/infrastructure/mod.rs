//! Infrastructure layer for userflow-dev-bridge.
//!
//! Handles all I/O:
//!
//! - binding the loopback listener and upgrading connections to WebSocket
//! - the per-connection [`SocketTargetEnv`] and its writer task
//! - the headless [`StaticHost`] used by the standalone binary
//! - reading the optional TOML config file

pub mod config_file;
pub mod socket_env;
pub mod static_host;
pub mod ws_server;

pub use config_file::{load_config_file, ConfigError, FileConfig};
pub use socket_env::SocketTargetEnv;
pub use static_host::StaticHost;
pub use ws_server::DevServer;
