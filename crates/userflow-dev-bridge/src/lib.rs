//! userflow-dev-bridge library crate.
//!
//! A development-mode bridge that lets the Userflow Flow Builder (a web app)
//! preview flows inside a desktop application.  The builder connects to a
//! local WebSocket server; the server hands the connection to the embedded
//! SDK as its target environment.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Flow Builder (JSON over WebSocket, ws://127.0.0.1:4059)
//!         ↕
//! [userflow-dev-bridge]
//!   ├── domain/           Message model, CaptureRect, DevServerConfig
//!   ├── application/      TargetEnv contract, registry, host ports, compositor
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and sessions (tokio-tungstenite)
//!         ├── socket_env/ TargetEnv backed by one connection
//!         ├── static_host/ Headless host for the standalone binary
//!         └── config_file/ Optional TOML config
//!         ↕
//! Embedded SDK (via TargetEnvRegistry)   Host window (via Host trait)
//! ```
//!
//! # Embedding
//!
//! ```no_run
//! use std::sync::Arc;
//! use userflow_dev_bridge::application::{Host, TargetEnv, TargetEnvRegistry};
//! use userflow_dev_bridge::domain::{DevServerConfig, SdkMessage};
//! use userflow_dev_bridge::infrastructure::DevServer;
//!
//! # async fn embed(host: Arc<dyn Host>) -> anyhow::Result<()> {
//! let registry = TargetEnvRegistry::new();
//! let mut changes = registry.subscribe();
//! let mut server = DevServer::start(DevServerConfig::default(), host, registry).await?;
//!
//! // The SDK glue follows the current environment.
//! while changes.changed().await.is_ok() {
//!     let current = changes.borrow_and_update().clone();
//!     if let Some(current) = current {
//!         current.env().on_builder_message(Arc::new(|msg: SdkMessage| println!("{}", msg.kind())));
//!     }
//! }
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: contracts and compositing.
pub mod application;

/// Infrastructure layer: WebSocket server, socket-backed environment, host.
pub mod infrastructure;
