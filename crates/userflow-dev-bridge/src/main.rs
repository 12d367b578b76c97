//! Userflow dev bridge: standalone entry point.
//!
//! Desktop apps normally embed the library and start the dev server from
//! their own process.  This binary runs the same server against a headless
//! host so the Flow Builder connection can be exercised without an app:
//! "show window" requests are logged, and screenshots are cut from a backdrop
//! image.
//!
//! # Usage
//!
//! ```text
//! userflow-dev-bridge [OPTIONS]
//!
//! Options:
//!   --config <FILE>              TOML config file
//!   --bind <IP>                  Listener IP [default: 127.0.0.1]
//!   --port <PORT>                Listener port [default: 4059]
//!   --capture-timeout <SECS>     Screenshot timeout [default: 10]
//!   --backdrop <FILE>            Image served as the "window" content
//!   --device-pixel-ratio <RATIO> Reported device pixel ratio [default: 1]
//! ```
//!
//! # Precedence
//!
//! CLI flag, then environment variable, then config file, then default.
//!
//! | Variable                   | Default     |
//! |----------------------------|-------------|
//! | `USERFLOW_DEV_BIND`        | `127.0.0.1` |
//! | `USERFLOW_DEV_PORT`        | `4059`      |
//! | `USERFLOW_CAPTURE_TIMEOUT` | `10`        |
//! | `USERFLOW_DEV_BACKDROP`    | (none)      |
//! | `USERFLOW_DEV_DPR`         | `1`         |

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use userflow_dev_bridge::application::{Host, TargetEnvRegistry};
use userflow_dev_bridge::domain::config::{DevServerConfig, DEFAULT_CAPTURE_TIMEOUT};
use userflow_dev_bridge::domain::SdkMessage;
use userflow_dev_bridge::infrastructure::{load_config_file, DevServer, FileConfig, StaticHost};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Local WebSocket bridge for previewing Userflow flows in a desktop app.
#[derive(Debug, Parser)]
#[command(
    name = "userflow-dev-bridge",
    about = "Local WebSocket bridge between the Userflow Flow Builder and an embedded SDK",
    version
)]
struct Cli {
    /// TOML config file.  Its values sit below CLI flags and environment
    /// variables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    ///
    /// Keep this on loopback: anyone who can connect can drive the app.
    #[arg(long, env = "USERFLOW_DEV_BIND")]
    bind: Option<IpAddr>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "USERFLOW_DEV_PORT")]
    port: Option<u16>,

    /// Seconds a screenshot request may take before it fails.
    #[arg(long, env = "USERFLOW_CAPTURE_TIMEOUT")]
    capture_timeout: Option<u64>,

    /// Image used as the headless window's content for screenshots.
    #[arg(long, env = "USERFLOW_DEV_BACKDROP")]
    backdrop: Option<PathBuf>,

    /// Device pixel ratio the headless window reports.
    #[arg(long, env = "USERFLOW_DEV_DPR")]
    device_pixel_ratio: Option<f64>,
}

/// Everything `main` needs after merging CLI, environment and file.
#[derive(Debug)]
struct Settings {
    server: DevServerConfig,
    backdrop: Option<PathBuf>,
    device_pixel_ratio: f64,
}

impl Cli {
    /// Merges the parsed arguments over `file` and the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the device pixel ratio is not a positive number.
    fn into_settings(self, file: FileConfig) -> anyhow::Result<Settings> {
        let defaults = DevServerConfig::default();

        let ip = self.bind.or(file.bind).unwrap_or(defaults.bind_addr.ip());
        let port = self.port.or(file.port).unwrap_or(defaults.bind_addr.port());
        let capture_timeout = self
            .capture_timeout
            .or(file.capture_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CAPTURE_TIMEOUT);

        let device_pixel_ratio = self.device_pixel_ratio.or(file.device_pixel_ratio).unwrap_or(1.0);
        if !device_pixel_ratio.is_finite() || device_pixel_ratio <= 0.0 {
            anyhow::bail!("device pixel ratio must be a positive number, got {device_pixel_ratio}");
        }

        Ok(Settings {
            server: DevServerConfig {
                bind_addr: SocketAddr::new(ip, port),
                capture_timeout,
            },
            backdrop: self.backdrop.or(file.backdrop),
            device_pixel_ratio,
        })
    }
}

// ── SDK stand-in ──────────────────────────────────────────────────────────────

/// Follows the registry and logs every SDK message the builder sends.
///
/// In an embedding app this is where the SDK would attach itself.
fn spawn_inspector(registry: &TargetEnvRegistry) -> tokio::task::JoinHandle<()> {
    let mut changes = registry.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let current = changes.borrow_and_update().clone();
            match current {
                Some(current) => {
                    let id = current.id();
                    info!("builder attached as target env #{id}");
                    current
                        .env()
                        .on_builder_message(Arc::new(move |msg: SdkMessage| {
                            info!("env #{id}: builder → sdk: {}", msg.kind());
                        }));
                }
                None => info!("builder detached"),
            }
        }
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` controls verbosity; default to `info`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => load_config_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = cli.into_settings(file)?;

    if !settings.server.bind_addr.ip().is_loopback() {
        warn!(
            "binding {} exposes remote control of this app beyond localhost",
            settings.server.bind_addr
        );
    }

    let host: Arc<dyn Host> = match &settings.backdrop {
        Some(path) => Arc::new(StaticHost::from_backdrop_file(path, settings.device_pixel_ratio)?),
        None => Arc::new(StaticHost::new(None, settings.device_pixel_ratio)),
    };

    let registry = TargetEnvRegistry::new();
    let inspector = spawn_inspector(&registry);
    let mut server = DevServer::start(settings.server, host, Arc::clone(&registry)).await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
    }

    server.stop().await;
    if let Some(env) = registry.current() {
        env.destroy();
    }
    inspector.abort();
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
