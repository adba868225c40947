//! deskcast server: entry point.
//!
//! Shares one headless virtual desktop with any number of browser sessions
//! over WebSocket.  Every session can watch the stream; one at a time can
//! drive the mouse and keyboard.
//!
//! # Usage
//!
//! ```text
//! deskcast-server [OPTIONS]
//!
//! Options:
//!   --config      <PATH>   TOML configuration file
//!   --bind        <ADDR>   Listener IP address (overrides [server].bind_address)
//!   --port        <PORT>   Listener port (overrides [server].port)
//!   --log-level   <LEVEL>  Log level when RUST_LOG is unset
//!   --capture-fps <FPS>    Synthetic capture frame rate, 0 to disable
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present; both take precedence over
//! the config file.
//!
//! | Variable               | Description                  |
//! |------------------------|------------------------------|
//! | `DESKCAST_CONFIG`      | Configuration file path      |
//! | `DESKCAST_BIND`        | Listener IP address          |
//! | `DESKCAST_PORT`        | Listener port                |
//! | `DESKCAST_LOG_LEVEL`   | Fallback log level           |
//! | `DESKCAST_CAPTURE_FPS` | Synthetic capture frame rate |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use deskcast_server::application::{DesktopDriver, ServerCore};
use deskcast_server::infrastructure::desktop_driver::VirtualDisplayDriver;
use deskcast_server::infrastructure::storage::ServerConfig;
use deskcast_server::infrastructure::{run_server, MemberDirectory, SyntheticCapture};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Multi-viewer, single-controller remote desktop server.
#[derive(Debug, Parser)]
#[command(
    name = "deskcast-server",
    about = "Shares one virtual desktop with many browser sessions",
    version
)]
struct Cli {
    /// TOML configuration file.  Built-in defaults apply when omitted.
    #[arg(long, env = "DESKCAST_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket listener to.
    #[arg(long, env = "DESKCAST_BIND")]
    bind: Option<String>,

    /// TCP port for the WebSocket listener.
    #[arg(long, env = "DESKCAST_PORT")]
    port: Option<u16>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "DESKCAST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Frame rate of the synthetic capture source; 0 disables it.
    #[arg(long, env = "DESKCAST_CAPTURE_FPS")]
    capture_fps: Option<u32>,
}

impl Cli {
    /// Loads the config file (if any) and applies CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override makes the configuration invalid.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        if let Some(fps) = self.capture_fps {
            config.media.capture_fps = fps;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    // `RUST_LOG` wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let initial = config.initial_screen()?;
    let driver: Arc<dyn DesktopDriver> = Arc::new(VirtualDisplayDriver::new(
        initial,
        config.screen_configurations()?,
    ));
    let core = Arc::new(ServerCore::new(driver, config.core_settings()));

    let members = Arc::new(MemberDirectory::from_config(&config));
    if members.is_empty() && !config.session.allow_guests {
        warn!("no members configured and guests disabled; every connection will be refused");
    }

    if config.media.capture_fps > 0 {
        core.start_capture(Box::new(SyntheticCapture::new(config.media.capture_fps)));
    }

    info!(
        screen = %initial,
        members = members.len(),
        guests = config.session.allow_guests,
        "deskcast server starting"
    );

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(&config, core, members, running).await?;

    info!("deskcast server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// A `Cli` with no flags set.  Built directly so `DESKCAST_*` variables
    /// in the test environment cannot leak in.
    fn bare_cli() -> Cli {
        Cli {
            config: None,
            bind: None,
            port: None,
            log_level: None,
            capture_fps: None,
        }
    }

    #[test]
    fn test_no_arguments_gives_default_config() {
        let config = bare_cli().into_server_config().unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_port_flag_is_parsed() {
        // An explicit flag takes precedence over the environment.
        let cli = Cli::parse_from(["deskcast-server", "--port", "9999"]);
        assert_eq!(cli.port, Some(9999));
    }

    #[test]
    fn test_port_override() {
        let cli = Cli {
            port: Some(9999),
            ..bare_cli()
        };
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_bind_override() {
        let cli = Cli {
            bind: Some("127.0.0.1".into()),
            ..bare_cli()
        };
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.socket_addr().unwrap().ip().to_string(), "127.0.0.1");
    }

    #[test]
    fn test_invalid_bind_is_rejected() {
        let cli = Cli {
            bind: Some("not.an.ip".into()),
            ..bare_cli()
        };
        assert!(cli.into_server_config().is_err());
    }

    #[test]
    fn test_capture_fps_override() {
        let cli = Cli {
            capture_fps: Some(0),
            ..bare_cli()
        };
        let config = cli.into_server_config().unwrap();
        assert_eq!(config.media.capture_fps, 0);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/deskcast.toml")),
            ..bare_cli()
        };
        assert!(cli.into_server_config().is_err());
    }
}
