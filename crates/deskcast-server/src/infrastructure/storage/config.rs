//! TOML configuration for the server binary.
//!
//! Every field has a serde default, so an empty file (or no file at all) is a
//! valid configuration.  Example:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8080
//! log_level = "info"
//!
//! [session]
//! outbound_queue = 256
//! overflow_policy = "drop_oldest"
//! send_timeout_ms = 5000
//! allow_guests = false
//!
//! [media]
//! peer_buffer_frames = 8
//! capture_fps = 30
//!
//! [desktop]
//! initial_screen = "1280x720@30"
//! configurations = ["1280x720@30", "1920x1080@60"]
//!
//! [[members]]
//! token = "s3cret"
//! id = "alice"
//! name = "Alice"
//! permissions = { is_admin = true, can_host = true }
//! ```
//!
//! Screen modes are written as `WIDTHxHEIGHT@RATE` strings and parsed by
//! [`ServerConfig::validate`].

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use deskcast_core::{Permissions, ScreenConfiguration};

use crate::application::outbound::OverflowPolicy;
use crate::application::server_core::CoreSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The file parsed but a value is unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub media: MediaSection,
    #[serde(default)]
    pub desktop: DesktopSection,
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Per-session delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Messages a session may have queued before overflow kicks in.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// A single socket write taking longer than this closes the session.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Admit connections without a known token as viewers.
    #[serde(default)]
    pub allow_guests: bool,
}

/// Media fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaSection {
    /// Frames a peer may fall behind before its oldest frames are dropped.
    #[serde(default = "default_peer_buffer_frames")]
    pub peer_buffer_frames: usize,
    /// Frame rate of the built-in synthetic capture source.  0 disables it.
    #[serde(default = "default_capture_fps")]
    pub capture_fps: u32,
}

/// Virtual display settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesktopSection {
    #[serde(default = "default_initial_screen")]
    pub initial_screen: String,
    #[serde(default = "default_configurations")]
    pub configurations: Vec<String>,
}

/// One admitted member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberEntry {
    /// Secret presented as `?token=` when connecting.
    pub token: String,
    /// Stable session ID.  Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
}

impl MemberEntry {
    pub fn session_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_outbound_queue() -> usize {
    256
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_peer_buffer_frames() -> usize {
    8
}
fn default_capture_fps() -> u32 {
    30
}
fn default_initial_screen() -> String {
    "1280x720@30".to_string()
}
fn default_configurations() -> Vec<String> {
    [
        "1024x768@60",
        "1280x720@30",
        "1280x720@60",
        "1920x1080@30",
        "1920x1080@60",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            outbound_queue: default_outbound_queue(),
            overflow_policy: OverflowPolicy::default(),
            send_timeout_ms: default_send_timeout_ms(),
            allow_guests: false,
        }
    }
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            peer_buffer_frames: default_peer_buffer_frames(),
            capture_fps: default_capture_fps(),
        }
    }
}

impl Default for DesktopSection {
    fn default() -> Self {
        Self {
            initial_screen: default_initial_screen(),
            configurations: default_configurations(),
        }
    }
}

// ── Loading and derived values ────────────────────────────────────────────────

impl ServerConfig {
    /// Reads and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// if the TOML is malformed, [`ConfigError::Invalid`] if a value is
    /// unusable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every value that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        let initial = self.initial_screen()?;
        let configurations = self.screen_configurations()?;
        if !configurations.contains(&initial) {
            return Err(ConfigError::Invalid(format!(
                "initial_screen {initial} is not listed in configurations"
            )));
        }

        let mut tokens = HashSet::new();
        let mut ids = HashSet::new();
        for member in &self.members {
            if member.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "member '{}' has an empty token",
                    member.name
                )));
            }
            if !tokens.insert(member.token.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate token for member '{}'",
                    member.name
                )));
            }
            if !ids.insert(member.session_id()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate member id '{}'",
                    member.session_id()
                )));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.bind_address, self.server.port)
            .parse()
            .map_err(|e| {
                ConfigError::Invalid(format!(
                    "bind address '{}': {e}",
                    self.server.bind_address
                ))
            })
    }

    pub fn initial_screen(&self) -> Result<ScreenConfiguration, ConfigError> {
        self.desktop
            .initial_screen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{e}")))
    }

    pub fn screen_configurations(&self) -> Result<Vec<ScreenConfiguration>, ConfigError> {
        self.desktop
            .configurations
            .iter()
            .map(|s| s.parse().map_err(|e| ConfigError::Invalid(format!("{e}"))))
            .collect()
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.session.send_timeout_ms.max(1))
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            media_buffer: self.media.peer_buffer_frames,
            ..CoreSettings::default()
        }
    }
}
