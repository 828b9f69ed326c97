//! Client settings (`~/.config/seestar/config.toml`)
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration pointing at `seestar.local`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = "seestar";

/// Default TCP port of the command/event channel.
pub const DEFAULT_EVENT_PORT: u16 = 4700;

/// Telephoto camera image stream.
pub const DEFAULT_IMAGE_PORT: u16 = 4800;

/// Wide-angle camera image stream.
pub const DEFAULT_WIDE_IMAGE_PORT: u16 = 4804;

pub const DEFAULT_RTSP_PORT: u16 = 4554;
pub const DEFAULT_WIDE_RTSP_PORT: u16 = 4555;

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub events: EventSettings,

    #[serde(default)]
    pub stream: StreamSettings,
}

/// Where the telescope lives on the network
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_event_port")]
    pub event_port: u16,

    #[serde(default = "default_image_port")]
    pub image_port: u16,

    #[serde(default = "default_wide_image_port")]
    pub wide_image_port: u16,

    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,

    #[serde(default = "default_wide_rtsp_port")]
    pub wide_rtsp_port: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            event_port: default_event_port(),
            image_port: default_image_port(),
            wide_image_port: default_wide_image_port(),
            rtsp_port: default_rtsp_port(),
            wide_rtsp_port: default_wide_rtsp_port(),
        }
    }
}

impl DeviceSettings {
    pub fn event_addr(&self) -> String {
        format!("{}:{}", self.host, self.event_port)
    }

    pub fn image_addr(&self) -> String {
        format!("{}:{}", self.host, self.image_port)
    }

    pub fn wide_image_addr(&self) -> String {
        format!("{}:{}", self.host, self.wide_image_port)
    }
}

/// Event channel heartbeat and reconnection policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventSettings {
    #[serde(default = "default_event_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Silence longer than `interval * factor` counts as a dead connection
    #[serde(default = "default_timeout_factor")]
    pub heartbeat_timeout_factor: u32,

    /// JSON-RPC method sent as the keepalive
    #[serde(default = "default_heartbeat_method")]
    pub heartbeat_method: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_event_heartbeat_secs(),
            heartbeat_timeout_factor: default_timeout_factor(),
            heartbeat_method: default_heartbeat_method(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl EventSettings {
    /// Never shorter than one second
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_timeout_factor.max(1)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Image socket settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StreamSettings {
    #[serde(default = "default_stream_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_timeout_factor")]
    pub heartbeat_timeout_factor: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Headers announcing more than this are treated as desync
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_stream_heartbeat_secs(),
            heartbeat_timeout_factor: default_timeout_factor(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl StreamSettings {
    /// Never shorter than one second
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_timeout_factor.max(1)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_host() -> String {
    "seestar.local".to_string()
}

fn default_event_port() -> u16 {
    DEFAULT_EVENT_PORT
}

fn default_image_port() -> u16 {
    DEFAULT_IMAGE_PORT
}

fn default_wide_image_port() -> u16 {
    DEFAULT_WIDE_IMAGE_PORT
}

fn default_rtsp_port() -> u16 {
    DEFAULT_RTSP_PORT
}

fn default_wide_rtsp_port() -> u16 {
    DEFAULT_WIDE_RTSP_PORT
}

fn default_event_heartbeat_secs() -> u64 {
    10
}

fn default_stream_heartbeat_secs() -> u64 {
    4
}

fn default_timeout_factor() -> u32 {
    3
}

fn default_heartbeat_method() -> String {
    "scope_get_equ_coord".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_payload_bytes() -> usize {
    128 * 1024 * 1024
}

impl Settings {
    /// Strict parse; unlike [`load_settings`] this surfaces syntax errors.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid settings: {e}")))
    }
}

/// `<config_dir>/seestar/config.toml`
pub fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(CONFIG_DIR).join(CONFIG_FILENAME)
}

/// Load settings from `path`, falling back to defaults
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match Settings::from_toml_str(&content) {
            Ok(settings) => {
                tracing::debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                tracing::warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}
