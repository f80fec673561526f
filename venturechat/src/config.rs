//! Session configuration.
//!
//! Layered with the following priority (highest first):
//! 1. Values set programmatically by the embedding application
//! 2. TOML config file (`~/.config/venturechat/config.toml`)
//! 3. Compiled defaults
//!
//! A missing config file is not an error (defaults apply). An explicit
//! path that cannot be read is.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    gateway: GatewayFileConfig,
    api: ApiFileConfig,
    timing: TimingFileConfig,
}

/// `[gateway]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct GatewayFileConfig {
    url: Option<String>,
    auth_token: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[timing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TimingFileConfig {
    typing_quiet_period_ms: Option<u64>,
    ack_timeout_secs: Option<u64>,
    backoff_initial_ms: Option<u64>,
    backoff_max_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway WebSocket URL.
    pub gateway_url: String,
    /// REST API base URL for history and contact backfill.
    pub api_base_url: String,
    /// Bearer token presented on the WebSocket handshake and REST calls.
    pub auth_token: Option<String>,
    /// Timeout for the WebSocket connect handshake.
    pub connect_timeout: Duration,
    /// Timeout for REST requests.
    pub request_timeout: Duration,
    /// Capacity of the command/event mpsc channels.
    pub channel_capacity: usize,
    /// Quiet period after the last keystroke before `isTyping: false`.
    pub typing_quiet_period: Duration,
    /// How long a pending send waits for its ack before failing.
    pub ack_timeout: Duration,
    /// First reconnect backoff delay.
    pub backoff_initial: Duration,
    /// Reconnect backoff cap.
    pub backoff_max: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:4000/ws".to_string(),
            api_base_url: "http://127.0.0.1:4000".to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            typing_quiet_period: Duration::from_millis(2000),
            ack_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Loads configuration from the default file location, falling back to
    /// compiled defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads configuration from an explicit file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&raw)?;
        Ok(Self::resolve(&file))
    }

    /// Resolves a config from a parsed file. Priority: file > default.
    /// Separated from the loaders to enable unit testing without I/O.
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            gateway_url: file
                .gateway
                .url
                .clone()
                .unwrap_or(defaults.gateway_url),
            api_base_url: file
                .api
                .base_url
                .clone()
                .unwrap_or(defaults.api_base_url),
            auth_token: file.gateway.auth_token.clone(),
            connect_timeout: file
                .gateway
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            channel_capacity: file
                .gateway
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            typing_quiet_period: file
                .timing
                .typing_quiet_period_ms
                .map_or(defaults.typing_quiet_period, Duration::from_millis),
            ack_timeout: file
                .timing
                .ack_timeout_secs
                .map_or(defaults.ack_timeout, Duration::from_secs),
            backoff_initial: file
                .timing
                .backoff_initial_ms
                .map_or(defaults.backoff_initial, Duration::from_millis),
            backoff_max: file
                .timing
                .backoff_max_secs
                .map_or(defaults.backoff_max, Duration::from_secs),
        }
    }
}

/// Default config file path: `~/.config/venturechat/config.toml`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("venturechat").join("config.toml"))
}
