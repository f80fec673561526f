//! Gateway settings.
//!
//! A resolved [`GatewayConfig`] is produced from three layers: flag or
//! environment values win, then whatever a TOML settings file provides,
//! then the compiled defaults. The default file lives at
//! `~/.config/venturechat-gateway/config.toml` and may be empty or
//! absent; a file named explicitly with `--config` must exist.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:4000"
//!
//! [limits]
//! max_body_len = 8192
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

/// Default bind address when nothing else specifies one.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4000";

/// Errors raised while assembling the gateway configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// Command line for the gateway binary.
#[derive(Parser, Debug, Default)]
#[command(version, about = "VentureChat gateway server")]
pub struct GatewayCliArgs {
    /// Address to bind the gateway to.
    #[arg(short, long, env = "GATEWAY_ADDR")]
    pub bind: Option<String>,

    /// Settings file to use instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum message body length in bytes.
    #[arg(long)]
    pub max_body_len: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "GATEWAY_LOG")]
    pub log_level: String,
}

/// On-disk settings. Every field is optional; absent values fall through
/// to the next layer.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    server: ServerSection,
    limits: LimitsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LimitsSection {
    max_body_len: Option<usize>,
}

impl FileSettings {
    /// Folds CLI overrides over the file values, filling the rest with
    /// defaults.
    fn overridden_by(self, cli: &GatewayCliArgs) -> GatewayConfig {
        GatewayConfig {
            bind_addr: cli
                .bind
                .clone()
                .or(self.server.bind_addr)
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_body_len: cli
                .max_body_len
                .or(self.limits.max_body_len)
                .unwrap_or(venturechat_proto::record::MAX_BODY_LEN),
            log_level: cli.log_level.clone(),
        }
    }
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the server binds to, e.g. `0.0.0.0:4000`.
    pub bind_addr: String,
    /// Maximum accepted message body length in bytes.
    pub max_body_len: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        FileSettings::default().overridden_by(&GatewayCliArgs {
            log_level: "info".to_string(),
            ..GatewayCliArgs::default()
        })
    }
}

impl GatewayConfig {
    /// Resolves the configuration for the given command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the settings file cannot be read (an
    /// explicitly named file must exist) or does not parse.
    pub fn load(cli: &GatewayCliArgs) -> Result<Self, ConfigError> {
        let settings = match &cli.config {
            Some(path) => read_settings(path, true)?,
            None => match default_settings_path() {
                Some(path) => read_settings(&path, false)?,
                None => FileSettings::default(),
            },
        };
        Ok(settings.overridden_by(cli))
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("venturechat-gateway").join("config.toml"))
}

/// Reads and parses a settings file. With `required` unset, a missing
/// file is the same as an empty one.
fn read_settings(path: &Path, required: bool) -> Result<FileSettings, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == ErrorKind::NotFound => Ok(FileSettings::default()),
        Err(e) => Err(ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
