//! TOML-based configuration for the chat client.
//!
//! Loaded from an explicit path (`--config`) or from the platform default:
//! - Windows:  `%APPDATA%\HubChat\config.toml`
//! - Linux:    `~/.config/hubchat/config.toml`
//! - macOS:    `~/Library/Application Support/HubChat/config.toml`
//!
//! A missing file is not an error; every field has a default, so the client
//! also runs with a partial file.  On first run the CLI writes the defaults
//! to the platform location:
//!
//! ```toml
//! [hub]
//! url = "wss://chat.example.com/chathub"
//! invoke_timeout_secs = 15
//!
//! [chat]
//! user_name = "alice"
//! default_group = "global"
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

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
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Where and how to reach the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubSection {
    /// `ws://`, `wss://`, `http://` or `https://` URL of the hub endpoint.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Applied by the CLI around each invocation.  The connection itself
    /// never times out an invocation.
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSection {
    /// Name shown as the sender of outgoing messages.
    #[serde(default = "default_user_name")]
    pub user_name: String,
    /// Group joined right after connecting.
    #[serde(default = "default_group")]
    pub default_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_url() -> String {
    "ws://localhost:5000/chathub".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_invoke_timeout_secs() -> u64 {
    30
}
fn default_user_name() -> String {
    "anonymous".to_string()
}
fn default_group() -> String {
    "global".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
        }
    }
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            default_group: default_group(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading and saving ────────────────────────────────────────────────────────

/// Resolves the platform default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory cannot
/// be determined from the environment.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config at `path`, or [`ClientConfig::default`] if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Loads the config at `path`, writing a default one first if the file does
/// not exist yet.  Used for the platform default location so a first run
/// leaves an editable file behind.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read or created, and
/// [`ConfigError::Parse`] if existing TOML is malformed.
pub fn load_or_init_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    if path.exists() {
        return load_config(path);
    }
    let config = ClientConfig::default();
    save_config(path, &config)?;
    info!(path = %path.display(), "wrote default config");
    Ok(config)
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("HubChat"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("hubchat"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("HubChat")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
