//! Module for application configuration settings.
//!
//! Settings come from, highest priority first: command line flags and their environment
//! variables, an optional TOML configuration file, and built-in defaults.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_upload_delay_secs() -> u64 {
    5
}

const fn default_sync_interval_secs() -> u64 {
    30
}

/// Application configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Bot API token. Required.
    #[serde(default)]
    pub bot_token: Option<SecretString>,

    /// Channel to mount. Required.
    #[serde(default)]
    pub chat_id: Option<i64>,

    /// Keep file contents in memory after the last handle is closed.
    #[serde(default)]
    pub cache: bool,

    /// Level used when neither `TGFS_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Also write debug-level logs to this file.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Seconds a new file waits before its first upload.
    #[serde(default = "default_upload_delay_secs")]
    pub upload_delay_secs: u64,

    /// Seconds between two reconciliations with the channel.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Let other users access the mount.
    #[serde(default)]
    pub allow_other: bool,

    /// The user to mount the filesystem as. If not specified, runs as the current user.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// The group to mount the filesystem as. If not specified, runs as the current group.
    #[serde(default = "current_gid")]
    pub gid: u32,

    /// Where to mount. Only ever set from the command line.
    #[serde(skip)]
    pub mount_point: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            cache: false,
            log_level: default_log_level(),
            log_file: None,
            upload_delay_secs: default_upload_delay_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            allow_other: false,
            uid: current_uid(),
            gid: current_gid(),
            mount_point: PathBuf::new(),
        }
    }
}

/// Values given on the command line (or through their environment variables).
#[derive(Debug, Default)]
pub struct Overrides {
    pub mount_point: PathBuf,
    pub bot_token: Option<SecretString>,
    pub chat_id: Option<i64>,
    pub cache: Option<bool>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub upload_delay_secs: Option<u64>,
    pub sync_interval_secs: Option<u64>,
    pub allow_other: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing a list of validation error messages otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.bot_token.is_none() {
            errors.push("No bot token given. Set TG_TOKEN or `bot-token`.".to_owned());
        }
        if self.chat_id.is_none() {
            errors.push("No channel given. Set CHAT_ID or `chat-id`.".to_owned());
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            errors.push(format!(
                "Unknown log level '{}'. Use one of trace, debug, info, warn, error.",
                self.log_level
            ));
        }
        if self.sync_interval_secs == 0 {
            errors.push("`sync-interval-secs` must be at least 1.".to_owned());
        }
        if self.mount_point.as_os_str().is_empty() {
            errors.push("No mount point given.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("tgfs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("tgfs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/tgfs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads the given file, else the first config file found, else the defaults.
    ///
    /// An explicitly given file must exist; a malformed file is always an error.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = external_config_path {
            return Self::load_from_file(path);
        }
        Self::find_config_file().map_or_else(|| Ok(Self::default()), |p| Self::load_from_file(&p))
    }

    /// Layer command line values over this configuration.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.mount_point = overrides.mount_point;
        if overrides.bot_token.is_some() {
            self.bot_token = overrides.bot_token;
        }
        if overrides.chat_id.is_some() {
            self.chat_id = overrides.chat_id;
        }
        if let Some(cache) = overrides.cache {
            self.cache = cache;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level.to_lowercase();
        }
        if overrides.log_file.is_some() {
            self.log_file = overrides.log_file;
        }
        if let Some(secs) = overrides.upload_delay_secs {
            self.upload_delay_secs = secs;
        }
        if let Some(secs) = overrides.sync_interval_secs {
            self.sync_interval_secs = secs;
        }
        self.allow_other |= overrides.allow_other;
        self
    }
}
