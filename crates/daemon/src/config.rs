//! Configuration management for the Warden daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/warden/config.toml`.
//!
//! The TOML file covers how the daemon runs on this host. Listener settings
//! the operator edits at runtime (port, anonymous access, root password) live
//! in the credential store instead; see [`ListenerConfig`].

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directory::{keys, CredentialStore, CredentialStoreExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 6464;

/// Placeholder root password used when the store has none.
pub const DEFAULT_ROOT_PASSWORD: &str = "password";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("tick_ms must be between 10 and 60000, got {0}")]
    InvalidTick(u64),

    #[error("reconcile_budget_ms must be greater than 0, got {0}")]
    InvalidReconcileBudget(u64),

    #[error("max_port_attempts must be between 1 and 65535, got {0}")]
    InvalidMaxPortAttempts(u32),

    #[error("probe_timeout_ms must be between 1 and 30000, got {0}")]
    InvalidProbeTimeout(u64),

    #[error("hostname cannot be empty")]
    EmptyHostname,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Warden daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Credential store location.
    pub store: StoreConfig,

    /// Listener loop and port negotiation.
    pub listener: ListenerSettings,

    /// TLS identity settings.
    pub tls: TlsConfig,

    /// User directory handling.
    pub directory: DirectoryConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for storing daemon data (store, pid file).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Credential store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the JSON store. Defaults to `<data_dir>/settings.json`.
    pub path: Option<PathBuf>,
}

/// Listener loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenerSettings {
    /// Address to bind; all interfaces by default.
    pub bind_address: String,

    /// Require TLS on every connection.
    pub secure: bool,

    /// Event loop tick, in milliseconds. One reconciliation pass per tick.
    pub tick_ms: u64,

    /// Upper bound on a single reconciliation pass, in milliseconds.
    pub reconcile_budget_ms: u64,

    /// Maximum ports tried when auto-finding a free port.
    pub max_port_attempts: u32,

    /// Timeout for a single probe bind, in milliseconds.
    pub probe_timeout_ms: u64,
}

/// TLS identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    /// Directory holding `certificate.pem` and `private.key`.
    pub ssl_dir: PathBuf,

    /// Common name for a generated certificate.
    pub hostname: String,
}

/// User directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Root under which derived home directories are created.
    pub users_root: PathBuf,

    /// Close open connections of users removed from the directory.
    pub evict_on_removal: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            secure: true,
            tick_ms: 250,
            reconcile_budget_ms: 1000,
            max_port_attempts: 100,
            probe_timeout_ms: 500,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ssl_dir: PathBuf::from("ssl"),
            hostname: "localhost".to_string(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            users_root: PathBuf::from("users"),
            evict_on_removal: false,
        }
    }
}

impl ListenerSettings {
    /// Event loop tick as a duration.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Reconciliation budget as a duration.
    pub fn reconcile_budget(&self) -> Duration {
        Duration::from_millis(self.reconcile_budget_ms)
    }

    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl TlsConfig {
    /// Path of the PEM certificate.
    pub fn cert_path(&self) -> PathBuf {
        self.ssl_dir.join("certificate.pem")
    }

    /// Path of the PEM private key.
    pub fn key_path(&self) -> PathBuf {
        self.ssl_dir.join("private.key")
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
}

impl Config {
    /// Path of the credential store file.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("settings.json"))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WARDEN_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WARDEN_STORE_PATH: Override the credential store path
    /// - WARDEN_BIND_ADDRESS: Override the listener bind address
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("WARDEN_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(path) = std::env::var("WARDEN_STORE_PATH") {
            if !path.is_empty() {
                tracing::info!("Overriding store path from environment: {}", path);
                self.store.path = Some(PathBuf::from(path));
            }
        }

        if let Ok(addr) = std::env::var("WARDEN_BIND_ADDRESS") {
            if !addr.is_empty() {
                tracing::info!("Overriding bind_address from environment: {}", addr);
                self.listener.bind_address = addr;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.listener.bind_address.clone(),
            ));
        }

        if !(10..=60_000).contains(&self.listener.tick_ms) {
            return Err(ConfigError::InvalidTick(self.listener.tick_ms));
        }

        if self.listener.reconcile_budget_ms == 0 {
            return Err(ConfigError::InvalidReconcileBudget(
                self.listener.reconcile_budget_ms,
            ));
        }

        if !(1..=65_535).contains(&self.listener.max_port_attempts) {
            return Err(ConfigError::InvalidMaxPortAttempts(
                self.listener.max_port_attempts,
            ));
        }

        if !(1..=30_000).contains(&self.listener.probe_timeout_ms) {
            return Err(ConfigError::InvalidProbeTimeout(
                self.listener.probe_timeout_ms,
            ));
        }

        if self.tls.hostname.trim().is_empty() {
            return Err(ConfigError::EmptyHostname);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

/// Listener settings the operator keeps in the credential store.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    /// Preferred port.
    pub port: u16,
    /// Search upward from `port` when it is taken.
    pub auto_find_port: bool,
    /// Seed the anonymous account.
    pub anonymous_allowed: bool,
    /// Root password as stored (PHC hash or plaintext).
    pub root_password: String,
    /// Address to bind.
    pub bind_address: IpAddr,
}

impl ListenerConfig {
    /// Reads the store keys, falling back to defaults for absent ones.
    pub fn from_store<S: CredentialStore + ?Sized>(
        store: &S,
        bind_address: IpAddr,
    ) -> directory::Result<Self> {
        Ok(Self {
            port: store.get_or(keys::PORT, DEFAULT_PORT)?,
            auto_find_port: store.get_or(keys::AUTO_FIND_PORT, true)?,
            anonymous_allowed: store.get_or(keys::ANONYMOUS_ALLOWED, false)?,
            root_password: store.get_or(keys::ROOT_PASSWORD, DEFAULT_ROOT_PASSWORD.to_string())?,
            bind_address,
        })
    }
}
