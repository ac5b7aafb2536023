//! Configuration loading and data directory resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Service configuration, resolved in priority order:
/// 1. Environment variables (`BULKREG_PORT`, `BULKREG_DATA_DIR`, ...)
/// 2. TOML config file (`~/.config/bulkreg/config.toml` or `/etc/bulkreg/config.toml`)
/// 3. Compiled defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data directory holding the SQLite database
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Minutes before an unconfirmed import session expires
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: i64,

    /// Delay between row creations during job execution (0 = no throttle)
    #[serde(default = "default_row_delay_ms")]
    pub row_delay_ms: u64,

    /// Interval between expired-session sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_port() -> u16 {
    5741
}

fn default_session_ttl_minutes() -> i64 {
    30
}

fn default_row_delay_ms() -> u64 {
    200
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: None,
            session_ttl_minutes: default_session_ttl_minutes(),
            row_delay_ms: default_row_delay_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the TOML file (if present), then apply
    /// environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
                let parsed: ServiceConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
                tracing::info!("Configuration loaded from {}", path.display());
                parsed
            }
            None => ServiceConfig::default(),
        };

        if let Ok(port) = std::env::var("BULKREG_PORT") {
            config.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid BULKREG_PORT: {}", port)))?;
        }
        if let Ok(dir) = std::env::var("BULKREG_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(ttl) = std::env::var("BULKREG_SESSION_TTL_MINUTES") {
            config.session_ttl_minutes = ttl
                .parse()
                .map_err(|_| Error::Config(format!("Invalid BULKREG_SESSION_TTL_MINUTES: {}", ttl)))?;
        }
        if let Ok(delay) = std::env::var("BULKREG_ROW_DELAY_MS") {
            config.row_delay_ms = delay
                .parse()
                .map_err(|_| Error::Config(format!("Invalid BULKREG_ROW_DELAY_MS: {}", delay)))?;
        }

        Ok(config)
    }

    /// Resolved data directory (configured, or OS-dependent default)
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
    }

    /// SQLite database path inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("bulkreg.db")
    }
}

/// Locate the config file for the platform, user config preferred
fn find_config_file() -> Option<PathBuf> {
    if let Some(path) = dirs::config_dir().map(|d| d.join("bulkreg").join("config.toml")) {
        if path.exists() {
            return Some(path);
        }
    }
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc/bulkreg/config.toml");
        if system.exists() {
            return Some(system);
        }
    }
    None
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("bulkreg"))
        .unwrap_or_else(|| PathBuf::from("./bulkreg_data"))
}
