//! Configuration module for chanwarden.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, WardenError};

/// Longest automatic ban duration accepted: 100 years.
pub const MAX_AUTO_BAN_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/chanwarden.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/chanwarden.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Admission pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Upper bound for a single store query, in milliseconds.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
    /// Duration of IP bans issued by "ban" filters, in seconds (0 = permanent).
    #[serde(default)]
    pub auto_ban_duration_secs: u64,
    /// Whether auto-issued bans may be appealed.
    #[serde(default = "default_auto_ban_appealable")]
    pub auto_ban_appealable: bool,
    /// Whether the tripcode is checked against username bans after the name.
    #[serde(default = "default_check_tripcode")]
    pub check_tripcode: bool,
}

fn default_query_timeout() -> u64 {
    5000
}

fn default_auto_ban_appealable() -> bool {
    true
}

fn default_check_tripcode() -> bool {
    true
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout(),
            auto_ban_duration_secs: 0,
            auto_ban_appealable: default_auto_ban_appealable(),
            check_tripcode: default_check_tripcode(),
        }
    }
}

/// Perceptual fingerprint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FingerprintConfig {
    /// Side length of the downscaled image (hash has length² bits).
    #[serde(default = "default_hash_length")]
    pub hash_length: u32,
    /// Fingerprint video uploads through their thumbnail frame.
    #[serde(default)]
    pub video_thumbnails: bool,
}

fn default_hash_length() -> u32 {
    16
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            hash_length: default_hash_length(),
            video_thumbnails: false,
        }
    }
}

/// Display configuration for user-visible ban notices.
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Timezone for displaying dates (e.g., "America/New_York", "UTC").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// strftime format for ban expiry dates.
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d %H:%M:%S %Z".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            date_format: default_date_format(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Admission pipeline configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Fingerprint configuration.
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    /// Display configuration.
    #[serde(default)]
    pub display: DisplayConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(WardenError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| WardenError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CHANWARDEN_DB_PATH`: Override the database path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CHANWARDEN_DB_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - the query timeout is zero
    /// - the auto ban duration exceeds [`MAX_AUTO_BAN_DURATION_SECS`]
    /// - the fingerprint hash length is outside 2..=64
    pub fn validate(&self) -> Result<()> {
        if self.admission.query_timeout_ms == 0 {
            return Err(WardenError::Config(
                "admission.query_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.admission.auto_ban_duration_secs > MAX_AUTO_BAN_DURATION_SECS {
            return Err(WardenError::Config(format!(
                "admission.auto_ban_duration_secs must be at most {MAX_AUTO_BAN_DURATION_SECS}, got {}",
                self.admission.auto_ban_duration_secs
            )));
        }
        if !(2..=64).contains(&self.fingerprint.hash_length) {
            return Err(WardenError::Config(format!(
                "fingerprint.hash_length must be between 2 and 64, got {}",
                self.fingerprint.hash_length
            )));
        }
        Ok(())
    }
}
