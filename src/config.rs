//! Configuration module for ferrite-import
//!
//! Loads an optional TOML file. Every section and field has a default, so
//! an empty file (or no file) is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::migration::{
    compare_versions, MigrationError, MigrationOptions, Result, DEFAULT_BATCH_SIZE,
    MAX_BATCH_SIZE, MIN_REPLACE_VERSION,
};
use crate::rdb::DUMP_PAYLOAD_VERSION;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Migration engine settings
    pub migration: MigrationConfig,
    /// Snapshot decoding settings
    pub snapshot: SnapshotConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl ImportConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn parse_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| MigrationError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.migration.batch_size == 0 {
            return Err(MigrationError::Config(
                "Batch size cannot be 0".to_string(),
            ));
        }
        if self.migration.batch_size > MAX_BATCH_SIZE {
            return Err(MigrationError::Config(format!(
                "Batch size {} exceeds the maximum of {}",
                self.migration.batch_size, MAX_BATCH_SIZE
            )));
        }

        let min = self.migration.min_replace_version.trim();
        if min.is_empty() || !min.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(MigrationError::Config(format!(
                "Invalid min_replace_version: {:?}",
                self.migration.min_replace_version
            )));
        }
        if compare_versions(min, "0") == std::cmp::Ordering::Equal {
            return Err(MigrationError::Config(
                "min_replace_version cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Engine options derived from this configuration.
    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            batch_size: self.migration.batch_size,
            min_replace_version: self.migration.min_replace_version.clone(),
            payload_version: self.snapshot.payload_version,
            now_ms: None,
        }
    }
}

/// Migration engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Keys per grouped read and write
    pub batch_size: usize,
    /// Destination version enabling `RESTORE ... REPLACE`
    pub min_replace_version: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            min_replace_version: MIN_REPLACE_VERSION.to_string(),
        }
    }
}

/// Snapshot decoding settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Footer version appended to decoded payloads
    pub payload_version: u16,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            payload_version: DUMP_PAYLOAD_VERSION,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,

    /// JSON format
    Json,
}
