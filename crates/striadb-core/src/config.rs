//! `StriaDB` configuration module.
//!
//! Provides configuration file support via `striadb.toml`, environment
//! variables, and runtime overrides.
//!
//! # Priority (highest to lowest)
//!
//! 1. Runtime overrides (API)
//! 2. Environment variables (`STRIADB_*`)
//! 3. Configuration file (`striadb.toml`)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },
}

/// Policy for an index whose recorded row count disagrees with the partition.
///
/// The legacy implementation decided this at compile time; here it is a
/// runtime policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleIndexPolicy {
    /// Delete the index whenever its row count differs from the partition.
    #[default]
    Delete,
    /// Keep an over-long index (`index rows > partition rows`) and let the
    /// evaluator truncate its answers; still delete a short index.
    Salvage,
}

/// File-manager configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileManagerConfig {
    /// Files at least this large are memory-mapped under the
    /// `MmapLargeFiles` access hint; smaller files are read into the heap.
    pub mmap_threshold_bytes: u64,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            mmap_threshold_bytes: 1 << 20,
        }
    }
}

/// Column-engine configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    /// What to do with an index whose row count disagrees with the partition.
    pub stale_index: StaleIndexPolicy,
    /// Optional ceiling on `(old + new) * element_size` during append.
    ///
    /// The legacy 2 GiB ceiling is lifted; set this to `0x8000_0000` to
    /// restore it.
    pub append_byte_ceiling: Option<u64>,
    /// Verify ascending order before honoring `set_sorted(true)`.
    ///
    /// The sorted flag is otherwise a declaration by the caller that the
    /// engine trusts without checking.
    pub verify_sorted: bool,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            stale_index: StaleIndexPolicy::Delete,
            append_byte_ceiling: None,
            verify_sorted: false,
        }
    }
}

/// Top-level store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// File-manager settings.
    pub file_manager: FileManagerConfig,
    /// Column-engine settings.
    pub column: ColumnConfig,
}

impl StoreConfig {
    /// Loads configuration from defaults, an optional `striadb.toml`, and
    /// `STRIADB_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file or environment contains
    /// values that fail to parse.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        } else {
            figment = figment.merge(Toml::file("striadb.toml"));
        }
        figment
            .merge(Env::prefixed("STRIADB_").split("__"))
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of its meaningful range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_manager.mmap_threshold_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "file_manager.mmap_threshold_bytes".to_string(),
                message: "must be positive; use 1 to mmap everything".to_string(),
            });
        }
        if let Some(ceiling) = self.column.append_byte_ceiling {
            if ceiling == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "column.append_byte_ceiling".to_string(),
                    message: "a zero ceiling forbids every append; omit it instead".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.column.stale_index, StaleIndexPolicy::Delete);
        assert_eq!(config.column.append_byte_ceiling, None);
        assert!(!config.column.verify_sorted);
    }

    #[test]
    fn test_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("striadb.toml");
        std::fs::write(
            &path,
            "[column]\nstale_index = \"salvage\"\nappend_byte_ceiling = 2147483648\n",
        )
        .unwrap();

        let config = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(config.column.stale_index, StaleIndexPolicy::Salvage);
        assert_eq!(config.column.append_byte_ceiling, Some(0x8000_0000));
    }

    #[test]
    fn test_zero_mmap_threshold_rejected() {
        let mut config = StoreConfig::default();
        config.file_manager.mmap_threshold_bytes = 0;
        assert!(config.validate().is_err());
    }
}
