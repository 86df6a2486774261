//! Configuration with validation and defaults
//!
//! Loaded from TOML; every section and field is optional. Command line
//! flags override what the file sets.

use crate::{inspect::ReportOptions, tsdb};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const HOUR_MS: u64 = 60 * 60 * 1000;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectConfig {
    pub storage: StorageConfig,
    pub report: ReportConfig,
}

/// Where the data lives and how its blocks were laid out
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub min_block_duration_ms: u64,
    pub block_range_steps: usize,
    pub block_range_factor: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            min_block_duration_ms: 2 * HOUR_MS,
            block_range_steps: 10,
            block_range_factor: 3,
        }
    }
}

/// Top-metrics report settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub top: usize,
    pub top_labels: usize,
    /// 0 uses the available parallelism
    pub workers: usize,
    pub progress: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top: 100,
            top_labels: 5,
            workers: 0,
            progress: true,
        }
    }
}

impl InspectConfig {
    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.min_block_duration_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "min_block_duration_ms must be > 0".to_string(),
            ));
        }

        if self.storage.block_range_steps == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "block_range_steps must be > 0".to_string(),
            ));
        }

        if self.storage.block_range_factor < 2 {
            return Err(ConfigValidationError::InvalidValue(
                "block_range_factor must be >= 2".to_string(),
            ));
        }

        if i64::try_from(self.storage.min_block_duration_ms).is_err() {
            return Err(ConfigValidationError::InvalidValue(
                "min_block_duration_ms is out of range".to_string(),
            ));
        }

        if let Some(path) = &self.storage.path {
            if path.as_os_str().is_empty() {
                return Err(ConfigValidationError::InvalidValue(
                    "storage path must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn tsdb_options(&self) -> tsdb::Options {
        let min = i64::try_from(self.storage.min_block_duration_ms).unwrap_or(i64::MAX);
        let factor = i64::try_from(self.storage.block_range_factor).unwrap_or(i64::MAX);
        tsdb::Options {
            block_ranges: tsdb::exponential_block_ranges(min, self.storage.block_range_steps, factor),
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            top: self.report.top,
            top_labels: self.report.top_labels,
            workers: self.report.workers,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValidationError::InvalidValue(msg) => {
                write!(f, "Invalid configuration value: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}
