//! Error types for the tsdbinfo command line
//!
//! Usage errors stop a command before the storage is touched. Everything the
//! block reader reports is fatal and carries the step that failed.

use crate::tsdb::TsdbError;
use std::fmt;
use std::path::PathBuf;

/// Root error type for all tsdbinfo operations
#[derive(Debug)]
pub enum TsdbInfoError {
    /// Missing or invalid command line input
    Usage(UsageError),

    /// Configuration file errors
    Configuration(ConfigurationError),

    /// The storage directory could not be opened
    Storage { path: PathBuf, source: TsdbError },

    /// Reading a block failed mid-command
    Query { context: String, source: TsdbError },

    /// Writing the report failed
    Output(std::io::Error),
}

/// Command line input errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    MissingStoragePath,
    MissingBlock,
    MissingMetric,
    BlockNotFound(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    LoadFailed { path: PathBuf, reason: String },
    ValidationFailed(String),
}

impl TsdbInfoError {
    pub fn query(context: impl Into<String>, source: TsdbError) -> Self {
        TsdbInfoError::Query {
            context: context.into(),
            source,
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TsdbInfoError::Usage(UsageError::MissingStoragePath) => 1,
            TsdbInfoError::Usage(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for TsdbInfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsdbInfoError::Usage(e) => write!(f, "{}", e),
            TsdbInfoError::Configuration(e) => write!(f, "configuration error: {}", e),
            TsdbInfoError::Storage { path, source } => {
                write!(f, "opening storage {} failed: {}", path.display(), source)
            }
            TsdbInfoError::Query { context, source } => write!(f, "{}: {}", context, source),
            TsdbInfoError::Output(e) => write!(f, "writing output failed: {}", e),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::MissingStoragePath => write!(f, "set --storage.tsdb.path"),
            UsageError::MissingBlock => write!(f, "set --block"),
            UsageError::MissingMetric => write!(f, "set --metric"),
            UsageError::BlockNotFound(id) => write!(f, "can't find block with id {}", id),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::LoadFailed { path, reason } => {
                write!(f, "failed to load {}: {}", path.display(), reason)
            }
            ConfigurationError::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for TsdbInfoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TsdbInfoError::Usage(e) => Some(e),
            TsdbInfoError::Configuration(e) => Some(e),
            TsdbInfoError::Storage { source, .. } | TsdbInfoError::Query { source, .. } => {
                Some(source)
            }
            TsdbInfoError::Output(e) => Some(e),
        }
    }
}

impl std::error::Error for UsageError {}
impl std::error::Error for ConfigurationError {}

impl From<UsageError> for TsdbInfoError {
    fn from(e: UsageError) -> Self {
        TsdbInfoError::Usage(e)
    }
}

impl From<ConfigurationError> for TsdbInfoError {
    fn from(e: ConfigurationError) -> Self {
        TsdbInfoError::Configuration(e)
    }
}

impl From<crate::config::ConfigValidationError> for TsdbInfoError {
    fn from(e: crate::config::ConfigValidationError) -> Self {
        TsdbInfoError::Configuration(ConfigurationError::ValidationFailed(e.to_string()))
    }
}

impl From<std::io::Error> for TsdbInfoError {
    fn from(e: std::io::Error) -> Self {
        TsdbInfoError::Output(e)
    }
}

pub type TsdbInfoResult<T> = Result<T, TsdbInfoError>;
