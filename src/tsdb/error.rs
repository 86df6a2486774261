//! Errors raised while reading block files

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TsdbError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("invalid block meta {path}: {reason}")]
    InvalidMeta { path: PathBuf, reason: String },

    #[error("corrupted {what}: {reason}")]
    Corrupted { what: &'static str, reason: String },

    #[error("checksum mismatch in {what}: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: u8 },

    #[error("unsupported chunk encoding {0}")]
    UnsupportedEncoding(u8),

    #[error("series {0} not found in index")]
    SeriesNotFound(u64),

    #[error("chunk reference {0:#x} out of range")]
    ChunkNotFound(u64),
}

impl TsdbError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TsdbError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupted(what: &'static str, reason: impl Into<String>) -> Self {
        TsdbError::Corrupted {
            what,
            reason: reason.into(),
        }
    }
}

pub type TsdbResult<T> = Result<T, TsdbError>;
