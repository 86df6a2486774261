//! Block directories and their metadata
//!
//! A block is a directory named by its ULID holding `meta.json`, an `index`
//! file and a `chunks/` directory of segment files. Only `meta.json` is read
//! when the database opens; the index and chunk files are mapped the first
//! time the block is queried.

use super::{
    chunks::ChunkReader,
    error::{TsdbError, TsdbResult},
    index::IndexReader,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use ulid::Ulid;

pub const META_FILENAME: &str = "meta.json";
pub const INDEX_FILENAME: &str = "index";
pub const CHUNKS_DIRNAME: &str = "chunks";

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Summary counters stored in `meta.json`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_samples: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_float_samples: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_histogram_samples: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_series: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_chunks: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_tombstones: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_bytes: u64,
}

impl BlockStats {
    /// Compact JSON with zero counters omitted, e.g. `{"numBytes":8634}`
    pub fn to_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCompaction {
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub sources: Vec<Ulid>,
}

/// Contents of a block's `meta.json`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMeta {
    pub ulid: Ulid,
    /// Inclusive lower bound, milliseconds since the epoch
    pub min_time: i64,
    /// Upper bound, milliseconds since the epoch
    pub max_time: i64,
    #[serde(default)]
    pub stats: BlockStats,
    #[serde(default)]
    pub compaction: BlockCompaction,
    #[serde(default)]
    pub version: u32,
}

impl BlockMeta {
    pub fn read(dir: &Path) -> TsdbResult<Self> {
        let path = dir.join(META_FILENAME);
        let raw = fs::read(&path).map_err(|e| TsdbError::io(&path, e))?;
        let meta: BlockMeta =
            serde_json::from_slice(&raw).map_err(|e| TsdbError::InvalidMeta {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if meta.min_time > meta.max_time {
            return Err(TsdbError::InvalidMeta {
                path,
                reason: format!(
                    "minTime {} is after maxTime {}",
                    meta.min_time, meta.max_time
                ),
            });
        }

        Ok(meta)
    }

    pub fn duration_ms(&self) -> i64 {
        self.max_time - self.min_time
    }

    pub fn overlaps(&self, mint: i64, maxt: i64) -> bool {
        self.min_time <= maxt && mint <= self.max_time
    }
}

/// An opened block; readers are initialized on first use
#[derive(Debug)]
pub struct Block {
    dir: PathBuf,
    meta: BlockMeta,
    index: OnceCell<IndexReader>,
    chunks: OnceCell<ChunkReader>,
}

impl Block {
    pub fn open(dir: impl Into<PathBuf>) -> TsdbResult<Self> {
        let dir = dir.into();
        let meta = BlockMeta::read(&dir)?;
        Ok(Self {
            dir,
            meta,
            index: OnceCell::new(),
            chunks: OnceCell::new(),
        })
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    pub fn id(&self) -> Ulid {
        self.meta.ulid
    }

    pub fn index(&self) -> TsdbResult<&IndexReader> {
        self.index.get_or_try_init(|| {
            tracing::debug!(block = %self.meta.ulid, "opening block index");
            IndexReader::open(self.dir.join(INDEX_FILENAME))
        })
    }

    pub fn chunks(&self) -> TsdbResult<&ChunkReader> {
        self.chunks.get_or_try_init(|| {
            tracing::debug!(block = %self.meta.ulid, "opening block chunks");
            ChunkReader::open(self.dir.join(CHUNKS_DIRNAME))
        })
    }

    pub fn has_tombstones(&self) -> bool {
        self.meta.stats.num_tombstones > 0
    }
}

/// Block directories are named by a ULID and contain `meta.json`
pub fn is_block_dir(path: &Path) -> bool {
    let named_by_ulid = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| Ulid::from_string(n).is_ok())
        .unwrap_or(false);

    named_by_ulid && path.is_dir() && path.join(META_FILENAME).is_file()
}
