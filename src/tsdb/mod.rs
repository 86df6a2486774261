//! Read-only access to a Prometheus TSDB data directory
//!
//! Only persisted blocks are read. The write-ahead log, head chunks and
//! tombstone contents are left alone; the directory is never written to.

pub mod block;
pub mod chunks;
pub mod encoding;
pub mod error;
pub mod index;
pub mod labels;
pub mod querier;
pub mod xor;

pub use block::{Block, BlockMeta, BlockStats};
pub use error::{TsdbError, TsdbResult};
pub use labels::{Label, Labels, Matcher, METRIC_NAME};
pub use querier::{Querier, Sample, Series};

use memmap2::Mmap;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use ulid::Ulid;

const HOUR_MS: i64 = 60 * 60 * 1000;

/// `steps` block ranges starting at `min_size`, each `step_size` times the
/// previous one
pub fn exponential_block_ranges(min_size: i64, steps: usize, step_size: i64) -> Vec<i64> {
    let mut ranges = Vec::with_capacity(steps);
    let mut current = min_size;
    for _ in 0..steps {
        ranges.push(current);
        current = current.saturating_mul(step_size);
    }
    ranges
}

/// Options the database is opened with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Compaction block ranges in milliseconds, ascending
    pub block_ranges: Vec<i64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_ranges: exponential_block_ranges(2 * HOUR_MS, 10, 3),
        }
    }
}

impl Options {
    pub fn min_block_duration(&self) -> i64 {
        self.block_ranges.first().copied().unwrap_or(0)
    }

    pub fn max_block_duration(&self) -> i64 {
        self.block_ranges.last().copied().unwrap_or(0)
    }
}

/// Handle over an opened data directory
#[derive(Debug)]
pub struct Db {
    dir: PathBuf,
    options: Options,
    blocks: Vec<Block>,
}

impl Db {
    /// Open the data directory and load every block's metadata
    pub fn open(dir: impl AsRef<Path>, options: Options) -> TsdbResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let metadata = fs::metadata(&dir).map_err(|e| TsdbError::io(&dir, e))?;
        if !metadata.is_dir() {
            return Err(TsdbError::NotADirectory(dir));
        }

        let mut blocks = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| TsdbError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| TsdbError::io(&dir, e))?.path();
            if block::is_block_dir(&path) {
                blocks.push(Block::open(path)?);
            }
        }
        blocks.sort_by_key(|b| (b.meta().min_time, b.id()));

        // Head data is not persisted into blocks yet and is never read
        for head in ["wal", "chunks_head"] {
            if dir.join(head).is_dir() {
                tracing::debug!(dir = head, "skipping head data");
            }
        }

        let db = Self {
            dir,
            options,
            blocks,
        };
        db.report_block_layout();

        tracing::info!(
            dir = %db.dir.display(),
            blocks = db.blocks.len(),
            min_block_duration_ms = db.options.min_block_duration(),
            max_block_duration_ms = db.options.max_block_duration(),
            "storage opened"
        );

        Ok(db)
    }

    /// Blocks in ascending time order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: &str) -> Option<&Block> {
        let id = Ulid::from_string(id).ok()?;
        self.blocks.iter().find(|b| b.id() == id)
    }

    /// Querier over every block overlapping `[mint, maxt]`
    pub fn querier(&self, mint: i64, maxt: i64) -> Querier<'_> {
        let blocks = self
            .blocks
            .iter()
            .filter(|b| b.meta().overlaps(mint, maxt))
            .collect();
        Querier::new(blocks, mint, maxt)
    }

    fn report_block_layout(&self) {
        let max_duration = self.options.max_block_duration();

        for block in &self.blocks {
            let meta = block.meta();
            if max_duration > 0 && meta.duration_ms() > max_duration {
                tracing::warn!(
                    block = %meta.ulid,
                    duration_ms = meta.duration_ms(),
                    max_block_duration_ms = max_duration,
                    "block spans more than the maximum block range"
                );
            }
            if block.has_tombstones() {
                tracing::warn!(
                    block = %meta.ulid,
                    tombstones = meta.stats.num_tombstones,
                    "block has tombstones; deleted samples are still counted"
                );
            }
        }

        for (block, overlapping) in overlapping_blocks(self.blocks.iter().map(Block::meta)) {
            tracing::warn!(block = %block, overlapping = %overlapping, "overlapping blocks");
        }
    }
}

/// Pairs of overlapping blocks, given metas sorted by `min_time`. Each block
/// is paired with the block reaching furthest among those before it.
fn overlapping_blocks<'a>(metas: impl IntoIterator<Item = &'a BlockMeta>) -> Vec<(Ulid, Ulid)> {
    let mut pairs = Vec::new();
    let mut furthest: Option<&BlockMeta> = None;
    for meta in metas {
        if let Some(prev) = furthest {
            // Block ranges are half-open
            if meta.min_time < prev.max_time {
                pairs.push((prev.ulid, meta.ulid));
            }
        }
        if furthest.map_or(true, |prev| meta.max_time > prev.max_time) {
            furthest = Some(meta);
        }
    }
    pairs
}

/// Map a file read-only
pub(crate) fn map_file(path: &Path) -> TsdbResult<Mmap> {
    let file = File::open(path).map_err(|e| TsdbError::io(path, e))?;
    // SAFETY: block files are immutable once written; the tool only reads
    // directories whose blocks are not being rewritten underneath it.
    unsafe { Mmap::map(&file) }.map_err(|e| TsdbError::io(path, e))
}
