//! Block listing

use crate::tsdb::Db;
use ulid::Ulid;

/// One line of the block listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRow {
    pub id: Ulid,
    pub min_time: i64,
    pub max_time: i64,
    /// Block stats as compact JSON, zero counters omitted
    pub stats: String,
}

/// Every block of the database in time order
pub fn list_blocks(db: &Db) -> Vec<BlockRow> {
    db.blocks()
        .iter()
        .map(|block| {
            let meta = block.meta();
            BlockRow {
                id: meta.ulid,
                min_time: meta.min_time,
                max_time: meta.max_time,
                stats: meta.stats.to_compact_json(),
            }
        })
        .collect()
}
