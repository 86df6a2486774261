//! Block index reader
//!
//! Layout of an index file:
//!
//! ```text
//! magic(4) version(1) | symbols | series... | label indices | postings... |
//! label offset table | postings offset table | TOC
//! ```
//!
//! The TOC is the last 52 bytes: six big-endian u64 section offsets followed by
//! a CRC32. Version 1 indexes reference symbols and series by byte offset;
//! version 2 references symbols by sequence number and series by offset / 16.

use super::{
    chunks::ChunkMeta,
    encoding::{checksum, Decbuf},
    error::{TsdbError, TsdbResult},
    labels::{Label, Labels, Matcher},
    map_file,
};
use memmap2::Mmap;
use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
};

pub const INDEX_MAGIC: u32 = 0xBAAA_D700;
pub const INDEX_VERSION_1: u8 = 1;
pub const INDEX_VERSION_2: u8 = 2;

const HEADER_LEN: usize = 5;
const TOC_LEN: usize = 6 * 8 + 4;
const SERIES_ALIGNMENT: u64 = 16;

/// Section offsets from the table of contents the reader needs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Toc {
    symbols: u64,
    series: u64,
    postings_table: u64,
}

impl Toc {
    fn read(data: &[u8]) -> TsdbResult<Self> {
        if data.len() < HEADER_LEN + TOC_LEN {
            return Err(TsdbError::corrupted(
                "index",
                format!("{} bytes is too small for an index", data.len()),
            ));
        }

        let raw = &data[data.len() - TOC_LEN..];
        let (body, crc) = raw.split_at(TOC_LEN - 4);
        let mut crc_buf = Decbuf::new(crc, "index TOC");
        let expected = crc_buf.be32()?;
        let actual = checksum(body);
        if expected != actual {
            return Err(TsdbError::ChecksumMismatch {
                what: "index TOC",
                expected,
                actual,
            });
        }

        let mut d = Decbuf::new(body, "index TOC");
        let symbols = d.be64()?;
        let series = d.be64()?;
        // Label indices, their offset table and the postings start are unused
        for _ in 0..3 {
            d.be64()?;
        }
        Ok(Self {
            symbols,
            series,
            postings_table: d.be64()?,
        })
    }
}

/// Symbol table; v1 indexes address symbols by file offset
#[derive(Debug, Default)]
struct Symbols {
    values: Vec<String>,
    by_offset: Option<HashMap<u64, u32>>,
}

impl Symbols {
    fn read(data: &[u8], offset: u64, version: u8) -> TsdbResult<Self> {
        let mut d = Decbuf::at_u32_len(data, offset as usize, "symbol table")?;
        let payload_len = d.len();
        let count = d.be32()? as usize;
        // The payload starts after the 4-byte length prefix
        let base = offset + 4;

        let mut values = Vec::with_capacity(count);
        let mut by_offset = (version == INDEX_VERSION_1).then(HashMap::new);

        for i in 0..count {
            let position = base + (payload_len - d.len()) as u64;
            values.push(d.uvarint_str()?.to_string());
            if let Some(map) = by_offset.as_mut() {
                map.insert(position, i as u32);
            }
        }

        Ok(Self { values, by_offset })
    }

    fn lookup(&self, reference: u32) -> TsdbResult<&str> {
        let index = match &self.by_offset {
            Some(map) => *map.get(&u64::from(reference)).ok_or_else(|| {
                TsdbError::corrupted("symbol table", format!("no symbol at offset {}", reference))
            })? as usize,
            None => reference as usize,
        };

        self.values
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| TsdbError::corrupted("symbol table", format!("symbol {} out of range", reference)))
    }
}

/// Read-only view of a block index
pub struct IndexReader {
    path: PathBuf,
    data: Mmap,
    version: u8,
    toc: Toc,
    symbols: Symbols,
    /// label name -> sorted (value, postings list offset)
    postings: BTreeMap<String, Vec<(String, u64)>>,
}

impl std::fmt::Debug for IndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexReader")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("symbols", &self.symbols.values.len())
            .field("label_names", &self.postings.len())
            .finish()
    }
}

impl IndexReader {
    pub fn open(path: impl Into<PathBuf>) -> TsdbResult<Self> {
        let path = path.into();
        let data = map_file(&path)?;
        let version = read_header(&data)?;
        let toc = Toc::read(&data)?;
        let symbols = Symbols::read(&data, toc.symbols, version)?;
        let postings = read_postings_table(&data, toc.postings_table)?;

        tracing::debug!(
            path = %path.display(),
            version,
            symbols = symbols.values.len(),
            label_names = postings.len(),
            "index opened"
        );

        Ok(Self {
            path,
            data,
            version,
            toc,
            symbols,
            postings,
        })
    }

    /// Every value of `name` present in the index, sorted
    pub fn label_values(&self, name: &str) -> Vec<String> {
        if name.is_empty() {
            return Vec::new();
        }
        self.postings
            .get(name)
            .map(|values| values.iter().map(|(v, _)| v.clone()).collect())
            .unwrap_or_default()
    }

    /// Sorted series references for `name="value"`; empty when absent
    pub fn postings(&self, name: &str, value: &str) -> TsdbResult<Vec<u64>> {
        let Some(values) = self.postings.get(name) else {
            return Ok(Vec::new());
        };
        match values.binary_search_by(|(v, _)| v.as_str().cmp(value)) {
            Ok(i) => self.read_postings(values[i].1),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// References of every series in the index
    pub fn all_postings(&self) -> TsdbResult<Vec<u64>> {
        self.postings("", "")
    }

    /// Series references matching all of `matchers`
    pub fn postings_for_matchers(&self, matchers: &[Matcher]) -> TsdbResult<Vec<u64>> {
        let mut result: Option<Vec<u64>> = None;

        for matcher in matchers {
            let list = if matcher.value.is_empty() {
                // Matches series that lack the label entirely
                let mut with_label = Vec::new();
                for value in self.label_values(&matcher.name) {
                    with_label = merge(&with_label, &self.postings(&matcher.name, &value)?);
                }
                without(&self.all_postings()?, &with_label)
            } else {
                self.postings(&matcher.name, &matcher.value)?
            };

            result = Some(match result {
                Some(acc) => intersect(&acc, &list),
                None => list,
            });
        }

        Ok(result.unwrap_or_default())
    }

    /// Label set and chunk metadata of one series
    pub fn series(&self, reference: u64) -> TsdbResult<(Labels, Vec<ChunkMeta>)> {
        let offset = match self.version {
            INDEX_VERSION_1 => reference,
            _ => reference * SERIES_ALIGNMENT,
        };
        if offset < self.toc.series || offset as usize >= self.data.len() {
            return Err(TsdbError::SeriesNotFound(reference));
        }

        let mut d = Decbuf::at_uvarint_len(&self.data, offset as usize, "series")?;

        let label_count = d.uvarint()? as usize;
        let mut labels = Vec::with_capacity(label_count);
        for _ in 0..label_count {
            let name = self.symbols.lookup(d.uvarint32()?)?;
            let value = self.symbols.lookup(d.uvarint32()?)?;
            labels.push(Label::new(name, value));
        }

        let chunk_count = d.uvarint()? as usize;
        let mut chunks = Vec::with_capacity(chunk_count);
        if chunk_count > 0 {
            let min_time = d.varint()?;
            let max_time = min_time + d.uvarint()? as i64;
            let mut chunk_ref = d.uvarint()?;
            chunks.push(ChunkMeta {
                min_time,
                max_time,
                chunk_ref,
            });

            let mut prev_max = max_time;
            for _ in 1..chunk_count {
                let min_time = prev_max + d.uvarint()? as i64;
                let max_time = min_time + d.uvarint()? as i64;
                chunk_ref = chunk_ref.wrapping_add(d.varint()? as u64);
                chunks.push(ChunkMeta {
                    min_time,
                    max_time,
                    chunk_ref,
                });
                prev_max = max_time;
            }
        }

        Ok((Labels::new(labels), chunks))
    }

    fn read_postings(&self, offset: u64) -> TsdbResult<Vec<u64>> {
        let mut d = Decbuf::at_u32_len(&self.data, offset as usize, "postings")?;
        let count = d.be32()? as usize;
        if d.len() != count * 4 {
            return Err(TsdbError::corrupted(
                "postings",
                format!("{} entries declared, {} bytes present", count, d.len()),
            ));
        }
        (0..count).map(|_| d.be32().map(u64::from)).collect()
    }
}

fn read_header(data: &[u8]) -> TsdbResult<u8> {
    let mut d = Decbuf::new(data, "index header");
    let magic = d.be32()?;
    if magic != INDEX_MAGIC {
        return Err(TsdbError::corrupted(
            "index header",
            format!("invalid magic number {:#010x}", magic),
        ));
    }
    match d.byte()? {
        v @ (INDEX_VERSION_1 | INDEX_VERSION_2) => Ok(v),
        v => Err(TsdbError::UnsupportedVersion {
            what: "index",
            version: v,
        }),
    }
}

fn read_postings_table(
    data: &[u8],
    offset: u64,
) -> TsdbResult<BTreeMap<String, Vec<(String, u64)>>> {
    let mut table: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
    let mut d = Decbuf::at_u32_len(data, offset as usize, "postings offset table")?;
    let count = d.be32()?;

    for _ in 0..count {
        let keys = d.uvarint()?;
        if keys != 2 {
            return Err(TsdbError::corrupted(
                "postings offset table",
                format!("unexpected key count {}", keys),
            ));
        }
        let name = d.uvarint_str()?;
        let value = d.uvarint_str()?.to_string();
        let postings_offset = d.uvarint()?;
        table
            .entry(name.to_string())
            .or_default()
            .push((value, postings_offset));
    }

    // Entries are written sorted; sort anyway so lookups can binary search
    for values in table.values_mut() {
        values.sort_by(|a, b| a.0.cmp(&b.0));
    }

    Ok(table)
}

fn intersect(a: &[u64], b: &[u64]) -> Vec<u64> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn merge(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out: Vec<u64> = a.iter().chain(b.iter()).copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}

fn without(all: &[u64], remove: &[u64]) -> Vec<u64> {
    all.iter()
        .copied()
        .filter(|r| remove.binary_search(r).is_err())
        .collect()
}
