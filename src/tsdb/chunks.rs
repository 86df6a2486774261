//! Chunk segment files
//!
//! `chunks/000001`, `chunks/000002`, ... each start with an 8-byte header
//! (magic, format version, padding). A chunk reference packs the segment
//! sequence number into the upper 32 bits and the byte offset into the lower
//! 32 bits. Each chunk is `uvarint(len) | encoding | data | crc32`, the
//! checksum covering the encoding byte and the data.

use super::{
    encoding::{checksum, Decbuf},
    error::{TsdbError, TsdbResult},
    map_file,
};
use memmap2::Mmap;
use std::{fmt, fs, path::PathBuf};

pub const SEGMENT_MAGIC: u32 = 0x85BD_40DD;
pub const SEGMENT_FORMAT_V1: u8 = 1;
pub const SEGMENT_HEADER_LEN: usize = 8;

/// Reference to one chunk of a series, as stored in the index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkMeta {
    pub min_time: i64,
    pub max_time: i64,
    pub chunk_ref: u64,
}

impl ChunkMeta {
    pub fn overlaps(&self, mint: i64, maxt: i64) -> bool {
        self.min_time <= maxt && mint <= self.max_time
    }

    pub fn within(&self, mint: i64, maxt: i64) -> bool {
        mint <= self.min_time && self.max_time <= maxt
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Xor,
    Histogram,
    FloatHistogram,
}

impl TryFrom<u8> for Encoding {
    type Error = TsdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Encoding::Xor),
            2 => Ok(Encoding::Histogram),
            3 => Ok(Encoding::FloatHistogram),
            other => Err(TsdbError::UnsupportedEncoding(other)),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Xor => write!(f, "XOR"),
            Encoding::Histogram => write!(f, "histogram"),
            Encoding::FloatHistogram => write!(f, "floathistogram"),
        }
    }
}

/// Encoded chunk borrowed from a mapped segment
#[derive(Clone, Copy, Debug)]
pub struct Chunk<'a> {
    pub encoding: Encoding,
    pub data: &'a [u8],
}

impl Chunk<'_> {
    /// Sample count from the 2-byte header every encoding starts with
    pub fn num_samples(&self) -> TsdbResult<u16> {
        match self.data {
            [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
            _ => Err(TsdbError::corrupted("chunk", "missing sample count header")),
        }
    }
}

pub struct ChunkReader {
    dir: PathBuf,
    segments: Vec<Mmap>,
}

impl fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkReader")
            .field("dir", &self.dir)
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl ChunkReader {
    pub fn open(dir: impl Into<PathBuf>) -> TsdbResult<Self> {
        let dir = dir.into();
        let mut files: Vec<(u64, PathBuf)> = Vec::new();

        let entries = fs::read_dir(&dir).map_err(|e| TsdbError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| TsdbError::io(&dir, e))?;
            let path = entry.path();
            let sequence = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(sequence) = sequence {
                files.push((sequence, path));
            }
        }
        files.sort_by_key(|(sequence, _)| *sequence);

        let mut segments = Vec::with_capacity(files.len());
        for (_, path) in &files {
            let data = map_file(path)?;
            validate_segment_header(&data)?;
            segments.push(data);
        }

        tracing::debug!(dir = %dir.display(), segments = segments.len(), "chunk segments mapped");

        Ok(Self { dir, segments })
    }

    pub fn chunk(&self, chunk_ref: u64) -> TsdbResult<Chunk<'_>> {
        let sequence = (chunk_ref >> 32) as usize;
        let offset = (chunk_ref & 0xFFFF_FFFF) as usize;

        let segment = self
            .segments
            .get(sequence)
            .ok_or(TsdbError::ChunkNotFound(chunk_ref))?;
        if offset < SEGMENT_HEADER_LEN || offset >= segment.len() {
            return Err(TsdbError::ChunkNotFound(chunk_ref));
        }

        let mut d = Decbuf::new(&segment[offset..], "chunk");
        let len = d.uvarint()? as usize;
        let body = d.take(len + 1)?;
        let expected = d.be32()?;
        let actual = checksum(body);
        if expected != actual {
            return Err(TsdbError::ChecksumMismatch {
                what: "chunk",
                expected,
                actual,
            });
        }

        Ok(Chunk {
            encoding: Encoding::try_from(body[0])?,
            data: &body[1..],
        })
    }
}

fn validate_segment_header(data: &[u8]) -> TsdbResult<()> {
    let mut d = Decbuf::new(data, "chunk segment header");
    let magic = d.be32()?;
    if magic != SEGMENT_MAGIC {
        return Err(TsdbError::corrupted(
            "chunk segment header",
            format!("invalid magic number {:#010x}", magic),
        ));
    }
    let version = d.byte()?;
    if version != SEGMENT_FORMAT_V1 {
        return Err(TsdbError::UnsupportedVersion {
            what: "chunk segment",
            version,
        });
    }
    d.skip(SEGMENT_HEADER_LEN - 5)
}
