//! Writes real block directories for tests: `meta.json`, a version 2 index
//! and chunk segments holding XOR or histogram chunks.

#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

pub const BLOCK_A: &str = "01CZWK46GK8BVHQCRNNS763NS3";
pub const BLOCK_B: &str = "01D0BDXPQ3E8RVB0QF4R9S5H6M";
pub const BLOCK_C: &str = "01D0BE3KZ4ZSR8AE2N4ZJ93ZQP";

const SAMPLES_PER_CHUNK: usize = 120;

enum ChunkData {
    Xor(Vec<(i64, f64)>),
    Histogram { min_time: i64, max_time: i64, count: u16 },
}

impl ChunkData {
    fn range(&self) -> (i64, i64) {
        match self {
            ChunkData::Xor(samples) => (samples[0].0, samples[samples.len() - 1].0),
            ChunkData::Histogram {
                min_time, max_time, ..
            } => (*min_time, *max_time),
        }
    }

    fn samples(&self) -> u64 {
        match self {
            ChunkData::Xor(samples) => samples.len() as u64,
            ChunkData::Histogram { count, .. } => u64::from(*count),
        }
    }

    fn encode(&self) -> (u8, Vec<u8>) {
        match self {
            ChunkData::Xor(samples) => (1, encode_xor(samples)),
            ChunkData::Histogram { count, .. } => {
                let mut data = count.to_be_bytes().to_vec();
                data.extend_from_slice(&[0xAB; 6]);
                (2, data)
            }
        }
    }
}

struct SeriesData {
    labels: Vec<(String, String)>,
    chunks: Vec<ChunkData>,
}

pub struct BlockBuilder {
    ulid: String,
    series: Vec<SeriesData>,
    time_range: Option<(i64, i64)>,
    tombstones: u64,
}

impl BlockBuilder {
    pub fn new(ulid: &str) -> Self {
        Self {
            ulid: ulid.to_string(),
            series: Vec::new(),
            time_range: None,
            tombstones: 0,
        }
    }

    /// Float series; samples are cut into chunks of 120
    pub fn series(mut self, labels: &[(&str, &str)], samples: &[(i64, f64)]) -> Self {
        let chunks = samples
            .chunks(SAMPLES_PER_CHUNK)
            .map(|c| ChunkData::Xor(c.to_vec()))
            .collect();
        self.series.push(SeriesData {
            labels: owned(labels),
            chunks,
        });
        self
    }

    pub fn histogram_series(
        mut self,
        labels: &[(&str, &str)],
        min_time: i64,
        max_time: i64,
        count: u16,
    ) -> Self {
        self.series.push(SeriesData {
            labels: owned(labels),
            chunks: vec![ChunkData::Histogram {
                min_time,
                max_time,
                count,
            }],
        });
        self
    }

    /// Override the block time range written to `meta.json`
    pub fn time_range(mut self, min_time: i64, max_time: i64) -> Self {
        self.time_range = Some((min_time, max_time));
        self
    }

    pub fn tombstones(mut self, count: u64) -> Self {
        self.tombstones = count;
        self
    }

    pub fn write(mut self, data_dir: &Path) -> PathBuf {
        let dir = data_dir.join(&self.ulid);
        fs::create_dir_all(dir.join("chunks")).unwrap();

        for s in &mut self.series {
            s.labels.sort();
        }
        self.series.sort_by(|a, b| a.labels.cmp(&b.labels));

        let chunk_refs = write_chunks(&dir.join("chunks").join("000001"), &self.series);
        write_index(&dir.join("index"), &self.series, &chunk_refs);
        self.write_meta(&dir);
        dir
    }

    fn write_meta(&self, dir: &Path) {
        let chunks: Vec<&ChunkData> = self.series.iter().flat_map(|s| &s.chunks).collect();
        let (min_time, max_time) = self.time_range.unwrap_or_else(|| {
            let min = chunks.iter().map(|c| c.range().0).min().unwrap_or(0);
            let max = chunks.iter().map(|c| c.range().1).max().unwrap_or(0);
            (min, max + 1)
        });
        let samples: u64 = chunks.iter().map(|c| c.samples()).sum();

        let meta = serde_json::json!({
            "ulid": self.ulid,
            "minTime": min_time,
            "maxTime": max_time,
            "stats": {
                "numSamples": samples,
                "numSeries": self.series.len(),
                "numChunks": chunks.len(),
                "numTombstones": self.tombstones,
            },
            "compaction": {"level": 1, "sources": [self.ulid]},
            "version": 1,
        });
        fs::write(dir.join("meta.json"), serde_json::to_vec_pretty(&meta).unwrap()).unwrap();
    }
}

fn owned(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

/// Regular scrape samples: `count` points from `start`, `step` apart
pub fn scrape(start: i64, step: i64, count: usize) -> Vec<(i64, f64)> {
    (0..count)
        .map(|i| (start + i as i64 * step, (i % 10) as f64 * 1.5))
        .collect()
}

fn checksum(data: &[u8]) -> [u8; 4] {
    crc::Crc::<u32>::new(&crc::CRC_32_ISCSI)
        .checksum(data)
        .to_be_bytes()
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn put_varint(buf: &mut Vec<u8>, value: i64) {
    put_uvarint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_uvarint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// `len:u32 | payload | crc`
fn put_u32_section(buf: &mut Vec<u8>, payload: &[u8]) {
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum(payload));
}

fn write_chunks(path: &Path, series: &[SeriesData]) -> Vec<Vec<u64>> {
    let mut data = 0x85BD_40DDu32.to_be_bytes().to_vec();
    data.extend_from_slice(&[1, 0, 0, 0]);

    let mut refs = Vec::new();
    for s in series {
        let mut series_refs = Vec::new();
        for chunk in &s.chunks {
            series_refs.push(data.len() as u64);
            let (encoding, payload) = chunk.encode();
            put_uvarint(&mut data, payload.len() as u64);
            let start = data.len();
            data.push(encoding);
            data.extend_from_slice(&payload);
            let sum = checksum(&data[start..]);
            data.extend_from_slice(&sum);
        }
        refs.push(series_refs);
    }
    fs::write(path, data).unwrap();
    refs
}

fn write_index(path: &Path, series: &[SeriesData], chunk_refs: &[Vec<u64>]) {
    let mut buf = 0xBAAA_D700u32.to_be_bytes().to_vec();
    buf.push(2);

    let symbols: Vec<String> = series
        .iter()
        .flat_map(|s| s.labels.iter().flat_map(|(n, v)| [n.clone(), v.clone()]))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let symbol_ref = |s: &str| symbols.binary_search_by(|x| x.as_str().cmp(s)).unwrap() as u64;

    let symbols_offset = buf.len() as u64;
    let mut payload = (symbols.len() as u32).to_be_bytes().to_vec();
    for s in &symbols {
        put_str(&mut payload, s);
    }
    put_u32_section(&mut buf, &payload);

    while buf.len() % 16 != 0 {
        buf.push(0);
    }
    let series_offset = buf.len() as u64;
    let mut series_refs = Vec::new();
    for (s, refs) in series.iter().zip(chunk_refs) {
        while buf.len() % 16 != 0 {
            buf.push(0);
        }
        series_refs.push(buf.len() as u64 / 16);

        let mut payload = Vec::new();
        put_uvarint(&mut payload, s.labels.len() as u64);
        for (name, value) in &s.labels {
            put_uvarint(&mut payload, symbol_ref(name));
            put_uvarint(&mut payload, symbol_ref(value));
        }
        put_uvarint(&mut payload, s.chunks.len() as u64);
        let mut prev: Option<(i64, u64)> = None;
        for (chunk, &chunk_ref) in s.chunks.iter().zip(refs) {
            let (min_time, max_time) = chunk.range();
            match prev {
                None => {
                    put_varint(&mut payload, min_time);
                    put_uvarint(&mut payload, (max_time - min_time) as u64);
                    put_uvarint(&mut payload, chunk_ref);
                }
                Some((prev_max, prev_ref)) => {
                    put_uvarint(&mut payload, (min_time - prev_max) as u64);
                    put_uvarint(&mut payload, (max_time - min_time) as u64);
                    put_varint(&mut payload, chunk_ref as i64 - prev_ref as i64);
                }
            }
            prev = Some((max_time, chunk_ref));
        }

        put_uvarint(&mut buf, payload.len() as u64);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&checksum(&payload));
    }

    // label -> value -> series refs, with the all-postings key first
    let mut postings: Vec<((String, String), Vec<u64>)> =
        vec![((String::new(), String::new()), series_refs.clone())];
    let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();
    for s in series {
        pairs.extend(s.labels.iter().cloned());
    }
    for pair in pairs {
        let refs = series
            .iter()
            .zip(&series_refs)
            .filter(|(s, _)| s.labels.contains(&pair))
            .map(|(_, r)| *r)
            .collect();
        postings.push((pair, refs));
    }

    let postings_offset = buf.len() as u64;
    let mut table_entries = Vec::new();
    for ((name, value), refs) in &postings {
        table_entries.push((name.clone(), value.clone(), buf.len() as u64));
        let mut payload = (refs.len() as u32).to_be_bytes().to_vec();
        for r in refs {
            payload.extend_from_slice(&(*r as u32).to_be_bytes());
        }
        put_u32_section(&mut buf, &payload);
    }

    let postings_table_offset = buf.len() as u64;
    let mut payload = (table_entries.len() as u32).to_be_bytes().to_vec();
    for (name, value, offset) in &table_entries {
        put_uvarint(&mut payload, 2);
        put_str(&mut payload, name);
        put_str(&mut payload, value);
        put_uvarint(&mut payload, *offset);
    }
    put_u32_section(&mut buf, &payload);

    let mut toc = Vec::new();
    for offset in [
        symbols_offset,
        series_offset,
        0,
        0,
        postings_offset,
        postings_table_offset,
    ] {
        toc.extend_from_slice(&offset.to_be_bytes());
    }
    buf.extend_from_slice(&toc);
    buf.extend_from_slice(&checksum(&toc));

    fs::write(path, buf).unwrap();
}

struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    fn bit(&mut self, bit: bool) {
        if self.bits % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.bits % 8);
        }
        self.bits += 1;
    }

    fn bits(&mut self, value: u64, count: u8) {
        for i in (0..count).rev() {
            self.bit((value >> i) & 1 == 1);
        }
    }

    fn uvarint(&mut self, value: u64) {
        let mut bytes = Vec::new();
        put_uvarint(&mut bytes, value);
        for b in bytes {
            self.bits(u64::from(b), 8);
        }
    }
}

/// XOR chunk encoding; every changed value declares a fresh bit window
pub fn encode_xor(samples: &[(i64, f64)]) -> Vec<u8> {
    let mut w = BitWriter {
        bytes: Vec::new(),
        bits: 0,
    };
    let (mut prev_t, mut prev_delta, mut prev_bits) = (0i64, 0i64, 0u64);

    for (i, &(t, v)) in samples.iter().enumerate() {
        match i {
            0 => {
                let mut varint = Vec::new();
                put_varint(&mut varint, t);
                for b in varint {
                    w.bits(u64::from(b), 8);
                }
                w.bits(v.to_bits(), 64);
            }
            1 => {
                prev_delta = t - prev_t;
                w.uvarint(prev_delta as u64);
            }
            _ => {
                let delta = t - prev_t;
                let dod = delta - prev_delta;
                let fits = |n: u32| -(1i64 << (n - 1)) < dod && dod <= 1i64 << (n - 1);
                if dod == 0 {
                    w.bit(false);
                } else if fits(14) {
                    w.bits(0b10, 2);
                    w.bits(dod as u64 & 0x3FFF, 14);
                } else if fits(17) {
                    w.bits(0b110, 3);
                    w.bits(dod as u64 & 0x1FFFF, 17);
                } else if fits(20) {
                    w.bits(0b1110, 4);
                    w.bits(dod as u64 & 0xFFFFF, 20);
                } else {
                    w.bits(0b1111, 4);
                    w.bits(dod as u64, 64);
                }
                prev_delta = delta;
            }
        }

        if i > 0 {
            let xor = v.to_bits() ^ prev_bits;
            if xor == 0 {
                w.bit(false);
            } else {
                let leading = (xor.leading_zeros() as u8).min(31);
                let trailing = xor.trailing_zeros() as u8;
                let significant = 64 - leading - trailing;
                w.bits(0b11, 2);
                w.bits(u64::from(leading), 5);
                w.bits(u64::from(significant % 64), 6);
                w.bits(xor >> trailing, significant);
            }
        }

        prev_t = t;
        prev_bits = v.to_bits();
    }

    let mut out = (samples.len() as u16).to_be_bytes().to_vec();
    out.extend_from_slice(&w.bytes);
    out
}
