//! Range queries across blocks
//!
//! A querier covers every block overlapping `[mint, maxt]`. Series with the
//! same label set in several blocks are merged into one series whose chunks
//! are ordered by start time. Chunks whose time ranges overlap are read
//! together and merged by timestamp, so a sample present in several blocks
//! is counted once.

use super::{
    block::Block,
    chunks::{ChunkMeta, Encoding},
    error::TsdbResult,
    labels::{Labels, Matcher},
    xor::XorIterator,
};
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashSet},
    ops::Range,
};

/// One decoded sample. Histogram chunks are counted from their header and
/// their samples carry no decoded payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Float { timestamp: i64, value: f64 },
    Histogram,
}

pub struct Querier<'a> {
    blocks: Vec<&'a Block>,
    mint: i64,
    maxt: i64,
}

impl<'a> Querier<'a> {
    pub(crate) fn new(blocks: Vec<&'a Block>, mint: i64, maxt: i64) -> Self {
        Self { blocks, mint, maxt }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Series matching all matchers with at least one chunk in range,
    /// sorted by label set
    pub fn select(&self, matchers: &[Matcher]) -> TsdbResult<Vec<Series<'a>>> {
        let mut merged: BTreeMap<Labels, Vec<(&'a Block, ChunkMeta)>> = BTreeMap::new();

        for &block in &self.blocks {
            let index = block.index()?;
            for reference in index.postings_for_matchers(matchers)? {
                let (labels, chunks) = index.series(reference)?;
                let in_range: Vec<(&'a Block, ChunkMeta)> = chunks
                    .into_iter()
                    .filter(|c| c.overlaps(self.mint, self.maxt))
                    .map(|c| (block, c))
                    .collect();
                if in_range.is_empty() {
                    continue;
                }
                merged.entry(labels).or_default().extend(in_range);
            }
        }

        Ok(merged
            .into_iter()
            .map(|(labels, mut chunks)| {
                chunks.sort_by_key(|(_, c)| (c.min_time, c.max_time));
                let groups = overlap_groups(chunks.iter().map(|(_, c)| c));
                Series {
                    labels,
                    chunks,
                    groups,
                    mint: self.mint,
                    maxt: self.maxt,
                }
            })
            .collect())
    }
}

/// Split chunks sorted by `min_time` into runs whose ranges chain together
/// through overlaps. Ranges are inclusive.
fn overlap_groups<'c>(chunks: impl IntoIterator<Item = &'c ChunkMeta>) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut group_max = i64::MIN;
    let mut len = 0;

    for (i, meta) in chunks.into_iter().enumerate() {
        if i > start && meta.min_time > group_max {
            groups.push(start..i);
            start = i;
        }
        group_max = if i == start {
            meta.max_time
        } else {
            group_max.max(meta.max_time)
        };
        len = i + 1;
    }
    if start < len {
        groups.push(start..len);
    }
    groups
}

pub struct Series<'a> {
    labels: Labels,
    chunks: Vec<(&'a Block, ChunkMeta)>,
    groups: Vec<Range<usize>>,
    mint: i64,
    maxt: i64,
}

impl<'a> Series<'a> {
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Fresh iterator from the first sample in range
    pub fn iter(&self) -> SeriesIterator<'_> {
        SeriesIterator {
            chunks: &self.chunks,
            groups: self.groups.iter(),
            current: None,
            mint: self.mint,
            maxt: self.maxt,
            done: false,
        }
    }

    /// Drain the sample iterator, counting samples in range
    pub fn count_samples(&self) -> TsdbResult<u64> {
        let mut count = 0;
        for sample in self.iter() {
            sample?;
            count += 1;
        }
        Ok(count)
    }
}

/// Float samples of several chunks in timestamp order. A timestamp present in
/// more than one chunk is yielded once, with the value of the chunk that
/// starts first.
struct MergedSamples<'a> {
    sources: Vec<XorIterator<'a>>,
    values: Vec<f64>,
    heads: BinaryHeap<Reverse<(i64, usize)>>,
    primed: bool,
}

impl<'a> MergedSamples<'a> {
    fn new(sources: Vec<XorIterator<'a>>) -> Self {
        Self {
            values: vec![0.0; sources.len()],
            heads: BinaryHeap::with_capacity(sources.len()),
            sources,
            primed: false,
        }
    }

    fn advance(&mut self, source: usize) -> TsdbResult<()> {
        if let Some(sample) = self.sources[source].next() {
            let (timestamp, value) = sample?;
            self.values[source] = value;
            self.heads.push(Reverse((timestamp, source)));
        }
        Ok(())
    }

    fn next_sample(&mut self) -> TsdbResult<Option<(i64, f64)>> {
        // A lone chunk is already ordered
        if let [only] = self.sources.as_mut_slice() {
            return only.next().transpose();
        }

        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.advance(source)?;
            }
        }

        let Some(Reverse((timestamp, source))) = self.heads.pop() else {
            return Ok(None);
        };
        let value = self.values[source];
        self.advance(source)?;

        while let Some(&Reverse((next, other))) = self.heads.peek() {
            if next != timestamp {
                break;
            }
            self.heads.pop();
            self.advance(other)?;
        }

        Ok(Some((timestamp, value)))
    }
}

/// Samples of one overlap group
struct GroupSamples<'a> {
    histograms: u64,
    floats: MergedSamples<'a>,
}

fn open_group<'a>(
    chunks: &'a [(&'a Block, ChunkMeta)],
    mint: i64,
    maxt: i64,
) -> TsdbResult<GroupSamples<'a>> {
    let mut sources = Vec::new();
    let mut histograms = 0;
    let mut seen_histograms = HashSet::new();

    for (block, meta) in chunks {
        let chunk = block.chunks()?.chunk(meta.chunk_ref)?;
        match chunk.encoding {
            Encoding::Xor => sources.push(XorIterator::new(chunk.data)?),
            Encoding::Histogram | Encoding::FloatHistogram => {
                let count = chunk.num_samples()?;
                // Histogram samples are not decoded, so a chunk repeated by an
                // overlapping block is recognized by its range and count
                if !seen_histograms.insert((meta.min_time, meta.max_time, count)) {
                    tracing::debug!(
                        block = %block.id(),
                        min_time = meta.min_time,
                        max_time = meta.max_time,
                        "skipping repeated histogram chunk"
                    );
                    continue;
                }
                if !meta.within(mint, maxt) {
                    tracing::debug!(
                        encoding = %chunk.encoding,
                        min_time = meta.min_time,
                        max_time = meta.max_time,
                        "counting all samples of partially overlapping histogram chunk"
                    );
                }
                histograms += u64::from(count);
            }
        }
    }

    Ok(GroupSamples {
        histograms,
        floats: MergedSamples::new(sources),
    })
}

pub struct SeriesIterator<'a> {
    chunks: &'a [(&'a Block, ChunkMeta)],
    groups: std::slice::Iter<'a, Range<usize>>,
    current: Option<GroupSamples<'a>>,
    mint: i64,
    maxt: i64,
    done: bool,
}

impl<'a> SeriesIterator<'a> {
    fn open_next_group(&mut self) -> Option<TsdbResult<()>> {
        let range = self.groups.next()?.clone();
        let chunks: &'a [(&'a Block, ChunkMeta)] = self.chunks;
        let opened = open_group(&chunks[range], self.mint, self.maxt);
        Some(opened.map(|group| self.current = Some(group)))
    }
}

impl Iterator for SeriesIterator<'_> {
    type Item = TsdbResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let group = match self.current.as_mut() {
                Some(group) => group,
                None => match self.open_next_group()? {
                    Ok(()) => continue,
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
            };

            if group.histograms > 0 {
                group.histograms -= 1;
                return Some(Ok(Sample::Histogram));
            }

            match group.floats.next_sample() {
                Ok(None) => self.current = None,
                Ok(Some((timestamp, value))) => {
                    if timestamp < self.mint || timestamp > self.maxt {
                        continue;
                    }
                    return Some(Ok(Sample::Float { timestamp, value }));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
