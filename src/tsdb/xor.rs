//! XOR float chunk decoding
//!
//! Chunk layout: a 2-byte big-endian sample count followed by a bit stream.
//! The first sample stores its timestamp as a varint and its value as raw
//! 64 bits; the second stores the timestamp delta as a uvarint. Later
//! timestamps are delta-of-delta encoded in buckets selected by a prefix:
//!
//! ```text
//! 0     dod = 0
//! 10    14-bit dod
//! 110   17-bit dod
//! 1110  20-bit dod
//! 1111  64-bit dod
//! ```
//!
//! Values are XORed with their predecessor; a changed value either reuses the
//! previous leading/trailing zero window (`10`) or declares a new one (`11`,
//! 5 bits leading zeros, 6 bits significant length where 0 means 64).

use super::{
    encoding::zigzag_decode,
    error::{TsdbError, TsdbResult},
};

/// MSB-first reader over a chunk's bit stream
#[derive(Clone, Debug)]
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read_bit(&mut self) -> TsdbResult<bool> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or_else(|| TsdbError::corrupted("XOR chunk", "unexpected end of bit stream"))?;
        let bit = (byte >> (7 - (self.position % 8))) & 1 == 1;
        self.position += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, count: u8) -> TsdbResult<u64> {
        debug_assert!(count <= 64);
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    fn read_uvarint(&mut self) -> TsdbResult<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_bits(8)?;
            result |= (byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(TsdbError::corrupted("XOR chunk", "varint overflow"));
            }
        }
    }

    fn read_varint(&mut self) -> TsdbResult<i64> {
        self.read_uvarint().map(zigzag_decode)
    }
}

/// Iterator over `(timestamp, value)` samples of one XOR chunk
#[derive(Clone, Debug)]
pub struct XorIterator<'a> {
    reader: BitReader<'a>,
    total: u16,
    read: u16,
    t: i64,
    t_delta: i64,
    value_bits: u64,
    leading: u8,
    trailing: u8,
    failed: bool,
}

impl<'a> XorIterator<'a> {
    pub fn new(chunk: &'a [u8]) -> TsdbResult<Self> {
        let (total, stream) = match chunk {
            [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]), rest),
            _ => return Err(TsdbError::corrupted("XOR chunk", "missing sample count header")),
        };

        Ok(Self {
            reader: BitReader::new(stream),
            total,
            read: 0,
            t: 0,
            t_delta: 0,
            value_bits: 0,
            leading: 0,
            trailing: 0,
            failed: false,
        })
    }

    fn decode_next(&mut self) -> TsdbResult<(i64, f64)> {
        match self.read {
            0 => {
                self.t = self.reader.read_varint()?;
                self.value_bits = self.reader.read_bits(64)?;
            }
            1 => {
                self.t_delta = self.reader.read_uvarint()? as i64;
                self.t = self.t.wrapping_add(self.t_delta);
                self.decode_value()?;
            }
            _ => {
                let dod = self.decode_dod()?;
                self.t_delta = self.t_delta.wrapping_add(dod);
                self.t = self.t.wrapping_add(self.t_delta);
                self.decode_value()?;
            }
        }

        self.read += 1;
        Ok((self.t, f64::from_bits(self.value_bits)))
    }

    fn decode_dod(&mut self) -> TsdbResult<i64> {
        let mut prefix = 0u8;
        for _ in 0..4 {
            prefix <<= 1;
            if !self.reader.read_bit()? {
                break;
            }
            prefix |= 1;
        }

        let size: u8 = match prefix {
            0b0 => return Ok(0),
            0b10 => 14,
            0b110 => 17,
            0b1110 => 20,
            0b1111 => return Ok(self.reader.read_bits(64)? as i64),
            other => {
                return Err(TsdbError::corrupted(
                    "XOR chunk",
                    format!("invalid delta-of-delta prefix {:#b}", other),
                ))
            }
        };

        let bits = self.reader.read_bits(size)? as i64;
        // Two's complement within `size` bits
        if bits > 1 << (size - 1) {
            Ok(bits - (1 << size))
        } else {
            Ok(bits)
        }
    }

    fn decode_value(&mut self) -> TsdbResult<()> {
        if !self.reader.read_bit()? {
            return Ok(());
        }

        if self.reader.read_bit()? {
            self.leading = self.reader.read_bits(5)? as u8;
            let mut significant = self.reader.read_bits(6)? as u8;
            if significant == 0 {
                significant = 64;
            }
            if u16::from(self.leading) + u16::from(significant) > 64 {
                return Err(TsdbError::corrupted(
                    "XOR chunk",
                    format!("invalid value window {}+{}", self.leading, significant),
                ));
            }
            self.trailing = 64 - self.leading - significant;
        }

        let significant = 64 - self.leading - self.trailing;
        let bits = self.reader.read_bits(significant)?;
        self.value_bits ^= bits << self.trailing;
        Ok(())
    }
}

impl Iterator for XorIterator<'_> {
    type Item = TsdbResult<(i64, f64)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.read >= self.total {
            return None;
        }
        let sample = self.decode_next();
        if sample.is_err() {
            self.failed = true;
        }
        Some(sample)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal XOR chunk encoder mirroring the on-disk format
    #[derive(Default)]
    pub(crate) struct XorEncoder {
        bytes: Vec<u8>,
        bits: usize,
        count: u16,
        t: i64,
        t_delta: i64,
        value_bits: u64,
        leading: Option<u8>,
        trailing: u8,
    }

    impl XorEncoder {
        fn write_bit(&mut self, bit: bool) {
            if self.bits % 8 == 0 {
                self.bytes.push(0);
            }
            if bit {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - (self.bits % 8));
            }
            self.bits += 1;
        }

        fn write_bits(&mut self, value: u64, count: u8) {
            for i in (0..count).rev() {
                self.write_bit((value >> i) & 1 == 1);
            }
        }

        fn write_uvarint(&mut self, mut value: u64) {
            while value >= 0x80 {
                self.write_bits((value & 0x7F) | 0x80, 8);
                value >>= 7;
            }
            self.write_bits(value, 8);
        }

        fn write_varint(&mut self, value: i64) {
            self.write_uvarint(((value << 1) ^ (value >> 63)) as u64);
        }

        pub(crate) fn append(&mut self, t: i64, v: f64) {
            match self.count {
                0 => {
                    self.write_varint(t);
                    self.write_bits(v.to_bits(), 64);
                }
                1 => {
                    self.t_delta = t - self.t;
                    self.write_uvarint(self.t_delta as u64);
                    self.write_value(v);
                }
                _ => {
                    let delta = t - self.t;
                    let dod = delta - self.t_delta;
                    let fits = |n: u32| -((1i64 << (n - 1)) - 1) <= dod && dod <= 1i64 << (n - 1);
                    if dod == 0 {
                        self.write_bit(false);
                    } else if fits(14) {
                        self.write_bits(0b10, 2);
                        self.write_bits(dod as u64 & ((1 << 14) - 1), 14);
                    } else if fits(17) {
                        self.write_bits(0b110, 3);
                        self.write_bits(dod as u64 & ((1 << 17) - 1), 17);
                    } else if fits(20) {
                        self.write_bits(0b1110, 4);
                        self.write_bits(dod as u64 & ((1 << 20) - 1), 20);
                    } else {
                        self.write_bits(0b1111, 4);
                        self.write_bits(dod as u64, 64);
                    }
                    self.t_delta = delta;
                    self.write_value(v);
                }
            }
            self.t = t;
            self.value_bits = v.to_bits();
            self.count += 1;
        }

        fn write_value(&mut self, v: f64) {
            let delta = v.to_bits() ^ self.value_bits;
            if delta == 0 {
                self.write_bit(false);
                return;
            }
            self.write_bit(true);

            let leading = (delta.leading_zeros() as u8).min(31);
            let trailing = delta.trailing_zeros() as u8;
            match self.leading {
                Some(prev) if leading >= prev && trailing >= self.trailing => {
                    self.write_bit(false);
                    let significant = 64 - prev - self.trailing;
                    self.write_bits(delta >> self.trailing, significant);
                }
                _ => {
                    self.write_bit(true);
                    let significant = 64 - leading - trailing;
                    self.write_bits(u64::from(leading), 5);
                    self.write_bits(u64::from(significant % 64), 6);
                    self.write_bits(delta >> trailing, significant);
                    self.leading = Some(leading);
                    self.trailing = trailing;
                }
            }
        }

        pub(crate) fn finish(self) -> Vec<u8> {
            let mut out = self.count.to_be_bytes().to_vec();
            out.extend_from_slice(&self.bytes);
            out
        }
    }

    fn encode(samples: &[(i64, f64)]) -> Vec<u8> {
        let mut encoder = XorEncoder::default();
        for &(t, v) in samples {
            encoder.append(t, v);
        }
        encoder.finish()
    }

    fn decode(chunk: &[u8]) -> Vec<(i64, f64)> {
        XorIterator::new(chunk)
            .unwrap()
            .collect::<TsdbResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_regular_scrape_interval() {
        let samples: Vec<(i64, f64)> = (0..120)
            .map(|i| (1_600_000_000_000 + i * 15_000, (i % 7) as f64))
            .collect();
        assert_eq!(decode(&encode(&samples)), samples);
    }

    #[test]
    fn test_every_dod_bucket() {
        let samples = vec![
            (1_000, 1.0),
            (2_000, 1.0),
            (3_000, 1.5),      // dod 0
            (4_100, -2.25),    // 14-bit
            (14_100, 1e300),   // 17-bit
            (300_000, 0.0),    // 20-bit
            (90_000_000, 3.0), // 64-bit
            (90_000_001, f64::MIN_POSITIVE),
            (89_000_000, 7.0), // negative delta
        ];
        assert_eq!(decode(&encode(&samples)), samples);
    }

    #[test]
    fn test_single_sample_and_negative_timestamp() {
        let samples = vec![(-5_000, 42.0)];
        assert_eq!(decode(&encode(&samples)), samples);
    }

    #[test]
    fn test_nan_values_are_counted() {
        let chunk = encode(&[(1, f64::NAN), (2, 1.0), (3, f64::NAN)]);
        assert_eq!(XorIterator::new(&chunk).unwrap().count(), 3);
    }

    #[test]
    fn test_truncated_chunk_reports_error_once() {
        let mut chunk = encode(&[(1_000, 1.0), (2_000, 2.0), (3_500, 3.0)]);
        chunk.truncate(chunk.len() - 3);
        let results: Vec<_> = XorIterator::new(&chunk).unwrap().collect();
        assert!(results.iter().any(|r| r.is_err()));
        assert!(results.last().unwrap().is_err());
    }

    #[test]
    fn test_empty_chunk() {
        assert!(XorIterator::new(&[0]).is_err());
        assert_eq!(XorIterator::new(&[0, 0]).unwrap().count(), 0);
    }
}
