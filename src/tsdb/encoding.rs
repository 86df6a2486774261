//! Byte-level decoding for index and chunk files
//!
//! Index and chunk files mix big-endian fixed-width integers with
//! protobuf-style varints and varint-length-prefixed strings. `Decbuf` reads
//! them sequentially from a borrowed slice and reports short reads as
//! corruption instead of panicking.

use super::error::{TsdbError, TsdbResult};
use crc::{Crc, CRC_32_ISCSI};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Castagnoli CRC32 as used by every checksummed section
pub fn checksum(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

/// Sequential decoder over a borrowed byte slice
#[derive(Clone, Debug)]
pub struct Decbuf<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Decbuf<'a> {
    /// `what` names the structure being decoded, for error messages
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    /// Decoder over `len:u32 | payload | crc32` starting at `offset`,
    /// with the checksum verified. The returned buffer covers the payload.
    pub fn at_u32_len(data: &'a [u8], offset: usize, what: &'static str) -> TsdbResult<Self> {
        let mut head = Decbuf::new(slice_from(data, offset, what)?, what);
        let len = head.be32()? as usize;
        let payload = head.take(len)?;
        let expected = head.be32()?;
        verify(payload, expected, what)?;
        Ok(Decbuf::new(payload, what))
    }

    /// Decoder over `len:uvarint | payload | crc32` starting at `offset`,
    /// with the checksum verified.
    pub fn at_uvarint_len(data: &'a [u8], offset: usize, what: &'static str) -> TsdbResult<Self> {
        let mut head = Decbuf::new(slice_from(data, offset, what)?, what);
        let len = head.uvarint()? as usize;
        let payload = head.take(len)?;
        let expected = head.be32()?;
        verify(payload, expected, what)?;
        Ok(Decbuf::new(payload, what))
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn skip(&mut self, n: usize) -> TsdbResult<()> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> TsdbResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(TsdbError::corrupted(
                self.what,
                format!("need {} bytes, {} left", n, self.buf.len()),
            ));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn byte(&mut self) -> TsdbResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn be32(&mut self) -> TsdbResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| TsdbError::corrupted(self.what, "short u32"))?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn be64(&mut self) -> TsdbResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| TsdbError::corrupted(self.what, "short u64"))?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn uvarint(&mut self) -> TsdbResult<u64> {
        let (value, read) = decode_uvarint(self.buf)
            .ok_or_else(|| TsdbError::corrupted(self.what, "invalid uvarint"))?;
        self.buf = &self.buf[read..];
        Ok(value)
    }

    pub fn uvarint32(&mut self) -> TsdbResult<u32> {
        let value = self.uvarint()?;
        u32::try_from(value)
            .map_err(|_| TsdbError::corrupted(self.what, format!("uvarint {} overflows u32", value)))
    }

    pub fn varint(&mut self) -> TsdbResult<i64> {
        self.uvarint().map(zigzag_decode)
    }

    /// uvarint-length-prefixed UTF-8 string
    pub fn uvarint_str(&mut self) -> TsdbResult<&'a str> {
        let len = self.uvarint()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map_err(|e| TsdbError::corrupted(self.what, format!("invalid utf-8: {}", e)))
    }
}

fn slice_from<'a>(data: &'a [u8], offset: usize, what: &'static str) -> TsdbResult<&'a [u8]> {
    data.get(offset..).ok_or_else(|| {
        TsdbError::corrupted(what, format!("offset {} beyond {} bytes", offset, data.len()))
    })
}

fn verify(payload: &[u8], expected: u32, what: &'static str) -> TsdbResult<()> {
    let actual = checksum(payload);
    if actual != expected {
        return Err(TsdbError::ChecksumMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Decode an unsigned LEB128 varint, returning the value and bytes consumed.
/// `None` on truncation or overflow past 64 bits.
pub fn decode_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        if shift == 63 && byte > 1 {
            return None;
        }
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    None
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
