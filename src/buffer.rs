//! Primitive buffer codec: cursor-based reads and writes of the protocol's
//! fixed-width and variable-length primitives.
//!
//! Fixed-width values are big-endian. The three variable-length integer
//! formats (VarInt, VarShort, VarLong) use 7-bit groups, least significant
//! group first, with bit 7 as the continuation flag.

use crate::error::{CodecError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const MASK_HIGH_BIT: u8 = 0x80;
const MASK_LOW7: u8 = 0x7F;
const CHUNK_BITS: u32 = 7;
const INT_SIZE: u32 = 32;
const SHORT_SIZE: u32 = 16;
/// Bits of the low word carried by the first four VarLong groups.
const LONG_LOW_GROUP_BITS: u32 = 28;
/// High-word bits that do not fit beside the low nibble in the fifth VarLong byte.
const LONG_HIGH_SPILL_MASK: u32 = 0x0FFF_FFFF << 3;

pub const SHORT_MIN: i32 = i16::MIN as i32;
pub const SHORT_MAX: i32 = i16::MAX as i32;
const UNSIGNED_SHORT_RANGE: i32 = 65536;

/// Read side of the primitive codec. One reader per decode call.
#[derive(Debug)]
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader {
            cursor: Cursor::new(bytes),
        }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    /// Bytes from the current offset to the end of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        let bytes: &'a [u8] = self.cursor.get_ref();
        &bytes[self.position().min(bytes.len())..]
    }

    fn need(&self, n: usize) -> Result<()> {
        let available = self.remaining();
        if available < n {
            return Err(CodecError::BufferUnderrun {
                offset: self.position(),
                needed: n,
                available,
            });
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.cursor.read_i8()?)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.need(2)?;
        Ok(self.cursor.read_i16::<BigEndian>()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.cursor.read_i32::<BigEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.need(4)?;
        Ok(self.cursor.read_f32::<BigEndian>()?)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.need(8)?;
        Ok(self.cursor.read_f64::<BigEndian>()?)
    }

    /// VarInt: at most 5 groups; bits beyond 32 are dropped.
    pub fn read_var_int(&mut self) -> Result<i32> {
        let mut value: u32 = 0;
        let mut shift = 0;
        while shift < INT_SIZE {
            let b = self.read_u8()?;
            value = value.wrapping_add(u32::from(b & MASK_LOW7) << shift);
            shift += CHUNK_BITS;
            if b & MASK_HIGH_BIT == 0 {
                return Ok(value as i32);
            }
        }
        Err(CodecError::TooMuchData("VarInt"))
    }

    /// VarShort: at most 3 groups; accumulated values above 32767 wrap to negative.
    pub fn read_var_short(&mut self) -> Result<i16> {
        let mut value: i32 = 0;
        let mut shift = 0;
        while shift < SHORT_SIZE {
            let b = self.read_u8()?;
            value += i32::from(b & MASK_LOW7) << shift;
            shift += CHUNK_BITS;
            if b & MASK_HIGH_BIT == 0 {
                if value > SHORT_MAX {
                    value -= UNSIGNED_SHORT_RANGE;
                }
                // A third group above 0x03 carries bits past the 16-bit domain.
                return i16::try_from(value).map_err(|_| CodecError::TooMuchData("VarShort"));
            }
        }
        Err(CodecError::TooMuchData("VarShort"))
    }

    /// VarLong: low word from up to four 7-bit groups plus the low nibble of
    /// the fifth byte; the high word starts at bit 4 of the fifth byte and, if
    /// that byte continues, picks up further groups.
    pub fn read_var_long(&mut self) -> Result<u64> {
        let mut low: u32 = 0;
        let mut size = 0;
        let last = loop {
            let b = self.read_u8()?;
            if size == LONG_LOW_GROUP_BITS {
                break b;
            }
            if b & MASK_HIGH_BIT != 0 {
                low |= u32::from(b & MASK_LOW7) << size;
                size += CHUNK_BITS;
                continue;
            }
            low |= u32::from(b) << size;
            return Ok(u64::from(low));
        };

        if last & MASK_HIGH_BIT == 0 {
            low |= u32::from(last) << LONG_LOW_GROUP_BITS;
            let high = u32::from(last >> 4);
            return Ok(join_long(high, low));
        }

        let last = last & MASK_LOW7;
        low |= u32::from(last) << LONG_LOW_GROUP_BITS;
        let mut high = u32::from(last >> 4);
        let mut size = 3;
        loop {
            let b = self.read_u8()?;
            if size >= INT_SIZE {
                return Err(CodecError::TooMuchData("VarLong"));
            }
            if b & MASK_HIGH_BIT == 0 {
                high |= u32::from(b) << size;
                break;
            }
            high |= u32::from(b & MASK_LOW7) << size;
            size += CHUNK_BITS;
        }
        Ok(join_long(high, low))
    }

    /// Latin-1 text. With `len` the caller already knows the byte count;
    /// otherwise a 2-byte big-endian prefix is read first.
    pub fn read_utf(&mut self, len: Option<usize>) -> Result<String> {
        let n = match len {
            Some(n) => n,
            None => usize::from(self.read_u16()?),
        };
        self.need(n)?;
        let start = self.position();
        let text = self.rest()[..n].iter().map(|&b| char::from(b)).collect();
        self.cursor.set_position((start + n) as u64);
        Ok(text)
    }
}

fn join_long(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Write side of the primitive codec. One writer per encode call.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(u8::from(v))
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        Ok(self.buf.write_i8(v)?)
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        Ok(self.buf.write_u8(v)?)
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        Ok(self.buf.write_i16::<BigEndian>(v)?)
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        Ok(self.buf.write_u16::<BigEndian>(v)?)
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        Ok(self.buf.write_i32::<BigEndian>(v)?)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        Ok(self.buf.write_u32::<BigEndian>(v)?)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        Ok(self.buf.write_f32::<BigEndian>(v)?)
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        Ok(self.buf.write_f64::<BigEndian>(v)?)
    }

    /// 7-bit groups of an unsigned word, continuation bit on all but the last.
    fn write_groups(&mut self, mut v: u32) -> Result<()> {
        while v >= u32::from(MASK_HIGH_BIT) {
            self.write_u8((v as u8 & MASK_LOW7) | MASK_HIGH_BIT)?;
            v >>= CHUNK_BITS;
        }
        self.write_u8(v as u8)
    }

    /// Negative values take the full five groups of their two's-complement bits.
    pub fn write_var_int(&mut self, v: i32) -> Result<()> {
        self.write_groups(v as u32)
    }

    pub fn write_var_short(&mut self, v: i32) -> Result<()> {
        if !(SHORT_MIN..=SHORT_MAX).contains(&v) {
            return Err(CodecError::Range(format!(
                "VarShort value {} outside [{}, {}]",
                v, SHORT_MIN, SHORT_MAX
            )));
        }
        self.write_groups((v & 0xFFFF) as u32)
    }

    /// A non-zero high word has its low bit forced on before encoding, so
    /// even high words come back one larger. High words below 8 share the
    /// fifth byte with the top nibble of the low word; larger ones spill
    /// their remaining bits into further 7-bit groups.
    pub fn write_var_long(&mut self, v: u64) -> Result<()> {
        let mut low = v as u32;
        let high = match (v >> 32) as u32 {
            0 => return self.write_groups(low),
            h => h | 1,
        };
        for _ in 0..4 {
            self.write_u8((low as u8 & MASK_LOW7) | MASK_HIGH_BIT)?;
            low >>= CHUNK_BITS;
        }
        let last = (high << 4) | low;
        if high & LONG_HIGH_SPILL_MASK == 0 {
            return self.write_u8(last as u8);
        }
        self.write_u8((last as u8 & MASK_LOW7) | MASK_HIGH_BIT)?;
        self.write_groups(high >> 3)
    }

    /// Latin-1 text, preceded by a 2-byte big-endian byte count unless
    /// `prefixed` is false.
    pub fn write_utf(&mut self, s: &str, prefixed: bool) -> Result<()> {
        let bytes = s
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    CodecError::Range(format!("character {:?} is not Latin-1", c))
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        if prefixed {
            let len = u16::try_from(bytes.len()).map_err(|_| {
                CodecError::Range(format!("text of {} bytes exceeds u16 prefix", bytes.len()))
            })?;
            self.write_u16(len)?;
        }
        self.write_bytes(&bytes);
        Ok(())
    }
}
