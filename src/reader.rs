//! Strict cursor-based decoder.
//!
//! [`Reader`] borrows an input buffer and decodes one value per call,
//! advancing its cursor past it.  Typed reads (`read_u64`, `read_bool`, …)
//! check the tag family before touching the payload.
//!
//! # Failure atomicity
//! Every public read either consumes exactly one complete value or fails
//! and leaves the cursor where it was.  Nothing is returned for a partially
//! decoded value.
//!
//! # Limits
//! Declared lengths are checked against the remaining input before any
//! allocation, so a forged length cannot trigger a huge reservation.
//! Container nesting is bounded by `max_depth` (default
//! [`DEFAULT_MAX_DEPTH`]) so crafted input cannot exhaust the stack.

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::format::*;
use crate::value::{Value, ValueMap};

/// Default bound on nested arrays/maps.
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of data")]
    UnexpectedEndOfData,
    #[error("Unknown format tag 0x{0:02x}")]
    UnknownFormatTag(u8),
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("Integer {value} does not fit {expected}")]
    OutOfRange { expected: &'static str, value: i128 },
    #[error("String payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("Containers nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
    #[error("{0} trailing byte(s) after value")]
    TrailingBytes(usize),
}

// The only failure a slice cursor can report is running out of input.
impl From<io::Error> for DecodeError {
    fn from(_: io::Error) -> Self {
        DecodeError::UnexpectedEndOfData
    }
}

type Result<T> = std::result::Result<T, DecodeError>;

/// Integer payload as decoded, before narrowing.
#[derive(Clone, Copy)]
enum Int {
    U(u64),
    I(i64),
}

impl Int {
    fn widen(self) -> i128 {
        match self {
            Int::U(u) => i128::from(u),
            Int::I(i) => i128::from(i),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reader<'a> {
    cur:       Cursor<&'a [u8]>,
    max_depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_max_depth(data, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(data: &'a [u8], max_depth: usize) -> Self {
        Self { cur: Cursor::new(data), max_depth }
    }

    /// Byte offset of the next unread value.
    pub fn position(&self) -> usize {
        self.cur.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.data().len().saturating_sub(self.position())
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Tag byte of the next value, without consuming it.
    pub fn peek_tag(&self) -> Result<u8> {
        self.data()
            .get(self.position())
            .copied()
            .ok_or(DecodeError::UnexpectedEndOfData)
    }

    // ── Generic reads ───────────────────────────────────────────────────────

    pub fn read_value(&mut self) -> Result<Value> {
        self.atomic(|r| r.value_at(0))
    }

    /// Advance past the next value without materializing it.
    pub fn skip_value(&mut self) -> Result<()> {
        self.atomic(|r| r.skip_at(0))
    }

    /// Raw bytes of the next value, borrowed from the input.
    pub fn read_fragment(&mut self) -> Result<&'a [u8]> {
        let start = self.position();
        self.skip_value()?;
        Ok(&self.data()[start..self.position()])
    }

    // ── Typed reads ─────────────────────────────────────────────────────────

    pub fn read_nil(&mut self) -> Result<()> {
        self.atomic(|r| r.tag_of(Family::Nil).map(drop))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.atomic(|r| Ok(r.tag_of(Family::Bool)? == TRUE))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_unsigned("u8", u64::from(u8::MAX)).map(|v| v as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_unsigned("u16", u64::from(u16::MAX)).map(|v| v as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_unsigned("u32", u64::from(u32::MAX)).map(|v| v as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_unsigned("u64", u64::MAX)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_signed("i8", i64::from(i8::MIN), i64::from(i8::MAX)).map(|v| v as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_signed("i16", i64::from(i16::MIN), i64::from(i16::MAX)).map(|v| v as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_signed("i32", i64::from(i32::MIN), i64::from(i32::MAX)).map(|v| v as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.read_signed("i64", i64::MIN, i64::MAX)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.atomic(|r| {
            r.tag_of(Family::Float32)?;
            Ok(r.cur.read_f32::<BigEndian>()?)
        })
    }

    /// Accepts float64, and float32 widened losslessly.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.atomic(|r| {
            let tag = r.tag()?;
            match tag {
                FLOAT64 => Ok(r.cur.read_f64::<BigEndian>()?),
                FLOAT32 => Ok(f64::from(r.cur.read_f32::<BigEndian>()?)),
                _ => Err(mismatch("float64", tag)),
            }
        })
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        self.atomic(|r| {
            let tag = r.tag_of(Family::Str)?;
            let len = r.str_len(tag)?;
            let bytes = r.take(len)?;
            std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
        })
    }

    pub fn read_bin(&mut self) -> Result<&'a [u8]> {
        self.atomic(|r| {
            let tag = r.tag_of(Family::Bin)?;
            let len = r.bin_len(tag)?;
            r.take(len)
        })
    }

    /// Array header; the caller reads the returned number of elements next.
    pub fn read_array_len(&mut self) -> Result<usize> {
        self.atomic(|r| {
            let tag = r.tag_of(Family::Array)?;
            r.array_len(tag)
        })
    }

    /// Map header; the caller reads the returned number of pairs next.
    pub fn read_map_len(&mut self) -> Result<usize> {
        self.atomic(|r| {
            let tag = r.tag_of(Family::Map)?;
            r.map_len(tag)
        })
    }

    /// `Nil` yields `None`; a map yields all of its pairs; anything else is
    /// a type mismatch.
    pub fn read_optional_map(&mut self) -> Result<Option<ValueMap>> {
        self.atomic(|r| {
            if r.peek_tag()? == NIL {
                r.tag()?;
                return Ok(None);
            }
            let tag = r.tag_of(Family::Map)?;
            let len = r.map_len(tag)?;
            r.map_body(len, 0).map(Some)
        })
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn data(&self) -> &'a [u8] {
        *self.cur.get_ref()
    }

    /// Run `f`; on failure rewind to where it started.
    fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = self.cur.position();
        let out = f(self);
        if out.is_err() {
            self.cur.set_position(start);
        }
        out
    }

    fn tag(&mut self) -> Result<u8> {
        Ok(self.cur.read_u8()?)
    }

    /// Consume a tag and require it to belong to `want`.
    fn tag_of(&mut self, want: Family) -> Result<u8> {
        let tag = self.tag()?;
        if Family::of(tag) == Some(want) {
            Ok(tag)
        } else {
            Err(mismatch(want.name(), tag))
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEndOfData);
        }
        let start = self.position();
        let data: &'a [u8] = self.data();
        self.cur.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    fn read_unsigned(&mut self, expected: &'static str, max: u64) -> Result<u64> {
        self.atomic(|r| {
            let v = r.int()?.widen();
            if v >= 0 && v <= i128::from(max) {
                Ok(v as u64)
            } else {
                Err(DecodeError::OutOfRange { expected, value: v })
            }
        })
    }

    fn read_signed(&mut self, expected: &'static str, min: i64, max: i64) -> Result<i64> {
        self.atomic(|r| {
            let n = r.int()?;
            let v = n.widen();
            if v >= i128::from(min) && v <= i128::from(max) {
                Ok(v as i64)
            } else {
                Err(DecodeError::OutOfRange { expected, value: v })
            }
        })
    }

    fn int(&mut self) -> Result<Int> {
        let tag = self.tag()?;
        self.int_payload(tag)
    }

    fn int_payload(&mut self, tag: u8) -> Result<Int> {
        let c = &mut self.cur;
        Ok(match tag {
            0x00..=0x7f => Int::U(u64::from(tag)),
            0xe0..=0xff => Int::I(i64::from(tag as i8)),
            UINT8  => Int::U(u64::from(c.read_u8()?)),
            UINT16 => Int::U(u64::from(c.read_u16::<BigEndian>()?)),
            UINT32 => Int::U(u64::from(c.read_u32::<BigEndian>()?)),
            UINT64 => Int::U(c.read_u64::<BigEndian>()?),
            INT8   => Int::I(i64::from(c.read_i8()?)),
            INT16  => Int::I(i64::from(c.read_i16::<BigEndian>()?)),
            INT32  => Int::I(i64::from(c.read_i32::<BigEndian>()?)),
            INT64  => Int::I(c.read_i64::<BigEndian>()?),
            _ => return Err(mismatch("int", tag)),
        })
    }

    fn str_len(&mut self, tag: u8) -> Result<usize> {
        Ok(match tag {
            STR8  => usize::from(self.cur.read_u8()?),
            STR16 => usize::from(self.cur.read_u16::<BigEndian>()?),
            STR32 => self.cur.read_u32::<BigEndian>()? as usize,
            _     => usize::from(tag & 0x1f),
        })
    }

    fn bin_len(&mut self, tag: u8) -> Result<usize> {
        Ok(match tag {
            BIN8  => usize::from(self.cur.read_u8()?),
            BIN16 => usize::from(self.cur.read_u16::<BigEndian>()?),
            _     => self.cur.read_u32::<BigEndian>()? as usize,
        })
    }

    /// Every element occupies at least one byte, so a length larger than
    /// the remaining input is rejected up front.
    fn array_len(&mut self, tag: u8) -> Result<usize> {
        let len = match tag {
            ARRAY16 => usize::from(self.cur.read_u16::<BigEndian>()?),
            ARRAY32 => self.cur.read_u32::<BigEndian>()? as usize,
            _       => usize::from(tag & 0x0f),
        };
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEndOfData);
        }
        Ok(len)
    }

    /// Each pair occupies at least two bytes.
    fn map_len(&mut self, tag: u8) -> Result<usize> {
        let len = match tag {
            MAP16 => usize::from(self.cur.read_u16::<BigEndian>()?),
            MAP32 => self.cur.read_u32::<BigEndian>()? as usize,
            _     => usize::from(tag & 0x0f),
        };
        if len.saturating_mul(2) > self.remaining() {
            return Err(DecodeError::UnexpectedEndOfData);
        }
        Ok(len)
    }

    fn enter(&self, depth: usize) -> Result<usize> {
        if depth >= self.max_depth {
            return Err(DecodeError::NestingTooDeep { limit: self.max_depth });
        }
        Ok(depth + 1)
    }

    fn value_at(&mut self, depth: usize) -> Result<Value> {
        let tag = self.tag()?;
        let family = Family::of(tag).ok_or(DecodeError::UnknownFormatTag(tag))?;
        Ok(match family {
            Family::Nil     => Value::Nil,
            Family::Bool    => Value::Bool(tag == TRUE),
            Family::UInt | Family::Int => match self.int_payload(tag)? {
                Int::U(u) => Value::UInt(u),
                Int::I(i) if i >= 0 => Value::UInt(i as u64),
                Int::I(i) => Value::Int(i),
            },
            Family::Float32 => Value::Float32(self.cur.read_f32::<BigEndian>()?),
            Family::Float64 => Value::Float64(self.cur.read_f64::<BigEndian>()?),
            Family::Str => {
                let len = self.str_len(tag)?;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
                Value::Str(s.to_owned())
            }
            Family::Bin => {
                let len = self.bin_len(tag)?;
                Value::Bin(self.take(len)?.to_vec())
            }
            Family::Array => {
                let len = self.array_len(tag)?;
                let inner = self.enter(depth)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.value_at(inner)?);
                }
                Value::Array(items)
            }
            Family::Map => {
                let len = self.map_len(tag)?;
                Value::Map(self.map_body(len, depth)?)
            }
        })
    }

    fn map_body(&mut self, len: usize, depth: usize) -> Result<ValueMap> {
        let inner = self.enter(depth)?;
        let mut pairs = Vec::with_capacity(len);
        for _ in 0..len {
            let k = self.value_at(inner)?;
            let v = self.value_at(inner)?;
            pairs.push((k, v));
        }
        Ok(pairs)
    }

    fn skip_at(&mut self, depth: usize) -> Result<()> {
        let tag = self.tag()?;
        let family = Family::of(tag).ok_or(DecodeError::UnknownFormatTag(tag))?;
        match family {
            Family::Nil | Family::Bool => {}
            Family::UInt | Family::Int => {
                self.int_payload(tag)?;
            }
            Family::Float32 => {
                self.take(4)?;
            }
            Family::Float64 => {
                self.take(8)?;
            }
            Family::Str => {
                let len = self.str_len(tag)?;
                self.take(len)?;
            }
            Family::Bin => {
                let len = self.bin_len(tag)?;
                self.take(len)?;
            }
            Family::Array => {
                let len = self.array_len(tag)?;
                let inner = self.enter(depth)?;
                for _ in 0..len {
                    self.skip_at(inner)?;
                }
            }
            Family::Map => {
                let len = self.map_len(tag)?;
                let inner = self.enter(depth)?;
                for _ in 0..len * 2 {
                    self.skip_at(inner)?;
                }
            }
        }
        Ok(())
    }
}

fn mismatch(expected: &'static str, tag: u8) -> DecodeError {
    match Family::of(tag) {
        Some(found) => DecodeError::TypeMismatch { expected, found: found.name() },
        None => DecodeError::UnknownFormatTag(tag),
    }
}

/// Decode a buffer that holds exactly one value.
pub fn from_bytes(data: &[u8]) -> Result<Value> {
    let mut r = Reader::new(data);
    let v = r.read_value()?;
    match r.remaining() {
        0 => Ok(v),
        n => Err(DecodeError::TrailingBytes(n)),
    }
}
