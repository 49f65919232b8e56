//! Compact encoder.
//!
//! [`Writer`] appends values to an owned, growable buffer, always choosing
//! the smallest encoding that represents the value exactly.  The buffer is
//! exposed as a borrowed snapshot via [`Writer::data`] or handed over with
//! [`Writer::into_bytes`].
//!
//! Encoding is deterministic: the same value tree always yields the same
//! bytes.  Maps are written in the order their pairs are stored.

use std::io;

use byteorder::{BigEndian, WriteBytesExt};
use thiserror::Error;

use crate::format::*;
use crate::host;
use crate::value::Value;

#[derive(Error, Debug)]
pub enum EncodeError {
    /// A string, blob or container is longer than a 32-bit length can say.
    #[error("{what} length {len} exceeds the 32-bit length limit")]
    LengthOverflow { what: &'static str, len: usize },
    /// A host value could not be classified into a wire value.
    #[error("Unrepresentable value: {0}")]
    Unrepresentable(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    /// Bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // ── Scalars ─────────────────────────────────────────────────────────────

    pub fn pack_nil(&mut self) -> Result<(), EncodeError> {
        self.buf.write_u8(NIL)?;
        Ok(())
    }

    pub fn pack_bool(&mut self, v: bool) -> Result<(), EncodeError> {
        self.buf.write_u8(if v { TRUE } else { FALSE })?;
        Ok(())
    }

    pub fn pack_u8(&mut self, v: u8) -> Result<(), EncodeError> {
        self.pack_u64(u64::from(v))
    }

    pub fn pack_u16(&mut self, v: u16) -> Result<(), EncodeError> {
        self.pack_u64(u64::from(v))
    }

    pub fn pack_u32(&mut self, v: u32) -> Result<(), EncodeError> {
        self.pack_u64(u64::from(v))
    }

    /// Smallest of positive fixint, uint8, uint16, uint32, uint64.
    pub fn pack_u64(&mut self, v: u64) -> Result<(), EncodeError> {
        let w = &mut self.buf;
        if v <= POS_FIXINT_MAX {
            w.write_u8(v as u8)?;
        } else if v <= u64::from(u8::MAX) {
            w.write_u8(UINT8)?;
            w.write_u8(v as u8)?;
        } else if v <= u64::from(u16::MAX) {
            w.write_u8(UINT16)?;
            w.write_u16::<BigEndian>(v as u16)?;
        } else if v <= u64::from(u32::MAX) {
            w.write_u8(UINT32)?;
            w.write_u32::<BigEndian>(v as u32)?;
        } else {
            w.write_u8(UINT64)?;
            w.write_u64::<BigEndian>(v)?;
        }
        Ok(())
    }

    pub fn pack_i8(&mut self, v: i8) -> Result<(), EncodeError> {
        self.pack_i64(i64::from(v))
    }

    pub fn pack_i16(&mut self, v: i16) -> Result<(), EncodeError> {
        self.pack_i64(i64::from(v))
    }

    pub fn pack_i32(&mut self, v: i32) -> Result<(), EncodeError> {
        self.pack_i64(i64::from(v))
    }

    /// Non-negative values use the unsigned forms; negative values use the
    /// smallest of negative fixint, int8, int16, int32, int64.
    pub fn pack_i64(&mut self, v: i64) -> Result<(), EncodeError> {
        if v >= 0 {
            return self.pack_u64(v as u64);
        }
        let w = &mut self.buf;
        if v >= NEG_FIXINT_MIN {
            w.write_i8(v as i8)?;
        } else if v >= i64::from(i8::MIN) {
            w.write_u8(INT8)?;
            w.write_i8(v as i8)?;
        } else if v >= i64::from(i16::MIN) {
            w.write_u8(INT16)?;
            w.write_i16::<BigEndian>(v as i16)?;
        } else if v >= i64::from(i32::MIN) {
            w.write_u8(INT32)?;
            w.write_i32::<BigEndian>(v as i32)?;
        } else {
            w.write_u8(INT64)?;
            w.write_i64::<BigEndian>(v)?;
        }
        Ok(())
    }

    pub fn pack_f32(&mut self, v: f32) -> Result<(), EncodeError> {
        self.buf.write_u8(FLOAT32)?;
        self.buf.write_f32::<BigEndian>(v)?;
        Ok(())
    }

    pub fn pack_f64(&mut self, v: f64) -> Result<(), EncodeError> {
        self.buf.write_u8(FLOAT64)?;
        self.buf.write_f64::<BigEndian>(v)?;
        Ok(())
    }

    // ── Variable-length payloads ────────────────────────────────────────────

    pub fn pack_str(&mut self, v: &str) -> Result<(), EncodeError> {
        let len = check_len("str", v.len())?;
        let w = &mut self.buf;
        if v.len() <= FIXSTR_MAX_LEN {
            w.write_u8(FIXSTR_PREFIX | len as u8)?;
        } else if len <= u32::from(u8::MAX) {
            w.write_u8(STR8)?;
            w.write_u8(len as u8)?;
        } else if len <= u32::from(u16::MAX) {
            w.write_u8(STR16)?;
            w.write_u16::<BigEndian>(len as u16)?;
        } else {
            w.write_u8(STR32)?;
            w.write_u32::<BigEndian>(len)?;
        }
        w.extend_from_slice(v.as_bytes());
        Ok(())
    }

    pub fn pack_bin(&mut self, v: &[u8]) -> Result<(), EncodeError> {
        let len = check_len("bin", v.len())?;
        let w = &mut self.buf;
        if len <= u32::from(u8::MAX) {
            w.write_u8(BIN8)?;
            w.write_u8(len as u8)?;
        } else if len <= u32::from(u16::MAX) {
            w.write_u8(BIN16)?;
            w.write_u16::<BigEndian>(len as u16)?;
        } else {
            w.write_u8(BIN32)?;
            w.write_u32::<BigEndian>(len)?;
        }
        w.extend_from_slice(v);
        Ok(())
    }

    /// Header for an array of `len` elements.  The caller must follow it with
    /// exactly `len` values.
    pub fn pack_array_header(&mut self, len: usize) -> Result<(), EncodeError> {
        self.pack_container_header("array", len, FIXARRAY_PREFIX, ARRAY16, ARRAY32)
    }

    /// Header for a map of `len` pairs.  The caller must follow it with
    /// exactly `len` key/value pairs.
    pub fn pack_map_header(&mut self, len: usize) -> Result<(), EncodeError> {
        self.pack_container_header("map", len, FIXMAP_PREFIX, MAP16, MAP32)
    }

    fn pack_container_header(
        &mut self,
        what: &'static str,
        len: usize,
        fix_prefix: u8,
        tag16: u8,
        tag32: u8,
    ) -> Result<(), EncodeError> {
        let n = check_len(what, len)?;
        let w = &mut self.buf;
        if len <= FIXCONTAINER_MAX_LEN {
            w.write_u8(fix_prefix | n as u8)?;
        } else if n <= u32::from(u16::MAX) {
            w.write_u8(tag16)?;
            w.write_u16::<BigEndian>(n as u16)?;
        } else {
            w.write_u8(tag32)?;
            w.write_u32::<BigEndian>(n)?;
        }
        Ok(())
    }

    // ── Trees ───────────────────────────────────────────────────────────────

    pub fn pack_value(&mut self, v: &Value) -> Result<(), EncodeError> {
        match v {
            Value::Nil         => self.pack_nil(),
            Value::Bool(b)     => self.pack_bool(*b),
            Value::UInt(u)     => self.pack_u64(*u),
            Value::Int(i)      => self.pack_i64(*i),
            Value::Float32(f)  => self.pack_f32(*f),
            Value::Float64(f)  => self.pack_f64(*f),
            Value::Str(s)      => self.pack_str(s),
            Value::Bin(b)      => self.pack_bin(b),
            Value::Array(items) => {
                self.pack_array_header(items.len())?;
                for item in items {
                    self.pack_value(item)?;
                }
                Ok(())
            }
            Value::Map(pairs) => {
                self.pack_map_header(pairs.len())?;
                for (k, v) in pairs {
                    self.pack_value(k)?;
                    self.pack_value(v)?;
                }
                Ok(())
            }
        }
    }

    /// Classify a loosely-typed host value and pack it.  Host numbers that
    /// are not integers are always written as float64.
    pub fn pack_any(&mut self, v: &serde_json::Value) -> Result<(), EncodeError> {
        let value = host::classify(v)?;
        self.pack_value(&value)
    }

    /// Append an already-encoded value verbatim.
    ///
    /// The fragment is not inspected.  The caller guarantees it holds exactly
    /// one complete, valid encoded value; otherwise the surrounding container
    /// is corrupt.
    pub fn pack_fragment(&mut self, fragment: &[u8]) -> Result<(), EncodeError> {
        self.buf.extend_from_slice(fragment);
        Ok(())
    }

    /// Array header followed by each fragment appended verbatim.
    pub fn pack_flat_array<B: AsRef<[u8]>>(&mut self, fragments: &[B]) -> Result<(), EncodeError> {
        self.pack_array_header(fragments.len())?;
        for fragment in fragments {
            self.pack_fragment(fragment.as_ref())?;
        }
        Ok(())
    }
}

fn check_len(what: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::LengthOverflow { what, len })
}

/// Encode a single value tree into a fresh buffer.
pub fn to_bytes(v: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    w.pack_value(v)?;
    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn packed(f: impl FnOnce(&mut Writer) -> Result<(), EncodeError>) -> String {
        let mut w = Writer::new();
        f(&mut w).unwrap();
        hex::encode(w.data())
    }

    #[test]
    fn nil_and_bools() {
        assert_eq!(packed(|w| w.pack_nil()), "c0");
        assert_eq!(packed(|w| w.pack_bool(true)), "c3");
        assert_eq!(packed(|w| w.pack_bool(false)), "c2");
    }

    #[test]
    fn unsigned_picks_smallest_width() {
        assert_eq!(packed(|w| w.pack_u64(5)), "05");
        assert_eq!(packed(|w| w.pack_u64(127)), "7f");
        assert_eq!(packed(|w| w.pack_u64(128)), "cc80");
        assert_eq!(packed(|w| w.pack_u64(255)), "ccff");
        assert_eq!(packed(|w| w.pack_u64(256)), "cd0100");
        assert_eq!(packed(|w| w.pack_u32(6585)), "cd19b9");
        assert_eq!(packed(|w| w.pack_u64(65536)), "ce00010000");
        assert_eq!(packed(|w| w.pack_u64(65481651581)), "cf0000000f3f02b57d");
    }

    #[test]
    fn signed_picks_smallest_width() {
        assert_eq!(packed(|w| w.pack_i64(0)), "00");
        assert_eq!(packed(|w| w.pack_i64(100)), "64");
        assert_eq!(packed(|w| w.pack_i64(-1)), "ff");
        assert_eq!(packed(|w| w.pack_i64(-32)), "e0");
        assert_eq!(packed(|w| w.pack_i64(-33)), "d0df");
        assert_eq!(packed(|w| w.pack_i64(-128)), "d080");
        assert_eq!(packed(|w| w.pack_i64(-129)), "d1ff7f");
        assert_eq!(packed(|w| w.pack_i64(-32769)), "d2ffff7fff");
        assert_eq!(packed(|w| w.pack_i64(i64::MIN)), "d38000000000000000");
        assert_eq!(packed(|w| w.pack_i8(-5)), "fb");
    }

    #[test]
    fn floats_are_fixed_width() {
        assert_eq!(packed(|w| w.pack_f32(1.5)), "ca3fc00000");
        assert_eq!(packed(|w| w.pack_f64(1.5)), "cb3ff8000000000000");
    }

    #[test]
    fn string_headers() {
        assert_eq!(packed(|w| w.pack_str("")), "a0");
        assert_eq!(packed(|w| w.pack_str("abc")), "a3616263");
        let s31 = "x".repeat(31);
        assert!(packed(|w| w.pack_str(&s31)).starts_with("bf"));
        let s32 = "x".repeat(32);
        assert!(packed(|w| w.pack_str(&s32)).starts_with("d920"));
        let s256 = "x".repeat(256);
        assert!(packed(|w| w.pack_str(&s256)).starts_with("da0100"));
        let s65536 = "x".repeat(65536);
        assert!(packed(|w| w.pack_str(&s65536)).starts_with("db00010000"));
    }

    #[test]
    fn bin_headers() {
        assert_eq!(packed(|w| w.pack_bin(&[])), "c400");
        assert_eq!(packed(|w| w.pack_bin(&[1, 2])), "c4020102");
        assert!(packed(|w| w.pack_bin(&[0u8; 300])).starts_with("c5012c"));
        assert!(packed(|w| w.pack_bin(&vec![0u8; 70000])).starts_with("c6"));
    }

    #[test]
    fn container_headers() {
        assert_eq!(packed(|w| w.pack_array_header(0)), "90");
        assert_eq!(packed(|w| w.pack_array_header(15)), "9f");
        assert_eq!(packed(|w| w.pack_array_header(16)), "dc0010");
        assert_eq!(packed(|w| w.pack_array_header(70000)), "dd00011170");
        assert_eq!(packed(|w| w.pack_map_header(1)), "81");
        assert_eq!(packed(|w| w.pack_map_header(16)), "de0010");
        assert_eq!(packed(|w| w.pack_map_header(70000)), "df00011170");
    }

    #[test]
    fn nested_value_in_traversal_order() {
        let v = Value::Map(vec![
            (Value::from("a"), Value::Array(vec![Value::Nil, Value::Bool(true)])),
            (Value::from("b"), Value::Int(-1)),
        ]);
        assert_eq!(hex::encode(to_bytes(&v).unwrap()), "82a16192c0c3a162ff");
    }

    #[test]
    fn flat_array_appends_fragments_verbatim() {
        let a = to_bytes(&Value::UInt(1)).unwrap();
        let b = to_bytes(&Value::from("x")).unwrap();
        assert_eq!(packed(|w| w.pack_flat_array(&[a, b])), "9201a178");
    }

    #[test]
    fn any_classifies_host_values() {
        let host = json!({"a": [true, "s", 1.25, null], "n": -3});
        assert_eq!(
            packed(|w| w.pack_any(&host)),
            "82a16194c3a173cb3ff4000000000000c0a16efd"
        );
    }

    #[test]
    fn any_keeps_integers_and_floats_apart() {
        assert_eq!(packed(|w| w.pack_any(&json!(2))), "02");
        assert_eq!(packed(|w| w.pack_any(&json!(2.0))), "cb4000000000000000");
        assert_eq!(packed(|w| w.pack_any(&json!(-200))), "d1ff38");
        assert_eq!(packed(|w| w.pack_any(&json!(u64::MAX))), "cfffffffffffffffff");
        assert_eq!(packed(|w| w.pack_any(&json!(null))), "c0");
        assert_eq!(packed(|w| w.pack_any(&json!({}))), "80");
    }
}
