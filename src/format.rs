//! Frozen wire constants for the MessagePack-compatible subset.
//!
//! # Tag layout
//! Every encoded value starts with one tag byte.  Small integers, short
//! strings, short arrays and small maps fold their payload or length into
//! the tag itself ("fix" forms); everything else carries a big-endian length
//! or payload after the tag.
//!
//! | Range / byte | Meaning                          |
//! |--------------|----------------------------------|
//! | `00..=7f`    | positive fixint                  |
//! | `80..=8f`    | fixmap (low nibble = pair count) |
//! | `90..=9f`    | fixarray (low nibble = length)   |
//! | `a0..=bf`    | fixstr (low 5 bits = byte len)   |
//! | `c0`         | nil                              |
//! | `c2` / `c3`  | false / true                     |
//! | `c4..=c6`    | bin 8/16/32                      |
//! | `ca` / `cb`  | float 32/64                      |
//! | `cc..=cf`    | uint 8/16/32/64                  |
//! | `d0..=d3`    | int 8/16/32/64                   |
//! | `d9..=db`    | str 8/16/32                      |
//! | `dc` / `dd`  | array 16/32                      |
//! | `de` / `df`  | map 16/32                        |
//! | `e0..=ff`    | negative fixint                  |
//!
//! `c1` is never assigned.  The extension family (`c7..=c9`, `d4..=d8`) is
//! outside this subset and is rejected by the reader.
//!
//! # Endianness
//! All multi-byte lengths and payloads are big-endian.  No negotiation.

pub const NIL:     u8 = 0xc0;
pub const FALSE:   u8 = 0xc2;
pub const TRUE:    u8 = 0xc3;

pub const BIN8:    u8 = 0xc4;
pub const BIN16:   u8 = 0xc5;
pub const BIN32:   u8 = 0xc6;

pub const FLOAT32: u8 = 0xca;
pub const FLOAT64: u8 = 0xcb;

pub const UINT8:   u8 = 0xcc;
pub const UINT16:  u8 = 0xcd;
pub const UINT32:  u8 = 0xce;
pub const UINT64:  u8 = 0xcf;

pub const INT8:    u8 = 0xd0;
pub const INT16:   u8 = 0xd1;
pub const INT32:   u8 = 0xd2;
pub const INT64:   u8 = 0xd3;

pub const STR8:    u8 = 0xd9;
pub const STR16:   u8 = 0xda;
pub const STR32:   u8 = 0xdb;

pub const ARRAY16: u8 = 0xdc;
pub const ARRAY32: u8 = 0xdd;

pub const MAP16:   u8 = 0xde;
pub const MAP32:   u8 = 0xdf;

// ── Fix-form prefixes and limits ────────────────────────────────────────────

pub const FIXMAP_PREFIX:   u8 = 0x80;
pub const FIXARRAY_PREFIX: u8 = 0x90;
pub const FIXSTR_PREFIX:   u8 = 0xa0;

/// Largest value encodable as a positive fixint.
pub const POS_FIXINT_MAX: u64 = 0x7f;
/// Smallest value encodable as a negative fixint.
pub const NEG_FIXINT_MIN: i64 = -32;
/// Longest string (in UTF-8 bytes) that fits a fixstr tag.
pub const FIXSTR_MAX_LEN: usize = 31;
/// Longest array / largest map that fits a fixarray / fixmap tag.
pub const FIXCONTAINER_MAX_LEN: usize = 15;

/// Largest length any variable-size value may declare.
pub const MAX_LEN: usize = u32::MAX as usize;

/// The category a tag byte belongs to.  Used for diagnostics and for
/// dispatch in the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Nil,
    Bool,
    UInt,
    Int,
    Float32,
    Float64,
    Str,
    Bin,
    Array,
    Map,
}

impl Family {
    /// Classify a tag byte.  Returns `None` for unassigned and unsupported
    /// tags.
    pub fn of(tag: u8) -> Option<Self> {
        Some(match tag {
            0x00..=0x7f          => Family::UInt,
            0x80..=0x8f          => Family::Map,
            0x90..=0x9f          => Family::Array,
            0xa0..=0xbf          => Family::Str,
            NIL                  => Family::Nil,
            FALSE | TRUE         => Family::Bool,
            BIN8..=BIN32         => Family::Bin,
            FLOAT32              => Family::Float32,
            FLOAT64              => Family::Float64,
            UINT8..=UINT64       => Family::UInt,
            INT8..=INT64         => Family::Int,
            STR8..=STR32         => Family::Str,
            ARRAY16 | ARRAY32    => Family::Array,
            MAP16 | MAP32        => Family::Map,
            0xe0..=0xff          => Family::Int,
            _                    => return None,
        })
    }

    /// Human-readable name (diagnostics only, never parsed).
    pub fn name(self) -> &'static str {
        match self {
            Family::Nil     => "nil",
            Family::Bool    => "bool",
            Family::UInt    => "uint",
            Family::Int     => "int",
            Family::Float32 => "float32",
            Family::Float64 => "float64",
            Family::Str     => "str",
            Family::Bin     => "bin",
            Family::Array   => "array",
            Family::Map     => "map",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_assigned_tag_has_a_family() {
        let unassigned: Vec<u8> = (0u8..=255).filter(|t| Family::of(*t).is_none()).collect();
        assert_eq!(unassigned, vec![0xc1, 0xc7, 0xc8, 0xc9, 0xd4, 0xd5, 0xd6, 0xd7, 0xd8]);
    }

    #[test]
    fn fix_forms_classify() {
        assert_eq!(Family::of(0x05), Some(Family::UInt));
        assert_eq!(Family::of(0xff), Some(Family::Int));
        assert_eq!(Family::of(0x8f), Some(Family::Map));
        assert_eq!(Family::of(0x9a), Some(Family::Array));
        assert_eq!(Family::of(0xbf), Some(Family::Str));
    }
}
