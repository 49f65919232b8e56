//! Display receipt record and its wire layout.
//!
//! # Cached layout
//! A cached receipt is five consecutive values with no enclosing header:
//!
//! | # | Field          | Encoding                          |
//! |---|----------------|-----------------------------------|
//! | 1 | `timestamp`    | uint, unix seconds                |
//! | 2 | `replay`       | bool                              |
//! | 3 | `send_attempt` | uint (u32 range)                  |
//! | 4 | `od`           | map, or nil when absent or empty  |
//! | 5 | `ed`           | map, or nil when absent or empty  |
//!
//! Absent and empty maps both pack as nil, so both read back as `None`.
//!
//! # Batch layout
//! An upload body is one array whose elements are cached receipts framed
//! by a fixarray(5) header.  The framing is prepended to the cached bytes
//! verbatim; batching never decodes a receipt.

use serde_json::Value as Json;
use thiserror::Error;

use crate::host;
use crate::reader::{DecodeError, Reader};
use crate::value::ValueMap;
use crate::writer::{EncodeError, Writer};

/// Number of values in one packed receipt.
pub const RECEIPT_FIELDS: usize = 5;

/// Top-level key of the SDK section in a push payload.
pub const PAYLOAD_ROOT_KEY: &str = "com.batch";
/// Keys copied from the SDK section into event data.
pub const EVENT_DATA_KEYS: [&str; 3] = ["i", "ex", "va"];

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("No receipt data found in the notification payload")]
    NoReceiptData,
    #[error("Receipt data in the notification payload is invalid")]
    InvalidPayload,
    #[error("Receipt data nests deeper than {limit} containers")]
    TooDeep { limit: usize },
    #[error("Batch element has {0} fields, expected 5")]
    FieldCount(usize),
    #[error("Error when packing receipt: {0}")]
    Pack(#[from] EncodeError),
    #[error("Error when unpacking receipt: {0}")]
    Unpack(#[from] DecodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// Unix seconds at which the notification was received.
    pub timestamp:    u64,
    pub replay:       bool,
    pub send_attempt: u32,
    /// Open data.
    pub od:           Option<ValueMap>,
    /// Event data.
    pub ed:           Option<ValueMap>,
}

impl Receipt {
    pub fn new(timestamp: u64) -> Self {
        Self { timestamp, replay: false, send_attempt: 0, od: None, ed: None }
    }

    /// Build a receipt from a push payload.
    ///
    /// The receipt mode lives at `com.batch.r.m`.  Modes 1 and 2 produce a
    /// receipt, mode 0 means "no receipt", anything outside `0..=2` is
    /// invalid.  Open data is `com.batch.od`; event data is whichever of
    /// `i`, `ex`, `va` are present under `com.batch`.
    pub fn from_payload(payload: &Json, now: u64) -> Result<Self, ReceiptError> {
        let section = payload
            .get(PAYLOAD_ROOT_KEY)
            .and_then(Json::as_object)
            .ok_or(ReceiptError::NoReceiptData)?;
        let mode = section
            .get("r")
            .and_then(Json::as_object)
            .and_then(|r| r.get("m"))
            .and_then(Json::as_i64)
            .ok_or(ReceiptError::NoReceiptData)?;

        match mode {
            1 | 2 => {}
            0 => return Err(ReceiptError::NoReceiptData),
            _ => return Err(ReceiptError::InvalidPayload),
        }

        let od = section
            .get("od")
            .and_then(Json::as_object)
            .map(host::classify_object)
            .transpose()?;

        let ed_source: serde_json::Map<String, Json> = EVENT_DATA_KEYS
            .iter()
            .filter_map(|k| section.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect();
        let ed = host::classify_object(&ed_source)?;

        Ok(Self { timestamp: now, replay: false, send_attempt: 0, od, ed: Some(ed) })
    }

    /// Mark one more delivery attempt.
    pub fn bump_attempt(&mut self) {
        self.send_attempt = self.send_attempt.saturating_add(1);
        self.replay = false;
    }

    // ── Packing ─────────────────────────────────────────────────────────────

    pub fn pack_into(&self, w: &mut Writer) -> Result<(), ReceiptError> {
        w.pack_u64(self.timestamp)?;
        w.pack_bool(self.replay)?;
        w.pack_u32(self.send_attempt)?;
        pack_optional_map(w, self.od.as_ref())?;
        pack_optional_map(w, self.ed.as_ref())?;
        Ok(())
    }

    /// Cached form: the five fields, no header.
    pub fn pack(&self) -> Result<Vec<u8>, ReceiptError> {
        let mut w = Writer::with_capacity(32);
        self.pack_into(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Batch element form: the five fields framed as one array.
    pub fn pack_element(&self) -> Result<Vec<u8>, ReceiptError> {
        let mut w = Writer::with_capacity(32);
        w.pack_array_header(RECEIPT_FIELDS)?;
        self.pack_into(&mut w)?;
        Ok(w.into_bytes())
    }

    // ── Unpacking ───────────────────────────────────────────────────────────

    pub fn read_from(r: &mut Reader<'_>) -> Result<Self, ReceiptError> {
        Ok(Self {
            timestamp:    r.read_u64()?,
            replay:       r.read_bool()?,
            send_attempt: r.read_u32()?,
            od:           r.read_optional_map()?,
            ed:           r.read_optional_map()?,
        })
    }

    /// Decode the cached form.
    pub fn unpack(data: &[u8]) -> Result<Self, ReceiptError> {
        Self::read_from(&mut Reader::new(data))
    }

    /// Decode the cached form with a custom nesting bound.
    pub fn unpack_with(data: &[u8], max_depth: usize) -> Result<Self, ReceiptError> {
        Self::read_from(&mut Reader::with_max_depth(data, max_depth))
    }

    /// Check that a cached form reads back under `max_depth` without
    /// building the value trees.
    pub fn ensure_readable(data: &[u8], max_depth: usize) -> Result<(), ReceiptError> {
        let mut r = Reader::with_max_depth(data, max_depth);
        for _ in 0..RECEIPT_FIELDS {
            r.skip_value().map_err(|e| match e {
                DecodeError::NestingTooDeep { limit } => ReceiptError::TooDeep { limit },
                other => ReceiptError::Unpack(other),
            })?;
        }
        Ok(())
    }

    /// Decode one batch element.
    pub fn unpack_element(data: &[u8]) -> Result<Self, ReceiptError> {
        let mut r = Reader::new(data);
        match r.read_array_len()? {
            RECEIPT_FIELDS => Self::read_from(&mut r),
            n => Err(ReceiptError::FieldCount(n)),
        }
    }
}

fn pack_optional_map(w: &mut Writer, map: Option<&ValueMap>) -> Result<(), EncodeError> {
    match map {
        Some(pairs) if !pairs.is_empty() => {
            w.pack_map_header(pairs.len())?;
            for (k, v) in pairs {
                w.pack_value(k)?;
                w.pack_value(v)?;
            }
            Ok(())
        }
        _ => w.pack_nil(),
    }
}

/// Frame a cached receipt as a batch element without decoding it.
pub fn frame_cached(cached: &[u8]) -> Result<Vec<u8>, ReceiptError> {
    let mut w = Writer::with_capacity(cached.len() + 1);
    w.pack_array_header(RECEIPT_FIELDS)?;
    w.pack_fragment(cached)?;
    Ok(w.into_bytes())
}

/// One array holding every buffer verbatim, in order.
pub fn pack_flat_array<B: AsRef<[u8]>>(buffers: &[B]) -> Result<Vec<u8>, ReceiptError> {
    let total: usize = buffers.iter().map(|b| b.as_ref().len()).sum();
    let mut w = Writer::with_capacity(total + 5);
    w.pack_flat_array(buffers)?;
    Ok(w.into_bytes())
}

/// Split an upload body back into receipts.
///
/// The outer array and element boundaries must be well-formed; a
/// structurally valid element that is not a receipt yields an `Err` entry
/// and the remaining elements are still decoded.
pub fn unpack_batch(body: &[u8]) -> Result<Vec<Result<Receipt, ReceiptError>>, ReceiptError> {
    let mut r = Reader::new(body);
    let len = r.read_array_len()?;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let element = r.read_fragment()?;
        out.push(Receipt::unpack_element(element));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde_json::json;

    const FIXTURE_HEX: &str = "cf0000000f3f02b57dc3cd19b9c0c0";

    fn fixture() -> Receipt {
        Receipt { timestamp: 65481651581, replay: true, send_attempt: 6585, od: None, ed: None }
    }

    #[test]
    fn packs_fixture_byte_exact() {
        assert_eq!(hex::encode(fixture().pack().unwrap()), FIXTURE_HEX);
    }

    #[test]
    fn unpacks_fixture() {
        let r = Receipt::unpack(&hex::decode(FIXTURE_HEX).unwrap()).unwrap();
        assert_eq!(r, fixture());
        assert!(r.od.is_none());
        assert!(r.ed.is_none());
    }

    #[test]
    fn empty_maps_pack_as_nil() {
        let mut r = fixture();
        r.od = Some(Vec::new());
        r.ed = Some(Vec::new());
        assert_eq!(hex::encode(r.pack().unwrap()), FIXTURE_HEX);
        assert_eq!(Receipt::unpack(&r.pack().unwrap()).unwrap(), fixture());
    }

    #[test]
    fn truncated_receipt_is_an_unpack_error() {
        let bytes = hex::decode(FIXTURE_HEX).unwrap();
        for cut in 0..bytes.len() {
            match Receipt::unpack(&bytes[..cut]) {
                Err(ReceiptError::Unpack(DecodeError::UnexpectedEndOfData)) => {}
                other => panic!("cut at {cut}: {other:?}"),
            }
        }
    }

    #[test]
    fn wrong_field_type_is_an_unpack_error() {
        // replay encoded as a string
        let bytes = hex::decode("01a17801c0c0").unwrap();
        assert!(matches!(
            Receipt::unpack(&bytes),
            Err(ReceiptError::Unpack(DecodeError::TypeMismatch { expected: "bool", found: "str" }))
        ));
    }

    #[test]
    fn payload_with_receipt_mode() {
        let payload = json!({
            "com.batch": {
                "r": {"m": 1},
                "i": "send-id",
                "ex": "experiment",
                "od": {"n": "campaign", "t": 3},
                "other": true,
            }
        });
        let r = Receipt::from_payload(&payload, 1_600_000_000).unwrap();
        assert_eq!(r.timestamp, 1_600_000_000);
        assert!(!r.replay);
        assert_eq!(r.send_attempt, 0);
        assert_eq!(
            r.od,
            Some(vec![
                (Value::from("n"), Value::from("campaign")),
                (Value::from("t"), Value::UInt(3)),
            ])
        );
        assert_eq!(
            r.ed,
            Some(vec![
                (Value::from("ex"), Value::from("experiment")),
                (Value::from("i"), Value::from("send-id")),
            ])
        );
    }

    #[test]
    fn payload_modes() {
        let with_mode = |m: Json| json!({"com.batch": {"r": {"m": m}}});
        assert!(Receipt::from_payload(&with_mode(json!(2)), 0).is_ok());
        assert!(matches!(
            Receipt::from_payload(&with_mode(json!(0)), 0),
            Err(ReceiptError::NoReceiptData)
        ));
        assert!(matches!(
            Receipt::from_payload(&with_mode(json!(3)), 0),
            Err(ReceiptError::InvalidPayload)
        ));
        assert!(matches!(
            Receipt::from_payload(&with_mode(json!(-1)), 0),
            Err(ReceiptError::InvalidPayload)
        ));
        for missing in [json!({}), json!({"com.batch": {}}), json!({"com.batch": {"r": {}}})] {
            assert!(matches!(
                Receipt::from_payload(&missing, 0),
                Err(ReceiptError::NoReceiptData)
            ));
        }
    }

    #[test]
    fn bump_clears_replay() {
        let mut r = fixture();
        r.bump_attempt();
        assert_eq!(r.send_attempt, 6586);
        assert!(!r.replay);

        r.send_attempt = u32::MAX;
        r.bump_attempt();
        assert_eq!(r.send_attempt, u32::MAX);
    }

    fn nested_payload(levels: usize) -> Json {
        let mut inner = json!(1);
        for _ in 0..levels {
            inner = json!([inner]);
        }
        json!({"com.batch": {"r": {"m": 1}, "od": {"n": inner}}})
    }

    #[test]
    fn deep_open_data_needs_a_matching_bound() {
        let r = Receipt::from_payload(&nested_payload(70), 0).unwrap();
        let bytes = r.pack().unwrap();

        assert!(matches!(
            Receipt::unpack(&bytes),
            Err(ReceiptError::Unpack(DecodeError::NestingTooDeep { limit: 64 }))
        ));
        assert!(matches!(
            Receipt::ensure_readable(&bytes, 64),
            Err(ReceiptError::TooDeep { limit: 64 })
        ));

        Receipt::ensure_readable(&bytes, 128).unwrap();
        assert_eq!(Receipt::unpack_with(&bytes, 128).unwrap(), r);
    }

    #[test]
    fn ensure_readable_reports_other_damage_as_unpack() {
        let bytes = hex::decode(FIXTURE_HEX).unwrap();
        Receipt::ensure_readable(&bytes, 64).unwrap();
        assert!(matches!(
            Receipt::ensure_readable(&bytes[..bytes.len() - 1], 64),
            Err(ReceiptError::Unpack(DecodeError::UnexpectedEndOfData))
        ));
    }

    #[test]
    fn framed_cached_bytes_equal_element_packing() {
        let r = fixture();
        assert_eq!(frame_cached(&r.pack().unwrap()).unwrap(), r.pack_element().unwrap());
        assert_eq!(Receipt::unpack_element(&r.pack_element().unwrap()).unwrap(), r);
    }

    #[test]
    fn batch_keeps_going_past_a_bad_element() {
        let good = fixture().pack_element().unwrap();
        let bad = vec![0x93, 0x01, 0x02, 0x03];
        let body = pack_flat_array(&[good.clone(), bad, good]).unwrap();
        let out = unpack_batch(&body).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap(), &fixture());
        assert!(matches!(out[1], Err(ReceiptError::FieldCount(3))));
        assert_eq!(out[2].as_ref().unwrap(), &fixture());
    }
}
