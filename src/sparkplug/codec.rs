//! Sparkplug B payload codec.
//!
//! Decoding tries the Sparkplug protobuf wire format first and falls back
//! to a JSON representation of the same shape for transports/bridges that
//! re-encode Sparkplug payloads as JSON. The wire format is hand-parsed
//! against the fixed, narrow Payload/Metric message shape this intake
//! needs rather than generated from a `.proto` file — the message shape
//! is small and fixed, and a hand-written codec avoids depending on a
//! protobuf code-generation step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,
    #[error("truncated varint")]
    TruncatedVarint,
    #[error("truncated field at offset {0}")]
    TruncatedField(usize),
    #[error("unknown wire type {0}")]
    UnknownWireType(u8),
    #[error("unsupported datatype {0}")]
    UnsupportedDatatype(u32),
    #[error("json fallback failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// The Sparkplug B datatype enum values this intake understands, mapped
/// to the specific value field they're carried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Int32 = 1,
    Int64 = 4,
    Float = 9,
    Double = 10,
    Boolean = 11,
    String = 12,
}

impl Datatype {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Datatype::Int32),
            4 => Some(Datatype::Int64),
            9 => Some(Datatype::Float),
            10 => Some(Datatype::Double),
            11 => Some(Datatype::Boolean),
            12 => Some(Datatype::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Boolean(bool),
    Str(String),
}

impl MetricValue {
    /// Best-effort numeric view, used by tag intake to build a sample
    /// measurement out of whatever datatype the metric arrived as.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Int(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            MetricValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Str(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub timestamp: u64,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkplugPayload {
    pub timestamp: u64,
    pub seq: u64,
    pub metrics: Vec<Metric>,
}

// --- Protobuf wire format ---
//
// Payload:  1 = timestamp (varint), 2 = metrics (repeated message), 3 = seq (varint)
// Metric:   1 = name (string), 3 = timestamp (varint), 4 = datatype (varint),
//           5 = int_value (varint), 6 = long_value (varint), 7 = float_value (fixed32),
//           8 = double_value (fixed64), 9 = boolean_value (varint), 10 = string_value (string)

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn decode_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos).ok_or(DecodeError::TruncatedVarint)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::TruncatedVarint);
        }
    }
}

fn encode_tag(field: u32, wire_type: u8, out: &mut Vec<u8>) {
    encode_varint(((field as u64) << 3) | wire_type as u64, out);
}

fn encode_length_delimited(field: u32, bytes: &[u8], out: &mut Vec<u8>) {
    encode_tag(field, 2, out);
    encode_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

fn encode_varint_field(field: u32, value: u64, out: &mut Vec<u8>) {
    encode_tag(field, 0, out);
    encode_varint(value, out);
}

fn encode_fixed64_field(field: u32, value: f64, out: &mut Vec<u8>) {
    encode_tag(field, 1, out);
    out.extend_from_slice(&value.to_le_bytes());
}

fn encode_fixed32_field(field: u32, value: f32, out: &mut Vec<u8>) {
    encode_tag(field, 5, out);
    out.extend_from_slice(&value.to_le_bytes());
}

struct WireField {
    field: u32,
    wire_type: u8,
}

fn read_tag(bytes: &[u8], pos: &mut usize) -> Result<WireField, DecodeError> {
    let tag = decode_varint(bytes, pos)?;
    Ok(WireField {
        field: (tag >> 3) as u32,
        wire_type: (tag & 0x7) as u8,
    })
}

enum WireValue<'a> {
    Varint(u64),
    Fixed64([u8; 8]),
    LengthDelimited(&'a [u8]),
    Fixed32([u8; 4]),
}

fn read_value<'a>(bytes: &'a [u8], pos: &mut usize, wire_type: u8) -> Result<WireValue<'a>, DecodeError> {
    match wire_type {
        0 => Ok(WireValue::Varint(decode_varint(bytes, pos)?)),
        1 => {
            let start = *pos;
            let end = start + 8;
            let slice = bytes.get(start..end).ok_or(DecodeError::TruncatedField(start))?;
            *pos = end;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(slice);
            Ok(WireValue::Fixed64(buf))
        }
        2 => {
            let len = decode_varint(bytes, pos)? as usize;
            let start = *pos;
            let end = start + len;
            let slice = bytes.get(start..end).ok_or(DecodeError::TruncatedField(start))?;
            *pos = end;
            Ok(WireValue::LengthDelimited(slice))
        }
        5 => {
            let start = *pos;
            let end = start + 4;
            let slice = bytes.get(start..end).ok_or(DecodeError::TruncatedField(start))?;
            *pos = end;
            let mut buf = [0u8; 4];
            buf.copy_from_slice(slice);
            Ok(WireValue::Fixed32(buf))
        }
        other => Err(DecodeError::UnknownWireType(other)),
    }
}

fn encode_metric(metric: &Metric, out: &mut Vec<u8>) {
    encode_length_delimited(1, metric.name.as_bytes(), out);
    encode_varint_field(3, metric.timestamp, out);
    let (datatype, out_after_type) = match &metric.value {
        MetricValue::Int(v) if *v >= i32::MIN as i64 && *v <= i32::MAX as i64 => (Datatype::Int32, ()),
        MetricValue::Int(_) => (Datatype::Int64, ()),
        MetricValue::Float(_) => (Datatype::Double, ()),
        MetricValue::Boolean(_) => (Datatype::Boolean, ()),
        MetricValue::Str(_) => (Datatype::String, ()),
    };
    let _ = out_after_type;
    encode_varint_field(4, datatype as u64, out);
    match &metric.value {
        MetricValue::Int(v) if datatype == Datatype::Int32 => encode_varint_field(5, *v as u32 as u64, out),
        MetricValue::Int(v) => encode_varint_field(6, *v as u64, out),
        MetricValue::Float(v) => encode_fixed64_field(8, *v, out),
        MetricValue::Boolean(v) => encode_varint_field(9, u64::from(*v), out),
        MetricValue::Str(v) => encode_length_delimited(10, v.as_bytes(), out),
    }
}

fn decode_metric(bytes: &[u8]) -> Result<Metric, DecodeError> {
    let mut pos = 0;
    let mut name = String::new();
    let mut timestamp = 0u64;
    let mut datatype: Option<Datatype> = None;
    let mut int_value: Option<i64> = None;
    let mut float_value: Option<f64> = None;
    let mut bool_value: Option<bool> = None;
    let mut string_value: Option<String> = None;

    while pos < bytes.len() {
        let tag = read_tag(bytes, &mut pos)?;
        let value = read_value(bytes, &mut pos, tag.wire_type)?;
        match (tag.field, value) {
            (1, WireValue::LengthDelimited(s)) => name = String::from_utf8_lossy(s).into_owned(),
            (3, WireValue::Varint(v)) => timestamp = v,
            (4, WireValue::Varint(v)) => datatype = Datatype::from_code(v as u32),
            (5, WireValue::Varint(v)) => int_value = Some(v as i32 as i64),
            (6, WireValue::Varint(v)) => int_value = Some(v as i64),
            (7, WireValue::Fixed32(b)) => float_value = Some(f32::from_le_bytes(b) as f64),
            (8, WireValue::Fixed64(b)) => float_value = Some(f64::from_le_bytes(b)),
            (9, WireValue::Varint(v)) => bool_value = Some(v != 0),
            (10, WireValue::LengthDelimited(s)) => string_value = Some(String::from_utf8_lossy(s).into_owned()),
            _ => {} // unknown field, skip
        }
    }

    let datatype = datatype.ok_or(DecodeError::UnsupportedDatatype(0))?;
    let value = match datatype {
        Datatype::Int32 | Datatype::Int64 => MetricValue::Int(int_value.unwrap_or_default()),
        Datatype::Float | Datatype::Double => MetricValue::Float(float_value.unwrap_or_default()),
        Datatype::Boolean => MetricValue::Boolean(bool_value.unwrap_or_default()),
        Datatype::String => MetricValue::Str(string_value.unwrap_or_default()),
    };

    Ok(Metric { name, timestamp, value })
}

pub fn encode_payload(payload: &SparkplugPayload) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint_field(1, payload.timestamp, &mut out);
    for metric in &payload.metrics {
        let mut metric_bytes = Vec::new();
        encode_metric(metric, &mut metric_bytes);
        encode_length_delimited(2, &metric_bytes, &mut out);
    }
    encode_varint_field(3, payload.seq, &mut out);
    out
}

fn decode_protobuf(bytes: &[u8]) -> Result<SparkplugPayload, DecodeError> {
    let mut pos = 0;
    let mut timestamp = 0u64;
    let mut seq = 0u64;
    let mut metrics = Vec::new();

    while pos < bytes.len() {
        let tag = read_tag(bytes, &mut pos)?;
        let value = read_value(bytes, &mut pos, tag.wire_type)?;
        match (tag.field, value) {
            (1, WireValue::Varint(v)) => timestamp = v,
            (3, WireValue::Varint(v)) => seq = v,
            (2, WireValue::LengthDelimited(s)) => metrics.push(decode_metric(s)?),
            _ => {}
        }
    }

    Ok(SparkplugPayload { timestamp, seq, metrics })
}

/// Decode a Sparkplug payload, trying the protobuf wire format first and
/// falling back to JSON if protobuf parsing fails outright.
pub fn decode_payload(bytes: &[u8]) -> Result<SparkplugPayload, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    match decode_protobuf(bytes) {
        Ok(payload) => Ok(payload),
        Err(_) => Ok(serde_json::from_slice(bytes)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> SparkplugPayload {
        SparkplugPayload {
            timestamp: 1_700_000_000_000,
            seq: 3,
            metrics: vec![
                Metric {
                    name: "Diameter".into(),
                    timestamp: 1_700_000_000_001,
                    value: MetricValue::Float(12.345),
                },
                Metric {
                    name: "PartCount".into(),
                    timestamp: 1_700_000_000_002,
                    value: MetricValue::Int(42),
                },
            ],
        }
    }

    #[test]
    fn protobuf_roundtrips() {
        let payload = sample_payload();
        let bytes = encode_payload(&payload);
        let decoded = decode_payload(&bytes).unwrap();
        assert_eq!(decoded.timestamp, payload.timestamp);
        assert_eq!(decoded.seq, payload.seq);
        assert_eq!(decoded.metrics.len(), 2);
        assert_eq!(decoded.metrics[0].name, "Diameter");
        assert!(matches!(decoded.metrics[0].value, MetricValue::Float(v) if (v - 12.345).abs() < 1e-9));
        assert!(matches!(decoded.metrics[1].value, MetricValue::Int(42)));
    }

    #[test]
    fn json_fallback_decodes_same_shape() {
        let payload = sample_payload();
        let json = serde_json::to_vec(&payload).unwrap();
        let decoded = decode_payload(&json).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(matches!(decode_payload(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn metric_value_as_f64_covers_all_variants() {
        assert_eq!(MetricValue::Int(5).as_f64(), Some(5.0));
        assert_eq!(MetricValue::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(MetricValue::Str("3.5".into()).as_f64(), Some(3.5));
        assert_eq!(MetricValue::Str("nope".into()).as_f64(), None);
    }
}
