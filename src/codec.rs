//! A minimal key/value codec implementing exactly the comparator's input
//! contract: it produces the same tagged, big-endian field encoding the
//! comparator expects to decode. Included only so the engine can be driven
//! and tested end to end without a SQL layer sitting on top of it. It does
//! not parse SQL or evaluate predicates.
//!
//! Field ordering and widths mirror `original_source/datatype.go`.

use crate::comparator::FieldTag;

/// One typed field of a key, in the closed set the comparator recognizes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Char(String),
    VarChar(String),
}

impl FieldValue {
    fn tag(&self) -> FieldTag {
        match self {
            FieldValue::Null => FieldTag::Null,
            FieldValue::SmallInt(_) => FieldTag::SmallInt,
            FieldValue::Int(_) => FieldTag::Int,
            FieldValue::BigInt(_) => FieldTag::BigInt,
            FieldValue::Float(_) => FieldTag::Float,
            FieldValue::Double(_) => FieldTag::Double,
            FieldValue::Char(_) => FieldTag::Char,
            FieldValue::VarChar(_) => FieldTag::VarChar,
        }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            FieldValue::Null => {}
            FieldValue::SmallInt(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::BigInt(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Char(s) | FieldValue::VarChar(s) => {
                let bytes = s.as_bytes();
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }
}

/// Encodes a sequence of fields into an opaque, totally-ordered key blob.
pub fn encode_key(fields: &[FieldValue]) -> Vec<u8> {
    assert!(fields.len() <= u8::MAX as usize, "too many key fields");
    let mut out = Vec::new();
    out.push(fields.len() as u8);
    for f in fields {
        out.push(f.tag() as u8);
    }
    for f in fields {
        f.encode_body(&mut out);
    }
    out
}

/// Values are opaque blobs to the storage engine; this crate encodes them
/// with the same field framing as keys for convenience in tests and the CLI.
pub fn encode_value(fields: &[FieldValue]) -> Vec<u8> {
    encode_key(fields)
}

/// Decodes a blob produced by `encode_key`/`encode_value` back into fields.
/// Used by the CLI and tests to print rows; the storage engine itself never
/// calls this.
pub fn decode_fields(bytes: &[u8]) -> Vec<FieldValue> {
    let n = bytes[0] as usize;
    let tags: Vec<u8> = bytes[1..1 + n].to_vec();
    let mut off = 1 + n;
    let mut out = Vec::with_capacity(n);
    for tag_byte in tags {
        let tag = FieldTag::from_u8(tag_byte).expect("invalid field tag");
        let (value, consumed) = match tag {
            FieldTag::Null => (FieldValue::Null, 0),
            FieldTag::SmallInt => (
                FieldValue::SmallInt(i16::from_be_bytes(bytes[off..off + 2].try_into().unwrap())),
                2,
            ),
            FieldTag::Int => (
                FieldValue::Int(i32::from_be_bytes(bytes[off..off + 4].try_into().unwrap())),
                4,
            ),
            FieldTag::BigInt => (
                FieldValue::BigInt(i64::from_be_bytes(bytes[off..off + 8].try_into().unwrap())),
                8,
            ),
            FieldTag::Float => (
                FieldValue::Float(f32::from_be_bytes(bytes[off..off + 4].try_into().unwrap())),
                4,
            ),
            FieldTag::Double => (
                FieldValue::Double(f64::from_be_bytes(bytes[off..off + 8].try_into().unwrap())),
                8,
            ),
            FieldTag::Char | FieldTag::VarChar => {
                let len = u16::from_be_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
                let s = String::from_utf8_lossy(&bytes[off + 2..off + 2 + len]).into_owned();
                let v = if matches!(tag, FieldTag::Char) {
                    FieldValue::Char(s)
                } else {
                    FieldValue::VarChar(s)
                };
                (v, 2 + len)
            }
        };
        off += consumed;
        out.push(value);
    }
    out
}
