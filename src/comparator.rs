//! The key comparator.
//!
//! Keys are opaque byte strings produced by an external record codec (see
//! `codec.rs` for the one bundled with this crate for testing). This module
//! only knows how to compare two such strings; it never constructs one.

use std::cmp::Ordering;

/// Type tags a key's fields may carry, in ascending comparison order.
/// The numeric value of each tag IS its comparison rank: a lower tag
/// compares less than a higher one whenever two fields differ in type
/// (this only happens when a NULL meets a non-NULL field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldTag {
    Null = 0,
    SmallInt = 1,
    Int = 2,
    BigInt = 3,
    Float = 4,
    Double = 5,
    Char = 6,
    VarChar = 7,
}

impl FieldTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FieldTag::Null),
            1 => Some(FieldTag::SmallInt),
            2 => Some(FieldTag::Int),
            3 => Some(FieldTag::BigInt),
            4 => Some(FieldTag::Float),
            5 => Some(FieldTag::Double),
            6 => Some(FieldTag::Char),
            7 => Some(FieldTag::VarChar),
            _ => None,
        }
    }
}

/// Compares two opaque key blobs field by field, in encoded order.
///
/// Keys within one table must share field count and type-tag sequence;
/// violating that is a programmer error upstream of this engine, so a
/// mismatched pair panics rather than returning a user-facing error.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    let n_fields = a[0];
    assert_eq!(
        n_fields, b[0],
        "keys being compared have different field counts"
    );

    let mut a_off = 1 + n_fields as usize;
    let mut b_off = 1 + n_fields as usize;

    for i in 0..n_fields as usize {
        let a_tag = a[1 + i];
        let b_tag = b[1 + i];
        if a_tag != b_tag {
            return a_tag.cmp(&b_tag);
        }
        let tag = FieldTag::from_u8(a_tag).expect("invalid field tag in key");

        let (ord, a_len, b_len) = compare_field(tag, &a[a_off..], &b[b_off..]);
        a_off += a_len;
        b_off += b_len;

        if ord != Ordering::Equal {
            return ord;
        }
    }

    Ordering::Equal
}

/// Returns (ordering, bytes consumed from `a`, bytes consumed from `b`).
fn compare_field(tag: FieldTag, a: &[u8], b: &[u8]) -> (Ordering, usize, usize) {
    match tag {
        FieldTag::Null => (Ordering::Equal, 0, 0),
        FieldTag::SmallInt => {
            let ax = i16::from_be_bytes(a[..2].try_into().unwrap());
            let bx = i16::from_be_bytes(b[..2].try_into().unwrap());
            (ax.cmp(&bx), 2, 2)
        }
        FieldTag::Int => {
            let ax = i32::from_be_bytes(a[..4].try_into().unwrap());
            let bx = i32::from_be_bytes(b[..4].try_into().unwrap());
            (ax.cmp(&bx), 4, 4)
        }
        FieldTag::BigInt => {
            let ax = i64::from_be_bytes(a[..8].try_into().unwrap());
            let bx = i64::from_be_bytes(b[..8].try_into().unwrap());
            (ax.cmp(&bx), 8, 8)
        }
        FieldTag::Float => {
            let ax = f32::from_be_bytes(a[..4].try_into().unwrap());
            let bx = f32::from_be_bytes(b[..4].try_into().unwrap());
            (ax.partial_cmp(&bx).expect("NaN in key field"), 4, 4)
        }
        FieldTag::Double => {
            let ax = f64::from_be_bytes(a[..8].try_into().unwrap());
            let bx = f64::from_be_bytes(b[..8].try_into().unwrap());
            (ax.partial_cmp(&bx).expect("NaN in key field"), 8, 8)
        }
        FieldTag::Char | FieldTag::VarChar => {
            let a_len = u16::from_be_bytes(a[..2].try_into().unwrap()) as usize;
            let b_len = u16::from_be_bytes(b[..2].try_into().unwrap()) as usize;
            let a_str = &a[2..2 + a_len];
            let b_str = &b[2..2 + b_len];
            (a_str.cmp(b_str), 2 + a_len, 2 + b_len)
        }
    }
}
