//! Typed values and their TLV (tag-length-value) binary framing.
//!
//! Every value on disk is framed as `[tag:1][len:4 LE][payload:len]`.
//! Numeric payloads are little-endian two's complement / IEEE-754; strings
//! are raw UTF-8 bytes. A second, unframed big-endian encoding exists solely
//! for index keys, where byte-lexicographic order has to mirror value order.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, ErrorKind, Result};

// Value type tags.
pub const TYPE_STRING: u8 = 2;
pub const TYPE_BYTE: u8 = 3;
pub const TYPE_BOOL: u8 = 4;
pub const TYPE_I32: u8 = 5;
pub const TYPE_F32: u8 = 7;
pub const TYPE_F64: u8 = 8;
pub const TYPE_I64: u8 = 10;

// Frame type tags.
pub const TYPE_WAL_ENTRY: u8 = 20;
pub const TYPE_COLUMN_DEFINITION: u8 = 99;
pub const TYPE_RECORD: u8 = 100;
pub const TYPE_DELETED_RECORD: u8 = 101;
pub const TYPE_INDEX_ITEM: u8 = 253;
pub const TYPE_INDEX: u8 = 254;
pub const TYPE_PAGE: u8 = 255;

pub const LEN_BYTE: usize = 1;
pub const LEN_I32: usize = 4;
pub const LEN_I64: usize = 8;
/// Size of the tag byte plus the 4-byte length prefix.
pub const LEN_META: usize = 5;

const FLOAT_EPSILON: f64 = 1e-9;

/// A typed scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Byte(u8),
    Str(String),
}

impl Value {
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::I32(_) => TYPE_I32,
            Value::I64(_) => TYPE_I64,
            Value::F32(_) => TYPE_F32,
            Value::F64(_) => TYPE_F64,
            Value::Bool(_) => TYPE_BOOL,
            Value::Byte(_) => TYPE_BYTE,
            Value::Str(_) => TYPE_STRING,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Value::I32(_) | Value::F32(_) => LEN_I32,
            Value::I64(_) | Value::F64(_) => LEN_I64,
            Value::Bool(_) | Value::Byte(_) => LEN_BYTE,
            Value::Str(s) => s.len(),
        }
    }

    /// Full TLV length of this value: `LEN_META + payload_len`.
    pub fn tlv_len(&self) -> u32 {
        (LEN_META + self.payload_len()) as u32
    }
}

/// Encodes a value as a TLV frame: `tag | len_le | payload`.
pub fn encode_value(v: &Value) -> BytesMut {
    let mut buf = BytesMut::with_capacity(LEN_META + v.payload_len());
    buf.put_u8(v.type_tag());
    buf.put_u32_le(v.payload_len() as u32);
    match v {
        Value::I32(n) => buf.put_i32_le(*n),
        Value::I64(n) => buf.put_i64_le(*n),
        Value::F32(n) => buf.put_f32_le(*n),
        Value::F64(n) => buf.put_f64_le(*n),
        Value::Bool(b) => buf.put_u8(*b as u8),
        Value::Byte(b) => buf.put_u8(*b),
        Value::Str(s) => buf.put_slice(s.as_bytes()),
    }
    buf
}

/// Encodes the raw payload big-endian, with no framing.
///
/// Used only to build index keys. Signed integers flip the high sign bit so
/// negative values sort before positive ones; floats use the standard
/// order-preserving transform for the same reason.
pub fn encode_value_big_endian(v: &Value) -> Vec<u8> {
    match v {
        Value::I32(n) => ((*n as u32) ^ 0x8000_0000).to_be_bytes().to_vec(),
        Value::I64(n) => ((*n as u64) ^ 0x8000_0000_0000_0000).to_be_bytes().to_vec(),
        Value::F32(n) => {
            let bits = n.to_bits();
            let ordered = if bits & 0x8000_0000 != 0 {
                !bits
            } else {
                bits ^ 0x8000_0000
            };
            ordered.to_be_bytes().to_vec()
        }
        Value::F64(n) => {
            let bits = n.to_bits();
            let ordered = if bits & 0x8000_0000_0000_0000 != 0 {
                !bits
            } else {
                bits ^ 0x8000_0000_0000_0000
            };
            ordered.to_be_bytes().to_vec()
        }
        Value::Bool(b) => vec![*b as u8],
        Value::Byte(b) => vec![*b],
        Value::Str(s) => s.as_bytes().to_vec(),
    }
}

/// Decodes one TLV frame from the front of `data`.
///
/// Returns the value and the number of bytes consumed. Fails with
/// `InvalidType` on an unknown tag and `ShortRead` when the slice is smaller
/// than the declared length.
pub fn decode_value(data: &[u8]) -> Result<(Value, usize)> {
    if data.len() < LEN_META {
        return Err(Error::new(
            ErrorKind::ShortRead,
            format!("TLV header needs {} bytes, have {}", LEN_META, data.len()),
        ));
    }
    let tag = data[0];
    let len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
    if data.len() < LEN_META + len {
        return Err(Error::new(
            ErrorKind::ShortRead,
            format!(
                "TLV payload declares {} bytes, have {}",
                len,
                data.len() - LEN_META
            ),
        ));
    }
    let payload = &data[LEN_META..LEN_META + len];
    let value = match tag {
        TYPE_I32 => Value::I32(i32::from_le_bytes(fixed(payload)?)),
        TYPE_I64 => Value::I64(i64::from_le_bytes(fixed(payload)?)),
        TYPE_F32 => Value::F32(f32::from_le_bytes(fixed(payload)?)),
        TYPE_F64 => Value::F64(f64::from_le_bytes(fixed(payload)?)),
        TYPE_BOOL => Value::Bool(*payload.first().ok_or_else(short_payload)? != 0),
        TYPE_BYTE => Value::Byte(*payload.first().ok_or_else(short_payload)?),
        TYPE_STRING => Value::Str(
            String::from_utf8(payload.to_vec())
                .map_err(|e| Error::new(ErrorKind::InvalidType, e.to_string()))?,
        ),
        other => {
            return Err(Error::new(
                ErrorKind::InvalidType,
                format!("unknown type tag: {other}"),
            ))
        }
    };
    Ok((value, LEN_META + len))
}

fn fixed<const N: usize>(payload: &[u8]) -> Result<[u8; N]> {
    payload
        .try_into()
        .map_err(|_| short_payload())
}

fn short_payload() -> Error {
    Error::new(ErrorKind::ShortRead, "payload shorter than its type width")
}

/// The operators understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Not,
}

impl Operator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Equal
                | Operator::NotEqual
                | Operator::Less
                | Operator::LessOrEqual
                | Operator::Greater
                | Operator::GreaterOrEqual
        )
    }
}

/// Compares two values under `op`.
///
/// Values of differing type tags never compare equal or ordered; the result
/// is false, not an error, so heterogeneous rows stay queryable. Equality on
/// floats is tolerant to `1e-9`.
pub fn compare(a: &Value, b: &Value, op: Operator) -> bool {
    match (a, b) {
        (Value::I32(x), Value::I32(y)) => compare_ord(x, y, op),
        (Value::I64(x), Value::I64(y)) => compare_ord(x, y, op),
        (Value::Bool(x), Value::Bool(y)) => compare_ord(x, y, op),
        (Value::Byte(x), Value::Byte(y)) => compare_ord(x, y, op),
        (Value::Str(x), Value::Str(y)) => compare_ord(x, y, op),
        (Value::F32(x), Value::F32(y)) => compare_float(*x as f64, *y as f64, op),
        (Value::F64(x), Value::F64(y)) => compare_float(*x, *y, op),
        _ => false,
    }
}

fn compare_ord<T: PartialOrd + PartialEq>(a: &T, b: &T, op: Operator) -> bool {
    match op {
        Operator::Equal => a == b,
        Operator::NotEqual => a != b,
        Operator::Less => a < b,
        Operator::LessOrEqual => a <= b,
        Operator::Greater => a > b,
        Operator::GreaterOrEqual => a >= b,
        _ => false,
    }
}

fn compare_float(a: f64, b: f64, op: Operator) -> bool {
    match op {
        Operator::Equal => (a - b).abs() <= FLOAT_EPSILON,
        Operator::NotEqual => a != b,
        Operator::Less => a < b,
        Operator::LessOrEqual => a <= b,
        Operator::Greater => a > b,
        Operator::GreaterOrEqual => a >= b,
        _ => false,
    }
}
