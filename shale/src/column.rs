//! Column definitions: a fixed-size name, a value type tag and an options
//! bitset, persisted as a frame prefix at the head of every table file.

use bytes::{BufMut, BytesMut};

use strata::codec::{self, Value, LEN_META, TYPE_COLUMN_DEFINITION};
use strata::{Error, ErrorKind, Result};

/// Column names occupy exactly this many bytes on disk, NUL-padded.
pub const NAME_LEN: usize = 64;

/// The column options bitset.
///
/// `PRIMARY_KEY` implies `USING_UNIQUE_INDEX`, which implies `USING_INDEX`;
/// `is` tests the full flag pattern, not any single bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOpts(u32);

impl ColumnOpts {
    pub const NORMAL: ColumnOpts = ColumnOpts(0);
    pub const USING_INDEX: ColumnOpts = ColumnOpts(1);
    pub const USING_UNIQUE_INDEX: ColumnOpts = ColumnOpts(1 | 2);
    pub const PRIMARY_KEY: ColumnOpts = ColumnOpts(1 | 2 | 4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        ColumnOpts(bits)
    }

    pub fn is(self, flag: ColumnOpts) -> bool {
        self.0 & flag.0 == flag.0
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    name: [u8; NAME_LEN],
    pub data_type: u8,
    pub opts: ColumnOpts,
}

impl Column {
    pub fn new(name: &str, data_type: u8, opts: ColumnOpts) -> Result<Self> {
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(Error::new(
                ErrorKind::InvalidNameLength,
                format!(
                    "column name must be 1..={NAME_LEN} bytes, got {}",
                    name.len()
                ),
            ));
        }
        let mut padded = [0u8; NAME_LEN];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            name: padded,
            data_type,
            opts,
        })
    }

    pub fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or_default()
    }

    pub fn is_indexed(&self) -> bool {
        self.opts.is(ColumnOpts::USING_INDEX)
    }

    pub fn is_unique(&self) -> bool {
        self.opts.is(ColumnOpts::USING_UNIQUE_INDEX)
    }

    pub fn is_primary_key(&self) -> bool {
        self.opts.is(ColumnOpts::PRIMARY_KEY)
    }

    /// `TLV(99){ TLV(name, 64 bytes padded) TLV(type) TLV(opts) }`
    pub fn encode(&self) -> Vec<u8> {
        let name = String::from_utf8_lossy(&self.name).into_owned();
        let name_tlv = codec::encode_value(&Value::Str(name));
        let type_tlv = codec::encode_value(&Value::Byte(self.data_type));
        let opts_tlv = codec::encode_value(&Value::I32(self.opts.bits() as i32));

        let len = name_tlv.len() + type_tlv.len() + opts_tlv.len();
        let mut buf = BytesMut::with_capacity(LEN_META + len);
        buf.put_u8(TYPE_COLUMN_DEFINITION);
        buf.put_u32_le(len as u32);
        buf.put_slice(&name_tlv);
        buf.put_slice(&type_tlv);
        buf.put_slice(&opts_tlv);
        buf.to_vec()
    }

    /// Decodes one definition frame, returning the column and the bytes
    /// consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.first() != Some(&TYPE_COLUMN_DEFINITION) {
            return Err(Error::new(
                ErrorKind::InvalidType,
                "not a column definition frame",
            ));
        }
        if data.len() < LEN_META {
            return Err(Error::new(ErrorKind::ShortRead, "column definition header"));
        }
        let len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
        if data.len() < LEN_META + len {
            return Err(Error::new(ErrorKind::ShortRead, "column definition body"));
        }
        let body = &data[LEN_META..LEN_META + len];

        let (name_value, read) = codec::decode_value(body)?;
        let mut consumed = read;
        let (type_value, read) = codec::decode_value(&body[consumed..])?;
        consumed += read;
        let (opts_value, _) = codec::decode_value(&body[consumed..])?;

        let (Value::Str(name), Value::Byte(data_type), Value::I32(opts)) =
            (name_value, type_value, opts_value)
        else {
            return Err(Error::new(
                ErrorKind::InvalidType,
                "malformed column definition fields",
            ));
        };
        if name.len() != NAME_LEN {
            return Err(Error::new(
                ErrorKind::InvalidNameLength,
                format!("stored column name must be {NAME_LEN} bytes, got {}", name.len()),
            ));
        }
        let mut padded = [0u8; NAME_LEN];
        padded.copy_from_slice(name.as_bytes());

        Ok((
            Self {
                name: padded,
                data_type,
                opts: ColumnOpts::from_bits(opts as u32),
            },
            LEN_META + len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::codec::{TYPE_I32, TYPE_I64, TYPE_STRING};

    #[test]
    fn round_trip_preserves_name_type_and_opts() {
        let col = Column::new("username", TYPE_STRING, ColumnOpts::USING_UNIQUE_INDEX).unwrap();
        let encoded = col.encode();
        let (decoded, consumed) = Column::decode(&encoded).unwrap();

        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.name(), "username");
        assert_eq!(decoded.data_type, TYPE_STRING);
        assert!(decoded.is_unique());
        assert!(!decoded.is_primary_key());
    }

    #[test]
    fn flag_implication_chain() {
        let pk = Column::new("id", TYPE_I64, ColumnOpts::PRIMARY_KEY).unwrap();
        assert!(pk.is_primary_key());
        assert!(pk.is_unique());
        assert!(pk.is_indexed());

        let plain = Column::new("age", TYPE_I32, ColumnOpts::USING_INDEX).unwrap();
        assert!(plain.is_indexed());
        assert!(!plain.is_unique());
        assert!(!plain.is_primary_key());
    }

    #[test]
    fn overlong_names_are_rejected() {
        let name = "x".repeat(NAME_LEN + 1);
        let err = Column::new(&name, TYPE_I32, ColumnOpts::NORMAL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidNameLength);
    }
}
