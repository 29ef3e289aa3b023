//! The index layer: maps (column value, row id) composites to the page
//! offsets of the records holding them.
//!
//! Keys are built from the big-endian value encoding so that the B-tree's
//! byte-lexicographic order mirrors numeric/lexical value order. Non-unique
//! indexes append the row id to the value bytes to keep composite keys
//! unique while still answering equality by prefix.

use std::collections::HashSet;
use std::path::Path;

use bytes::{BufMut, BytesMut};

use crate::btree::BTree;
use crate::codec::{self, Operator, Value, LEN_I64, LEN_META, TYPE_INDEX_ITEM};
use crate::error::{Error, ErrorKind, Result};

/// Width of the `0x00`/`0xff` padding appended to composite probe keys so
/// inclusive range bounds cover every id tie-break. Matches the width of an
/// i64 row id; ids with other widths sitting exactly on the synthetic bound
/// are a known edge case.
const RANGE_PAD_LEN: usize = LEN_I64;

/// One indexed occurrence of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexItem {
    pub value: Value,
    pub id: Value,
    pub page_offset: i64,
}

impl IndexItem {
    pub fn new(value: Value, id: Value, page_offset: i64) -> Self {
        Self {
            value,
            id,
            page_offset,
        }
    }

    /// `[253][len:4 LE][TLV(id) TLV(value) TLV(page_offset)]`
    pub fn marshal(&self) -> Vec<u8> {
        let id_tlv = codec::encode_value(&self.id);
        let value_tlv = codec::encode_value(&self.value);
        let offset_tlv = codec::encode_value(&Value::I64(self.page_offset));

        let len = id_tlv.len() + value_tlv.len() + offset_tlv.len();
        let mut buf = BytesMut::with_capacity(LEN_META + len);
        buf.put_u8(TYPE_INDEX_ITEM);
        buf.put_u32_le(len as u32);
        buf.put_slice(&id_tlv);
        buf.put_slice(&value_tlv);
        buf.put_slice(&offset_tlv);
        buf.to_vec()
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        if data.first() != Some(&TYPE_INDEX_ITEM) {
            return Err(Error::new(
                ErrorKind::InvalidType,
                "not an index item frame",
            ));
        }
        if data.len() < LEN_META {
            return Err(Error::new(ErrorKind::ShortRead, "index item header"));
        }
        let body = &data[LEN_META..];
        let (id, read) = codec::decode_value(body)?;
        let mut consumed = read;
        let (value, read) = codec::decode_value(&body[consumed..])?;
        consumed += read;
        let (offset, _) = codec::decode_value(&body[consumed..])?;
        let Value::I64(page_offset) = offset else {
            return Err(Error::new(
                ErrorKind::InvalidType,
                "index item page offset is not an i64",
            ));
        };
        Ok(Self {
            value,
            id,
            page_offset,
        })
    }
}

pub struct Index {
    tree: BTree,
    unique: bool,
}

impl Index {
    pub fn open<P: AsRef<Path>>(path: P, unique: bool) -> Result<Self> {
        Ok(Self {
            tree: BTree::open(path)?,
            unique,
        })
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn close(&mut self) -> Result<()> {
        self.tree.close()
    }

    /// Adds an item. A unique index probes for equality first and refuses
    /// any hit.
    pub fn add(&mut self, item: IndexItem) -> Result<()> {
        if self.unique {
            let existing = self.get(&item.value, Operator::Equal)?;
            if !existing.is_empty() {
                return Err(Error::new(
                    ErrorKind::UniqueViolation,
                    format!("value: {:?}", item.value),
                ));
            }
        }
        let key = composite_key(&item.value, &item.id);
        self.tree.insert(&key, &item.marshal())
    }

    /// Removes the entry for the full composite key.
    pub fn remove(&mut self, value: &Value, id: &Value) -> Result<bool> {
        self.tree.remove(&composite_key(value, id))
    }

    /// Resolves `value` under `op` into index items, ascending by key.
    /// Items pointing at an already-seen page offset are coalesced away.
    pub fn get(&mut self, value: &Value, op: Operator) -> Result<Vec<IndexItem>> {
        let value_key = codec::encode_value_big_endian(value);

        let entries = match op {
            Operator::Equal => {
                if self.unique {
                    let key = composite_key(value, value);
                    self.tree.get(&key)?.into_iter().collect()
                } else {
                    self.tree.get_prefix(&value_key)?
                }
            }
            Operator::Less => {
                if self.unique {
                    self.tree.less_than(&composite_key(value, value))?
                } else {
                    self.tree.less_than(&value_key)?
                }
            }
            Operator::LessOrEqual => {
                if self.unique {
                    self.tree.less_than_or_equal(&composite_key(value, value))?
                } else {
                    self.tree.less_than_or_equal(&padded(&value_key, 0xff))?
                }
            }
            Operator::Greater => {
                if self.unique {
                    self.tree.greater_than(&composite_key(value, value))?
                } else {
                    self.tree.greater_than(&padded(&value_key, 0xff))?
                }
            }
            Operator::GreaterOrEqual => {
                if self.unique {
                    self.tree
                        .greater_than_or_equal(&composite_key(value, value))?
                } else {
                    self.tree.greater_than_or_equal(&padded(&value_key, 0x00))?
                }
            }
            Operator::NotEqual => {
                return Err(Error::new(
                    ErrorKind::UnsupportedOperator,
                    "NotEqual cannot be answered by an index probe",
                ))
            }
            other => {
                return Err(Error::new(
                    ErrorKind::UnknownOperator,
                    format!("{other:?} is not an index operator"),
                ))
            }
        };

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let item = IndexItem::unmarshal(&entry.value)?;
            if seen.insert(item.page_offset) {
                items.push(item);
            }
        }
        Ok(items)
    }
}

/// `big_endian(value) || big_endian(id)`. Unique indexes pass `id = value`,
/// collapsing the key to the value bytes alone.
fn composite_key(value: &Value, id: &Value) -> Vec<u8> {
    let mut key = codec::encode_value_big_endian(value);
    key.extend(codec::encode_value_big_endian(id));
    key
}

fn padded(value_key: &[u8], fill: u8) -> Vec<u8> {
    let mut key = value_key.to_vec();
    key.extend(std::iter::repeat(fill).take(RANGE_PAD_LEN));
    key
}
