//! Record framing: `[100][payloadLen:4 LE][TLV(col1) … TLV(colN)]` in
//! column declaration order. A deleted record keeps the identical frame
//! under tag `101` so offset arithmetic over a page stays valid.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

use strata::codec::{self, Value, LEN_META, TYPE_DELETED_RECORD, TYPE_RECORD};
use strata::{Error, ErrorKind, Result};

pub type RecordValues = HashMap<String, Value>;

/// One record as read back from the table file.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// File offset of the record frame.
    pub offset: u64,
    /// Payload length in bytes.
    pub size: u32,
    /// Payload length plus the frame header.
    pub full_size: u32,
    pub values: RecordValues,
}

/// Encodes a record frame. The caller has already validated that `values`
/// holds every column in `column_order`.
pub fn encode_record(column_order: &[String], values: &RecordValues) -> Result<Vec<u8>> {
    let mut payload_len = 0u32;
    for name in column_order {
        let value = values.get(name).ok_or_else(|| missing(name))?;
        payload_len += value.tlv_len();
    }

    let mut buf = BytesMut::with_capacity(LEN_META + payload_len as usize);
    buf.put_u8(TYPE_RECORD);
    buf.put_u32_le(payload_len);
    for name in column_order {
        let value = values.get(name).ok_or_else(|| missing(name))?;
        buf.put_slice(&codec::encode_value(value));
    }
    Ok(buf.to_vec())
}

/// Decodes the column values out of one record frame.
pub fn decode_record_values(frame: &[u8], column_order: &[String]) -> Result<RecordValues> {
    if frame.first() != Some(&TYPE_RECORD) && frame.first() != Some(&TYPE_DELETED_RECORD) {
        return Err(Error::new(ErrorKind::InvalidType, "not a record frame"));
    }
    if frame.len() < LEN_META {
        return Err(Error::new(ErrorKind::ShortRead, "record frame header"));
    }
    let payload_len = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    if frame.len() < LEN_META + payload_len {
        return Err(Error::new(ErrorKind::ShortRead, "record frame body"));
    }
    let body = &frame[LEN_META..LEN_META + payload_len];

    let mut values = RecordValues::with_capacity(column_order.len());
    let mut consumed = 0usize;
    for name in column_order {
        let (value, read) = codec::decode_value(&body[consumed..])?;
        values.insert(name.clone(), value);
        consumed += read;
    }
    Ok(values)
}

/// Length in bytes of the record frame starting at the front of `data`.
pub fn record_frame_len(data: &[u8]) -> Result<usize> {
    if data.len() < LEN_META {
        return Err(Error::new(ErrorKind::ShortRead, "record frame header"));
    }
    let payload_len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
    Ok(LEN_META + payload_len)
}

/// Parses every live record out of one page payload, skipping tombstones.
///
/// `page_offset` is the file offset of the page frame, so each returned
/// record carries its absolute frame offset.
pub fn parse_page_records(
    payload: &[u8],
    page_offset: u64,
    column_order: &[String],
) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < payload.len() {
        let remaining = &payload[pos..];
        let tag = remaining[0];
        let frame_len = record_frame_len(remaining)?;
        if frame_len > remaining.len() {
            return Err(Error::new(
                ErrorKind::InvalidPage,
                format!("record frame of {frame_len} bytes overruns its page payload"),
            ));
        }
        match tag {
            TYPE_DELETED_RECORD => {}
            TYPE_RECORD => {
                let values = decode_record_values(&remaining[..frame_len], column_order)?;
                records.push(RawRecord {
                    offset: page_offset + LEN_META as u64 + pos as u64,
                    size: (frame_len - LEN_META) as u32,
                    full_size: frame_len as u32,
                    values,
                });
            }
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidPage,
                    format!("unexpected frame tag {other} inside a page"),
                ))
            }
        }
        pos += frame_len;
    }
    Ok(records)
}

fn missing(name: &str) -> Error {
    Error::new(ErrorKind::MissingColumn, name.to_string())
}
