//! A per-table append-only write-ahead log with a commit marker.
//!
//! Entries are framed as `[20][entryLen:4 LE][TLV(id) TLV(table) TLV(op)]
//! payload`; the payload of an `insert` entry is the raw record frame it
//! made durable. A tiny sidecar file holds the id and frame length of the
//! last entry whose effects are known to be on the table file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use crate::codec::{self, Value, LEN_META, TYPE_RECORD, TYPE_WAL_ENTRY};
use crate::error::{Error, ErrorKind, Result};

pub const OP_INSERT: &str = "insert";

pub const WAL_FILE_SUFFIX: &str = "_wal.bin";
pub const WAL_MARKER_SUFFIX: &str = "_wal_last_committed.bin";

/// A handle to an appended log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// 128-bit unique identifier rendered as 32 hex characters.
    pub id: String,
    /// Full length of the entry frame in bytes, header included.
    pub len: u32,
}

/// Entries that survived a crash without being committed.
#[derive(Debug)]
pub struct RestorableData {
    pub last_entry: Entry,
    /// Concatenated raw record frames, in append order.
    pub data: Vec<u8>,
}

pub struct Wal {
    file: File,
    marker_path: PathBuf,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(dir: P, table: &str) -> Result<Self> {
        let dir = dir.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{table}{WAL_FILE_SUFFIX}")))
            .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;
        let marker_path = dir.join(format!("{table}{WAL_MARKER_SUFFIX}"));
        Ok(Self { file, marker_path })
    }

    /// Appends an entry holding `payload` and returns its handle. The entry
    /// is not considered durable until [`Wal::commit`] runs for it.
    pub fn append(&mut self, op: &str, table: &str, payload: &[u8]) -> Result<Entry> {
        let id = Uuid::new_v4().simple().to_string();

        self.file
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;

        let id_tlv = codec::encode_value(&Value::Str(id.clone()));
        let table_tlv = codec::encode_value(&Value::Str(table.to_string()));
        let op_tlv = codec::encode_value(&Value::Str(op.to_string()));
        let entry_len = id_tlv.len() + table_tlv.len() + op_tlv.len() + payload.len();

        let mut frame = BytesMut::with_capacity(LEN_META + entry_len);
        frame.put_u8(TYPE_WAL_ENTRY);
        frame.put_u32_le(entry_len as u32);
        frame.put_slice(&id_tlv);
        frame.put_slice(&table_tlv);
        frame.put_slice(&op_tlv);
        frame.put_slice(payload);

        self.file
            .write_all(&frame)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;

        Ok(Entry {
            id,
            len: frame.len() as u32,
        })
    }

    /// Moves the commit marker past `entry`.
    pub fn commit(&mut self, entry: &Entry) -> Result<()> {
        let mut marker = BytesMut::new();
        marker.put_slice(&codec::encode_value(&Value::Str(entry.id.clone())));
        marker.put_u32_le(entry.len);
        std::fs::write(&self.marker_path, &marker)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))
    }

    /// Startup check: returns the record frames appended after the last
    /// committed entry, or `None` when the log and the marker agree.
    ///
    /// A missing or empty marker next to a non-empty log means nothing was
    /// ever committed, so every entry is restorable.
    pub fn get_restorable(&mut self) -> Result<Option<RestorableData>> {
        let mut wal_bytes = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        self.file
            .read_to_end(&mut wal_bytes)
            .map_err(|e| Error::new(ErrorKind::ShortRead, e.to_string()))?;
        if wal_bytes.is_empty() {
            return Ok(None);
        }

        let committed_id = self.read_marker()?;
        let entries = parse_entries(&wal_bytes)?;
        let last = match entries.last() {
            Some(e) => Entry {
                id: e.id.clone(),
                len: e.frame_len,
            },
            None => return Ok(None),
        };
        if committed_id.as_deref() == Some(last.id.as_str()) {
            return Ok(None);
        }

        crate::strata_debug_log!(
            "[Wal::get_restorable] {} entries in log, committed id: {:?}",
            entries.len(),
            committed_id
        );

        let mut past_commit = committed_id.is_none();
        let mut data = Vec::new();
        for entry in &entries {
            if !past_commit {
                if Some(entry.id.as_str()) == committed_id.as_deref() {
                    past_commit = true;
                }
                continue;
            }
            if entry.op != OP_INSERT {
                return Err(Error::new(
                    ErrorKind::UnknownOperator,
                    format!("unsupported replay op: {}", entry.op),
                ));
            }
            if entry.payload.first() != Some(&TYPE_RECORD) {
                return Err(Error::new(
                    ErrorKind::InvalidType,
                    "wal payload is not a record frame",
                ));
            }
            data.extend_from_slice(entry.payload);
        }

        Ok(Some(RestorableData {
            last_entry: last,
            data,
        }))
    }

    fn read_marker(&self) -> Result<Option<String>> {
        let bytes = match std::fs::read(&self.marker_path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::new(ErrorKind::OpenFile, e.to_string())),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        let (id, _) = codec::decode_value(&bytes)?;
        match id {
            Value::Str(id) => Ok(Some(id)),
            _ => Err(Error::new(
                ErrorKind::InvalidType,
                "commit marker id is not a string",
            )),
        }
    }
}

struct ParsedEntry<'a> {
    id: String,
    op: String,
    payload: &'a [u8],
    frame_len: u32,
}

fn parse_entries(wal_bytes: &[u8]) -> Result<Vec<ParsedEntry<'_>>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < wal_bytes.len() {
        let tag = wal_bytes[pos];
        if tag != TYPE_WAL_ENTRY {
            return Err(Error::new(
                ErrorKind::InvalidType,
                format!("expected wal entry tag {TYPE_WAL_ENTRY}, got {tag}"),
            ));
        }
        if pos + LEN_META > wal_bytes.len() {
            return Err(Error::new(ErrorKind::ShortRead, "truncated wal entry header"));
        }
        let entry_len = u32::from_le_bytes([
            wal_bytes[pos + 1],
            wal_bytes[pos + 2],
            wal_bytes[pos + 3],
            wal_bytes[pos + 4],
        ]) as usize;
        let frame_end = pos + LEN_META + entry_len;
        if frame_end > wal_bytes.len() {
            return Err(Error::new(ErrorKind::ShortRead, "truncated wal entry body"));
        }

        let body = &wal_bytes[pos + LEN_META..frame_end];
        let (id, read) = decode_string(body)?;
        let mut consumed = read;
        let (_table, read) = decode_string(&body[consumed..])?;
        consumed += read;
        let (op, read) = decode_string(&body[consumed..])?;
        consumed += read;

        entries.push(ParsedEntry {
            id,
            op,
            payload: &body[consumed..],
            frame_len: (LEN_META + entry_len) as u32,
        });
        pos = frame_end;
    }
    Ok(entries)
}

fn decode_string(data: &[u8]) -> Result<(String, usize)> {
    match codec::decode_value(data)? {
        (Value::Str(s), n) => Ok((s, n)),
        (other, _) => Err(Error::new(
            ErrorKind::InvalidType,
            format!("expected a string field, got {other:?}"),
        )),
    }
}
