//! The paged table file and its executor.
//!
//! A table file starts with a column-definition prefix and continues as a
//! sequence of page frames `[255][usedLen:4 LE][payload]`. Records never
//! straddle pages: an insert lands in the first page with enough remaining
//! capacity, otherwise a fresh page is appended. Deletion flips a record's
//! tag to the tombstone marker and leaves its bytes in place.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use strata::codec::{Operator, Value, LEN_META, TYPE_DELETED_RECORD, TYPE_PAGE};
use strata::index::{Index, IndexItem};
use strata::lru::Lru;
use strata::wal::{Wal, OP_INSERT};
use strata::{Error, ErrorKind, Result, PAGE_SIZE};

use crate::column::Column;
use crate::expr::Expr;
use crate::record::{self, RawRecord, RecordValues};
use crate::types::AccessType;

pub const FILE_EXTENSION: &str = ".bin";

/// Capacity of the per-table page cache.
const PAGE_CACHE_CAPACITY: usize = 10;

pub struct Table {
    pub name: String,
    file: File,
    dir: PathBuf,
    column_names: Vec<String>,
    columns: HashMap<String, Column>,
    primary_key: String,
    /// File offset of the first byte after the column-definition prefix.
    data_start: u64,
    /// Monotone insert cursor; capacity left behind in earlier pages is
    /// not revisited.
    last_page_offset: Option<u64>,
    wal: Wal,
    indexes: HashMap<String, Index>,
    cache: Lru<String, Vec<u8>>,
}

impl Table {
    /// Creates a new table file, writes the column-definition prefix and
    /// opens one index per indexed column.
    pub fn create<P: AsRef<Path>>(dir: P, name: &str, columns: Vec<Column>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        validate_table_name(name)?;
        validate_column_set(&columns)?;

        let path = dir.join(format!("{name}{FILE_EXTENSION}"));
        if path.exists() {
            return Err(Error::new(ErrorKind::TableAlreadyExists, name));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;

        for column in &columns {
            file.write_all(&column.encode())
                .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        }
        let data_start = file
            .seek(SeekFrom::Current(0))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;

        Self::assemble(dir, name.to_string(), file, columns, data_start)
    }

    /// Opens an existing table file, reading its column definitions and
    /// replaying any uncommitted WAL entries.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(format!("{name}{FILE_EXTENSION}"));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;

        let (columns, data_start) = read_column_definitions(&mut file)?;
        let mut table = Self::assemble(dir, name.to_string(), file, columns, data_start)?;
        table.restore_from_wal()?;
        Ok(table)
    }

    fn assemble(
        dir: PathBuf,
        name: String,
        file: File,
        columns: Vec<Column>,
        data_start: u64,
    ) -> Result<Self> {
        let wal = Wal::open(&dir, &name)?;

        let mut column_names = Vec::with_capacity(columns.len());
        let mut column_map = HashMap::with_capacity(columns.len());
        let mut primary_key = String::new();
        let mut indexes = HashMap::new();

        for column in columns {
            let col_name = column.name().to_string();
            if column.is_primary_key() {
                primary_key = col_name.clone();
            }
            if column.is_indexed() {
                let path = index_path(&dir, &name, &column);
                indexes.insert(col_name.clone(), Index::open(path, column.is_unique())?);
            }
            column_names.push(col_name.clone());
            column_map.insert(col_name, column);
        }

        Ok(Self {
            name,
            file,
            dir,
            column_names,
            columns: column_map,
            primary_key,
            data_start,
            last_page_offset: None,
            wal,
            indexes,
            cache: Lru::new(PAGE_CACHE_CAPACITY),
        })
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Every file belonging to this table, for drop-table cleanup.
    pub fn owned_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.dir.join(format!("{}{FILE_EXTENSION}", self.name))];
        for name in &self.column_names {
            let column = &self.columns[name];
            if column.is_indexed() {
                let index = index_path(&self.dir, &self.name, column);
                let mut sidecar = index.as_os_str().to_os_string();
                sidecar.push(".del");
                files.push(index);
                files.push(PathBuf::from(sidecar));
            }
        }
        files.push(self.dir.join(format!("{}_wal.bin", self.name)));
        files.push(self.dir.join(format!("{}_wal_last_committed.bin", self.name)));
        files
    }

    /// Inserts one record: validate, probe unique indexes, WAL-append,
    /// place into a page, index, commit. Returns the number of rows
    /// written.
    pub fn insert(&mut self, values: &RecordValues) -> Result<u32> {
        self.validate_known_columns(values)?;
        self.validate_complete_and_typed(values)?;
        self.probe_unique_indexes(values)?;

        let frame = record::encode_record(&self.column_names, values)?;
        if frame.len() > PAGE_SIZE {
            // Reject before touching the WAL so the log never holds an
            // entry that can never be placed.
            return Err(Error::new(
                ErrorKind::PageOverflow,
                format!("record of {} bytes cannot fit a page of {PAGE_SIZE}", frame.len()),
            ));
        }
        let entry = self.wal.append(OP_INSERT, &self.name, &frame)?;

        let page_offset = self.place_record(&frame)?;
        self.add_index_entries(values, page_offset as i64)?;
        let key = self.page_cache_key(page_offset);
        self.cache.remove(&key);

        self.wal.commit(&entry)?;
        Ok(1)
    }

    /// Runs the predicate over the table, via an index probe when the plan
    /// allows it, and returns matching records along with the access type.
    pub fn select(
        &mut self,
        expression: Option<&Expr>,
        limit: Option<usize>,
    ) -> Result<(Vec<RawRecord>, AccessType)> {
        if let Some(expr) = expression {
            if let Some((column, op, literal)) = self.index_plan(expr) {
                crate::shale_debug_log!(
                    "[Table::select] {} probing index on {column} with {op:?}",
                    self.name
                );
                let records = self.select_by_index(&column, op, &literal, expr, limit)?;
                return Ok((records, AccessType::Index));
            }
        }
        let records = self.full_scan(expression, limit)?;
        Ok((records, AccessType::All))
    }

    /// Deletes every record matched by the predicate. Returns the
    /// tombstoned records and the page offsets they lived at.
    pub fn delete(&mut self, expression: Option<&Expr>) -> Result<(Vec<RawRecord>, Vec<u64>)> {
        let (matches, _) = self.select(expression, None)?;
        let mut touched_pages = Vec::new();

        for record in &matches {
            let pk_value = record
                .values
                .get(&self.primary_key)
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::MissingColumn, self.primary_key.clone()))?;

            let offsets: Vec<i64> = {
                let index = self
                    .indexes
                    .get_mut(&self.primary_key)
                    .ok_or_else(|| Error::new(ErrorKind::InvalidPage, "missing primary key index"))?;
                index
                    .get(&pk_value, Operator::Equal)?
                    .iter()
                    .map(|item| item.page_offset)
                    .collect()
            };
            for page_offset in offsets {
                self.tombstone_in_page(page_offset as u64, &pk_value)?;
                let key = self.page_cache_key(page_offset as u64);
                self.cache.remove(&key);
                touched_pages.push(page_offset as u64);
            }

            for (col_name, index) in &mut self.indexes {
                let value = record.values[col_name].clone();
                let id = if index.is_unique() {
                    value.clone()
                } else {
                    pk_value.clone()
                };
                index.remove(&value, &id)?;
            }
        }
        Ok((matches, touched_pages))
    }

    /// Updates matching rows as delete + re-insert, overlaying the supplied
    /// columns on each original record.
    pub fn update(&mut self, updates: &RecordValues, expression: Option<&Expr>) -> Result<u32> {
        self.validate_known_columns(updates)?;
        let (deleted, _) = self.delete(expression)?;
        for record in &deleted {
            let mut merged = record.values.clone();
            for (name, value) in updates {
                merged.insert(name.clone(), value.clone());
            }
            self.insert(&merged)?;
        }
        Ok(deleted.len() as u32)
    }

    pub fn close(&mut self) -> Result<()> {
        for index in self.indexes.values_mut() {
            index.close()?;
        }
        self.file
            .sync_all()
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))
    }

    // --- planning and scans ---

    fn index_plan(&self, expr: &Expr) -> Option<(String, Operator, Value)> {
        let referenced = expr.referenced_columns();
        let indexed: Vec<&String> = referenced
            .iter()
            .filter(|name| self.indexes.contains_key(*name))
            .collect();
        if indexed.len() != 1 {
            return None;
        }
        let (column, op, literal) = expr.root_probe()?;
        if column != indexed[0].as_str() {
            return None;
        }
        Some((column.to_string(), op, literal.clone()))
    }

    fn select_by_index(
        &mut self,
        column: &str,
        op: Operator,
        literal: &Value,
        expr: &Expr,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        let items = self
            .indexes
            .get_mut(column)
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidPage, format!("no index on column {column}"))
            })?
            .get(literal, op)?;

        let mut out = Vec::new();
        for item in items {
            let page = self.load_page_cached(item.page_offset as u64)?;
            let used = page_used_len(&page)? as usize;
            let records = record::parse_page_records(
                &page[LEN_META..LEN_META + used],
                item.page_offset as u64,
                &self.column_names,
            )?;
            for record in records {
                if expr.eval(&record.values) {
                    out.push(record);
                    if limit.is_some_and(|l| out.len() >= l) {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    fn full_scan(
        &mut self,
        expression: Option<&Expr>,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        let file_len = self.file_len()?;
        let mut out = Vec::new();
        let mut pos = self.data_start;

        while pos < file_len {
            let (tag, len) = self.read_frame_header(pos)?;
            if tag != TYPE_PAGE {
                // Not a page frame: skip it whole.
                pos += (LEN_META + len as usize) as u64;
                continue;
            }
            let mut payload = vec![0u8; len as usize];
            self.read_exact_at(pos + LEN_META as u64, &mut payload)?;
            let records = record::parse_page_records(&payload, pos, &self.column_names)?;
            for record in records {
                if expression.map_or(true, |e| e.eval(&record.values)) {
                    out.push(record);
                    if limit.is_some_and(|l| out.len() >= l) {
                        return Ok(out);
                    }
                }
            }
            pos += (LEN_META + len as usize) as u64;
        }
        Ok(out)
    }

    // --- page management ---

    /// Returns the offset of a page with at least `need` bytes of
    /// remaining capacity, appending a fresh page when the current tail
    /// cannot fit the record.
    fn seek_to_next_page(&mut self, need: usize) -> Result<u64> {
        if need > PAGE_SIZE {
            return Err(Error::new(
                ErrorKind::PageOverflow,
                format!("record of {need} bytes cannot fit a page of {PAGE_SIZE}"),
            ));
        }
        let current = match self.last_page_offset {
            Some(offset) => Some(offset),
            None => self.find_first_page()?,
        };
        let offset = match current {
            Some(offset) => offset,
            None => self.append_empty_page()?,
        };

        let used = self.read_page_used(offset)? as usize;
        if PAGE_SIZE - used >= need {
            self.last_page_offset = Some(offset);
            return Ok(offset);
        }
        let fresh = self.append_empty_page()?;
        self.last_page_offset = Some(fresh);
        Ok(fresh)
    }

    fn place_record(&mut self, frame: &[u8]) -> Result<u64> {
        let page_offset = self.seek_to_next_page(frame.len())?;
        let used = self.read_page_used(page_offset)?;
        let write_at = page_offset + LEN_META as u64 + used as u64;

        self.file
            .seek(SeekFrom::Start(write_at))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        self.file
            .write_all(frame)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;

        self.update_page_size(page_offset, frame.len() as i64)?;
        Ok(page_offset)
    }

    /// Appends a bare page header at the end of the file; the payload grows
    /// as records are written into it.
    fn append_empty_page(&mut self) -> Result<u64> {
        let offset = self
            .file
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        let header = [TYPE_PAGE, 0, 0, 0, 0];
        self.file
            .write_all(&header)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        Ok(offset)
    }

    /// Adjusts a page's `usedLen` by `delta`. A page reaching zero is
    /// spliced out of the file entirely.
    fn update_page_size(&mut self, offset: u64, delta: i64) -> Result<()> {
        let used = self.read_page_used(offset)? as i64 + delta;
        if used < 0 {
            return Err(Error::new(
                ErrorKind::InvalidPage,
                format!("page at {offset} would have negative usedLen"),
            ));
        }
        if used == 0 {
            return self.splice_out_page(offset);
        }
        self.file
            .seek(SeekFrom::Start(offset + 1))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        self.file
            .write_all(&(used as u32).to_le_bytes())
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        Ok(())
    }

    /// Removes an emptied page frame by copying the file tail over it and
    /// truncating.
    fn splice_out_page(&mut self, offset: u64) -> Result<()> {
        let file_len = self.file_len()?;
        let tail_start = offset + LEN_META as u64;
        let mut tail = vec![0u8; (file_len - tail_start) as usize];
        self.read_exact_at(tail_start, &mut tail)?;

        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        self.file
            .write_all(&tail)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        self.file
            .set_len(file_len - LEN_META as u64)
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;

        let key = self.page_cache_key(offset);
        self.cache.remove(&key);
        self.last_page_offset = None;
        Ok(())
    }

    fn find_first_page(&mut self) -> Result<Option<u64>> {
        let file_len = self.file_len()?;
        let mut pos = self.data_start;
        while pos < file_len {
            let (tag, len) = self.read_frame_header(pos)?;
            if tag == TYPE_PAGE {
                return Ok(Some(pos));
            }
            pos += (LEN_META + len as usize) as u64;
        }
        Ok(None)
    }

    fn read_page_used(&mut self, offset: u64) -> Result<u32> {
        let (tag, len) = self.read_frame_header(offset)?;
        if tag != TYPE_PAGE {
            return Err(Error::new(
                ErrorKind::InvalidPage,
                format!("expected a page frame at {offset}, found tag {tag}"),
            ));
        }
        Ok(len)
    }

    fn read_frame_header(&mut self, offset: u64) -> Result<(u8, u32)> {
        let mut header = [0u8; LEN_META];
        self.read_exact_at(offset, &mut header)?;
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        Ok((header[0], len))
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        self.file
            .read_exact(buf)
            .map_err(|e| Error::new(ErrorKind::ShortRead, e.to_string()))
    }

    fn file_len(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?
            .len())
    }

    /// Reads a whole page frame (header plus `usedLen` payload bytes)
    /// through the cache.
    fn load_page_cached(&mut self, offset: u64) -> Result<Vec<u8>> {
        let key = self.page_cache_key(offset);
        if let Some(page) = self.cache.get(&key) {
            return Ok(page.clone());
        }
        let used = self.read_page_used(offset)?;
        let mut page = vec![0u8; LEN_META + used as usize];
        self.read_exact_at(offset, &mut page)?;
        self.cache.put(key, page.clone());
        Ok(page)
    }

    fn page_cache_key(&self, offset: u64) -> String {
        format!("{}:{offset}", self.name)
    }

    // --- mutation helpers ---

    /// Finds the live record carrying `pk_value` inside the page at
    /// `page_offset` and flips its tag to the tombstone marker.
    fn tombstone_in_page(&mut self, page_offset: u64, pk_value: &Value) -> Result<()> {
        let used = self.read_page_used(page_offset)? as usize;
        let mut payload = vec![0u8; used];
        self.read_exact_at(page_offset + LEN_META as u64, &mut payload)?;

        let records = record::parse_page_records(&payload, page_offset, &self.column_names)?;
        let target = records
            .iter()
            .find(|r| {
                r.values
                    .get(&self.primary_key)
                    .is_some_and(|v| strata::codec::compare(v, pk_value, Operator::Equal))
            })
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidPage,
                    format!("indexed record not found in page at {page_offset}"),
                )
            })?;

        self.file
            .seek(SeekFrom::Start(target.offset))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        self.file
            .write_all(&[TYPE_DELETED_RECORD])
            .map_err(|e| Error::new(ErrorKind::IncompleteWrite, e.to_string()))?;
        Ok(())
    }

    fn add_index_entries(&mut self, values: &RecordValues, page_offset: i64) -> Result<()> {
        let pk_value = values[&self.primary_key].clone();
        for (col_name, index) in &mut self.indexes {
            let value = values[col_name].clone();
            let id = if index.is_unique() {
                value.clone()
            } else {
                pk_value.clone()
            };
            index.add(IndexItem::new(value, id, page_offset))?;
        }
        Ok(())
    }

    /// Replays record frames left uncommitted in the WAL through the
    /// page-aware insert path, then moves the commit marker past them.
    fn restore_from_wal(&mut self) -> Result<()> {
        let Some(restorable) = self.wal.get_restorable()? else {
            return Ok(());
        };
        crate::shale_debug_log!(
            "[Table::restore_from_wal] {} replaying {} bytes",
            self.name,
            restorable.data.len()
        );

        let mut pos = 0usize;
        while pos < restorable.data.len() {
            let frame_len = record::record_frame_len(&restorable.data[pos..])?;
            let frame = &restorable.data[pos..pos + frame_len];
            let values = record::decode_record_values(frame, &self.column_names)?;

            let page_offset = self.place_record(frame)?;
            self.add_index_entries(&values, page_offset as i64)?;
            let key = self.page_cache_key(page_offset);
            self.cache.remove(&key);
            pos += frame_len;
        }
        self.wal.commit(&restorable.last_entry)
    }

    // --- validation ---

    fn validate_known_columns(&self, values: &RecordValues) -> Result<()> {
        for name in values.keys() {
            if !self.columns.contains_key(name) {
                return Err(Error::new(
                    ErrorKind::ColumnViolation,
                    format!("unknown column: {name}"),
                ));
            }
        }
        Ok(())
    }

    fn validate_complete_and_typed(&self, values: &RecordValues) -> Result<()> {
        for name in &self.column_names {
            let column = &self.columns[name];
            let value = values
                .get(name)
                .ok_or_else(|| Error::new(ErrorKind::MissingColumn, name.clone()))?;
            if value.type_tag() != column.data_type {
                return Err(Error::new(
                    ErrorKind::ColumnViolation,
                    format!(
                        "column {name} expects type tag {}, got {}",
                        column.data_type,
                        value.type_tag()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn probe_unique_indexes(&mut self, values: &RecordValues) -> Result<()> {
        for (col_name, index) in &mut self.indexes {
            if !index.is_unique() {
                continue;
            }
            let value = &values[col_name];
            if !index.get(value, Operator::Equal)?.is_empty() {
                return Err(Error::new(
                    ErrorKind::UniqueViolation,
                    format!("column {col_name} value {value:?}"),
                ));
            }
        }
        Ok(())
    }
}

fn page_used_len(page: &[u8]) -> Result<u32> {
    if page.len() < LEN_META || page[0] != TYPE_PAGE {
        return Err(Error::new(ErrorKind::InvalidPage, "malformed page frame"));
    }
    Ok(u32::from_le_bytes([page[1], page[2], page[3], page[4]]))
}

fn index_path(dir: &Path, table: &str, column: &Column) -> PathBuf {
    if column.is_primary_key() {
        dir.join(format!("{table}_idx.bin"))
    } else {
        dir.join(format!("{table}_{}_idx.bin", column.name()))
    }
}

fn read_column_definitions(file: &mut File) -> Result<(Vec<Column>, u64)> {
    use strata::codec::TYPE_COLUMN_DEFINITION;

    let file_len = file
        .metadata()
        .map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?
        .len();
    let mut columns = Vec::new();
    let mut pos = 0u64;

    while pos + LEN_META as u64 <= file_len {
        let mut header = [0u8; LEN_META];
        file.seek(SeekFrom::Start(pos))
            .map_err(|e| Error::new(ErrorKind::Seek, e.to_string()))?;
        file.read_exact(&mut header)
            .map_err(|e| Error::new(ErrorKind::ShortRead, e.to_string()))?;
        if header[0] != TYPE_COLUMN_DEFINITION {
            break;
        }
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut frame = vec![0u8; LEN_META + len];
        frame[..LEN_META].copy_from_slice(&header);
        file.read_exact(&mut frame[LEN_META..])
            .map_err(|e| Error::new(ErrorKind::ShortRead, e.to_string()))?;

        let (column, consumed) = Column::decode(&frame)?;
        columns.push(column);
        pos += consumed as u64;
    }
    Ok((columns, pos))
}

pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::new(ErrorKind::InvalidTableName, name));
    }
    Ok(())
}

pub(crate) fn validate_column_set(columns: &[Column]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    let mut primary_keys = 0;
    for column in columns {
        if !seen.insert(column.name().to_string()) {
            return Err(Error::new(ErrorKind::ColumnAlreadyExists, column.name()));
        }
        if column.is_primary_key() {
            primary_keys += 1;
        }
    }
    if primary_keys != 1 {
        return Err(Error::new(
            ErrorKind::InvalidNumberOfPrimaryKeys,
            format!("expected exactly one primary key, found {primary_keys}"),
        ));
    }
    Ok(())
}
