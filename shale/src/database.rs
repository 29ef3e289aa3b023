//! A database: a directory of table files plus the command dispatch.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use strata::{Error, ErrorKind, Result};

use crate::column::Column;
use crate::record::RecordValues;
use crate::table::{Table, FILE_EXTENSION};
use crate::types::{Command, ExecuteResult, ResultSet};

/// Default on-disk location for databases.
pub const BASE_DIR: &str = "./data";

pub struct Database {
    name: String,
    path: PathBuf,
    tables: HashMap<String, Table>,
}

impl Database {
    /// Creates a fresh database directory. Fails when it already exists.
    pub fn create<P: AsRef<Path>>(base: P, name: &str) -> Result<Self> {
        let path = base.as_ref().join(name);
        if path.is_dir() {
            return Err(Error::new(ErrorKind::DatabaseAlreadyExists, name));
        }
        fs::create_dir_all(&path).map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            path,
            tables: HashMap::new(),
        })
    }

    /// Opens an existing database, creating it when the directory is
    /// missing. Every table file found is reopened, which replays any
    /// uncommitted WAL entries.
    pub fn open<P: AsRef<Path>>(base: P, name: &str) -> Result<Self> {
        let path = base.as_ref().join(name);
        if !path.is_dir() {
            return Self::create(base, name);
        }

        let mut tables = HashMap::new();
        let entries =
            fs::read_dir(&path).map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::new(ErrorKind::OpenFile, e.to_string()))?;
            let file_name = entry.file_name();
            let Some(table_name) = table_file_name(&file_name.to_string_lossy()) else {
                continue;
            };
            crate::shale_debug_log!("[Database::open] loading table {table_name}");
            let table = Table::open(&path, &table_name)?;
            tables.insert(table_name, table);
        }

        Ok(Self {
            name: name.to_string(),
            path,
            tables,
        })
    }

    /// Opens the database under the default base directory.
    pub fn open_default(name: &str) -> Result<Self> {
        Self::open(BASE_DIR, name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_table(&mut self, name: &str, columns: Vec<Column>) -> Result<&mut Table> {
        if self.tables.contains_key(name) {
            return Err(Error::new(ErrorKind::TableAlreadyExists, name));
        }
        let table = Table::create(&self.path, name, columns)?;
        Ok(self.tables.entry(name.to_string()).or_insert(table))
    }

    /// Drops a table and removes every file it owns.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let mut table = self
            .tables
            .remove(name)
            .ok_or_else(|| Error::new(ErrorKind::InvalidTableName, format!("no such table: {name}")))?;
        let files = table.owned_files();
        table.close()?;
        drop(table);
        for file in files {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::new(ErrorKind::OpenFile, e.to_string())),
            }
        }
        Ok(())
    }

    pub fn table(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::new(ErrorKind::InvalidTableName, format!("no such table: {name}")))
    }

    /// Executes one command against the database.
    pub fn execute(&mut self, command: Command) -> Result<ExecuteResult> {
        match command {
            Command::CreateTable {
                table_name,
                columns,
            } => {
                self.create_table(&table_name, columns)?;
                Ok(ExecuteResult::Ddl)
            }
            Command::DropTable { table_name } => {
                self.drop_table(&table_name)?;
                Ok(ExecuteResult::Ddl)
            }
            Command::Insert { table_name, record } => {
                let count = self.table(&table_name)?.insert(&record)?;
                Ok(ExecuteResult::Inserted(count))
            }
            Command::Select {
                table_name,
                select_columns,
                expression,
                limit,
            } => {
                let table = self.table(&table_name)?;
                let (records, access_type) = table.select(expression.as_ref(), limit)?;
                let columns = projection(table, &select_columns)?;

                let mut rows = Vec::with_capacity(records.len());
                for record in records {
                    let mut row = RecordValues::with_capacity(columns.len());
                    for name in &columns {
                        if let Some(value) = record.values.get(name) {
                            row.insert(name.clone(), value.clone());
                        }
                    }
                    rows.push(row);
                }
                Ok(ExecuteResult::ResultSet(ResultSet {
                    columns,
                    rows,
                    access_type,
                }))
            }
            Command::Update {
                table_name,
                record,
                expression,
            } => {
                let count = self.table(&table_name)?.update(&record, expression.as_ref())?;
                Ok(ExecuteResult::Updated(count))
            }
            Command::Delete {
                table_name,
                expression,
            } => {
                let (deleted, _) = self.table(&table_name)?.delete(expression.as_ref())?;
                Ok(ExecuteResult::Deleted(deleted.len() as u32))
            }
        }
    }

    /// Closes every table: index pagers stop their fsync tasks, files are
    /// synced.
    pub fn close(mut self) -> Result<()> {
        for table in self.tables.values_mut() {
            table.close()?;
        }
        Ok(())
    }
}

/// The columns a select projects: the declared order for `*` or an empty
/// list, otherwise the requested columns (validated against the schema).
fn projection(table: &Table, select_columns: &[String]) -> Result<Vec<String>> {
    if select_columns.is_empty() || select_columns.iter().any(|c| c == "*") {
        return Ok(table.column_names().to_vec());
    }
    for name in select_columns {
        if !table.column_names().iter().any(|c| c == name) {
            return Err(Error::new(
                ErrorKind::ColumnViolation,
                format!("unknown column in select list: {name}"),
            ));
        }
    }
    Ok(select_columns.to_vec())
}

/// Extracts the table name from a data file, filtering out index, WAL and
/// free-list artifacts that share the directory.
fn table_file_name(file_name: &str) -> Option<String> {
    if !file_name.ends_with(FILE_EXTENSION)
        || file_name.ends_with("_idx.bin")
        || file_name.ends_with("_wal.bin")
        || file_name.ends_with("_wal_last_committed.bin")
        || file_name.ends_with(".del")
    {
        return None;
    }
    Some(file_name.trim_end_matches(FILE_EXTENSION).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_file_name_filters_artifacts() {
        assert_eq!(table_file_name("users.bin"), Some("users".to_string()));
        assert_eq!(table_file_name("users_idx.bin"), None);
        assert_eq!(table_file_name("users_age_idx.bin"), None);
        assert_eq!(table_file_name("users_wal.bin"), None);
        assert_eq!(table_file_name("users_wal_last_committed.bin"), None);
        assert_eq!(table_file_name("users_idx.bin.del"), None);
        assert_eq!(table_file_name("notes.txt"), None);
    }
}
