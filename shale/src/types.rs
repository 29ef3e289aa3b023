//! Command shapes produced by a SQL front-end and the results the executor
//! hands back.

use crate::column::Column;
use crate::expr::Expr;
use crate::record::RecordValues;

/// One statement, ready for execution. Each command is its own unit; there
/// are no cross-statement transactions.
#[derive(Debug)]
pub enum Command {
    CreateTable {
        table_name: String,
        columns: Vec<Column>,
    },
    DropTable {
        table_name: String,
    },
    Insert {
        table_name: String,
        record: RecordValues,
    },
    Select {
        table_name: String,
        select_columns: Vec<String>,
        expression: Option<Expr>,
        limit: Option<usize>,
    },
    Update {
        table_name: String,
        record: RecordValues,
        expression: Option<Expr>,
    },
    Delete {
        table_name: String,
        expression: Option<Expr>,
    },
}

/// How a select reached its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// An index probe materialized only the pages it pointed at.
    Index,
    /// A full scan over every page of the table file.
    All,
}

#[derive(Debug)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<RecordValues>,
    pub access_type: AccessType,
}

#[derive(Debug)]
pub enum ExecuteResult {
    ResultSet(ResultSet),
    Inserted(u32),
    Updated(u32),
    Deleted(u32),
    Ddl,
}
