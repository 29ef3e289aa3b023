use shale::column::{Column, ColumnOpts};
use shale::record::RecordValues;
use shale::Value;
use strata::codec::{TYPE_I32, TYPE_I64, TYPE_STRING};

/// The schema used across the integration suite:
/// `users(id INT64 PRIMARY KEY, username STRING, age INT32 INDEX, record INT32)`.
pub fn users_columns() -> Vec<Column> {
    vec![
        Column::new("id", TYPE_I64, ColumnOpts::PRIMARY_KEY).unwrap(),
        Column::new("username", TYPE_STRING, ColumnOpts::NORMAL).unwrap(),
        Column::new("age", TYPE_I32, ColumnOpts::USING_INDEX).unwrap(),
        Column::new("record", TYPE_I32, ColumnOpts::NORMAL).unwrap(),
    ]
}

/// Same schema with a unique constraint on `username`.
pub fn users_columns_unique_username() -> Vec<Column> {
    vec![
        Column::new("id", TYPE_I64, ColumnOpts::PRIMARY_KEY).unwrap(),
        Column::new("username", TYPE_STRING, ColumnOpts::USING_UNIQUE_INDEX).unwrap(),
        Column::new("age", TYPE_I32, ColumnOpts::USING_INDEX).unwrap(),
        Column::new("record", TYPE_I32, ColumnOpts::NORMAL).unwrap(),
    ]
}

pub fn user_row(i: i64) -> RecordValues {
    let mut row = RecordValues::new();
    row.insert("id".to_string(), Value::I64(i));
    row.insert("username".to_string(), Value::Str(format!("user {i}")));
    row.insert("age".to_string(), Value::I32((i % 10_000) as i32));
    row.insert("record".to_string(), Value::I32((i % 10_000) as i32));
    row
}
