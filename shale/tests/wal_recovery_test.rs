mod common;

use common::{user_row, users_columns};
use serial_test::serial;
use shale::record;
use shale::types::{Command, ExecuteResult};
use shale::{Database, Value};
use strata::wal::{Wal, OP_INSERT};
use std::path::PathBuf;

/// Both tests below share one fixture directory under the OS temp dir, so
/// they run serially.
fn fixture_dir() -> PathBuf {
    let dir = std::env::temp_dir().join("shale_wal_recovery_fixture");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn select_all(db: &mut Database) -> Vec<shale::record::RecordValues> {
    let result = db
        .execute(Command::Select {
            table_name: "users".to_string(),
            select_columns: vec![],
            expression: None,
            limit: None,
        })
        .unwrap();
    match result {
        ExecuteResult::ResultSet(set) => set.rows,
        other => panic!("expected a result set, got {other:?}"),
    }
}

#[test]
#[serial]
fn uncommitted_insert_is_replayed_on_reopen() {
    let base = fixture_dir();

    let column_order: Vec<String> = users_columns().iter().map(|c| c.name().to_string()).collect();
    {
        let mut db = Database::open(&base, "app").unwrap();
        db.execute(Command::CreateTable {
            table_name: "users".to_string(),
            columns: users_columns(),
        })
        .unwrap();
        db.execute(Command::Insert {
            table_name: "users".to_string(),
            record: user_row(0),
        })
        .unwrap();
        db.close().unwrap();
    }

    // Simulate a crash between `append` and `commit`: the entry reaches
    // the log, the table file and the marker never hear about it.
    let db_dir = base.join("app");
    {
        let mut wal = Wal::open(&db_dir, "users").unwrap();
        let frame = record::encode_record(&column_order, &user_row(1)).unwrap();
        wal.append(OP_INSERT, "users", &frame).unwrap();
    }

    let mut db = Database::open(&base, "app").unwrap();
    let rows = select_all(&mut db);
    assert_eq!(rows.len(), 2, "the replayed row must be present exactly once");
    let mut ids: Vec<i64> = rows
        .iter()
        .map(|r| match &r["id"] {
            Value::I64(v) => *v,
            _ => panic!("id must be an i64"),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec![0, 1]);

    // The replayed row is reachable through its indexes too.
    let result = db
        .execute(Command::Select {
            table_name: "users".to_string(),
            select_columns: vec![],
            expression: Some(shale::expr::Expr::binary(
                strata::codec::Operator::Equal,
                shale::expr::Expr::column("id"),
                shale::expr::Expr::literal(Value::I64(1)),
            )),
            limit: None,
        })
        .unwrap();
    let ExecuteResult::ResultSet(set) = result else {
        panic!("expected a result set");
    };
    assert_eq!(set.rows.len(), 1);
    db.close().unwrap();

    // The marker now points at the replayed entry: nothing is left to
    // redo.
    let mut wal = Wal::open(&db_dir, "users").unwrap();
    assert!(wal.get_restorable().unwrap().is_none());
}

#[test]
#[serial]
fn first_insert_ever_survives_a_missing_marker() {
    let base = fixture_dir();

    let column_order: Vec<String> = users_columns().iter().map(|c| c.name().to_string()).collect();
    {
        let mut db = Database::open(&base, "app").unwrap();
        db.execute(Command::CreateTable {
            table_name: "users".to_string(),
            columns: users_columns(),
        })
        .unwrap();
        db.close().unwrap();
    }

    // The very first insert crashes before commit: no marker file exists
    // at all.
    let db_dir = base.join("app");
    {
        let mut wal = Wal::open(&db_dir, "users").unwrap();
        let frame = record::encode_record(&column_order, &user_row(7)).unwrap();
        wal.append(OP_INSERT, "users", &frame).unwrap();
    }
    assert!(!db_dir.join("users_wal_last_committed.bin").exists());

    let mut db = Database::open(&base, "app").unwrap();
    let rows = select_all(&mut db);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], Value::I64(7));
    db.close().unwrap();
}

#[test]
#[serial]
fn reopen_after_clean_shutdown_replays_nothing() {
    let base = fixture_dir();
    {
        let mut db = Database::open(&base, "app").unwrap();
        db.execute(Command::CreateTable {
            table_name: "users".to_string(),
            columns: users_columns(),
        })
        .unwrap();
        for i in 0..5 {
            db.execute(Command::Insert {
                table_name: "users".to_string(),
                record: user_row(i),
            })
            .unwrap();
        }
        db.close().unwrap();
    }

    let mut db = Database::open(&base, "app").unwrap();
    assert_eq!(select_all(&mut db).len(), 5);
    db.close().unwrap();
}
