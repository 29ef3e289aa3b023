use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shale::column::{Column, ColumnOpts};
use shale::expr::Expr;
use shale::record::RecordValues;
use shale::types::Command;
use shale::{Database, Value};
use strata::codec::{Operator, TYPE_I32, TYPE_I64, TYPE_STRING};
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let mut db = Database::open(temp_dir.path(), "bench").unwrap();

    let columns = vec![
        Column::new("id", TYPE_I64, ColumnOpts::PRIMARY_KEY).unwrap(),
        Column::new("name", TYPE_STRING, ColumnOpts::NORMAL).unwrap(),
        Column::new("value", TYPE_I32, ColumnOpts::USING_INDEX).unwrap(),
    ];
    db.execute(Command::CreateTable {
        table_name: "test_table".to_string(),
        columns,
    })
    .unwrap();

    for i in 0..100i64 {
        let mut record = RecordValues::new();
        record.insert("id".to_string(), Value::I64(i));
        record.insert("name".to_string(), Value::Str(format!("name{i}")));
        record.insert("value".to_string(), Value::I32((i * 10) as i32));
        db.execute(Command::Insert {
            table_name: "test_table".to_string(),
            record,
        })
        .unwrap();
    }

    (temp_dir, db)
}

fn benchmark_index_probe(c: &mut Criterion) {
    let (_dir, mut db) = setup_test_db();

    c.bench_function("index_probe", |b| {
        b.iter(|| {
            let command = Command::Select {
                table_name: "test_table".to_string(),
                select_columns: vec![],
                expression: Some(Expr::binary(
                    Operator::Less,
                    Expr::column("value"),
                    Expr::literal(Value::I32(500)),
                )),
                limit: None,
            };
            db.execute(black_box(command)).unwrap()
        })
    });
}

fn benchmark_full_scan(c: &mut Criterion) {
    let (_dir, mut db) = setup_test_db();

    c.bench_function("full_scan", |b| {
        b.iter(|| {
            let command = Command::Select {
                table_name: "test_table".to_string(),
                select_columns: vec![],
                expression: Some(Expr::binary(
                    Operator::Equal,
                    Expr::column("name"),
                    Expr::literal(Value::Str("name42".to_string())),
                )),
                limit: None,
            };
            db.execute(black_box(command)).unwrap()
        })
    });
}

fn benchmark_insert(c: &mut Criterion) {
    let (_dir, mut db) = setup_test_db();
    let mut next_id = 1_000i64;

    c.bench_function("insert_row", |b| {
        b.iter(|| {
            let mut record = RecordValues::new();
            record.insert("id".to_string(), Value::I64(next_id));
            record.insert("name".to_string(), Value::Str(format!("name{next_id}")));
            record.insert("value".to_string(), Value::I32((next_id % 1000) as i32));
            next_id += 1;
            let command = Command::Insert {
                table_name: "test_table".to_string(),
                record,
            };
            db.execute(black_box(command)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    benchmark_index_probe,
    benchmark_full_scan,
    benchmark_insert
);
criterion_main!(benches);
