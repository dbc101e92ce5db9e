//! Storage-substrate behavior through the public engine surface: tiny
//! buffer pools force eviction traffic, data survives close/reopen, and
//! configuration is validated.

use std::collections::HashSet;

use tempfile::tempdir;

use nanodb::commands::{Command, FromClause, SelectClause, TableStorageKind};
use nanodb::relations::{ColumnInfo, ColumnType, Schema, SqlType, Tuple, Value};
use nanodb::Database;

fn wide_schema() -> Schema {
    Schema::with_columns(vec![
        ColumnInfo::new("id", None, ColumnType::new(SqlType::Integer)),
        ColumnInfo::new("payload", None, ColumnType::with_length(SqlType::VarChar, 120)),
    ])
    .unwrap()
}

#[test]
fn many_inserts_survive_eviction_and_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");
    const ROWS: i32 = 200;

    {
        // Budget of eight 512-byte pages: inserts continually evict.
        let db = Database::builder()
            .base_dir(&db_path)
            .page_size(512)
            .buffer_size(8 * 512)
            .transactions(false)
            .open()
            .unwrap();
        let mut session = db.create_session();
        db.execute(
            &mut session,
            Command::CreateTable {
                table: "big".into(),
                schema: wide_schema(),
                storage: TableStorageKind::Heap,
            },
        )
        .unwrap();

        for i in 0..ROWS {
            db.execute(
                &mut session,
                Command::Insert {
                    table: "big".into(),
                    values: vec![
                        Value::Integer(i),
                        Value::String(format!("row-{:04}-{}", i, "x".repeat(60))),
                    ],
                },
            )
            .unwrap();
        }
        db.close().unwrap();
    }

    let db = Database::builder()
        .base_dir(&db_path)
        .page_size(512)
        .buffer_size(8 * 512)
        .transactions(false)
        .open()
        .unwrap();

    let (_, rows) = db
        .query(&SelectClause::scan_of(FromClause::base_table("big")))
        .unwrap();
    assert_eq!(rows.len(), ROWS as usize);

    let ids: HashSet<i32> = rows
        .iter()
        .map(|row| match row.value(0).unwrap() {
            Value::Integer(v) => v,
            other => panic!("expected integer id, got {:?}", other),
        })
        .collect();
    assert_eq!(ids.len(), ROWS as usize);

    let table = db.heap_manager().open_table("big").unwrap();
    let stats = table.stats_snapshot();
    assert_eq!(stats.num_tuples, ROWS as u32);
    assert!(stats.num_data_pages > 10, "200 wide rows need many 512-byte pages");
}

#[test]
fn unsupported_page_sizes_are_rejected_at_open() {
    let dir = tempdir().unwrap();

    assert!(Database::builder()
        .base_dir(dir.path().join("db1"))
        .page_size(5000)
        .open()
        .is_err());

    assert!(Database::builder()
        .base_dir(dir.path().join("db2"))
        .page_size(256)
        .open()
        .is_err());

    assert!(Database::builder()
        .base_dir(dir.path().join("db3"))
        .page_size(65536)
        .buffer_size(16 * 65536)
        .open()
        .is_ok());
}

#[test]
fn properties_map_configures_the_engine() {
    let dir = tempdir().unwrap();
    let mut props = std::collections::HashMap::new();
    props.insert(
        "nanodb.basedir".to_string(),
        dir.path().join("db").display().to_string(),
    );
    props.insert("nanodb.pagesize".to_string(), "4096".to_string());
    props.insert("nanodb.transactions".to_string(), "off".to_string());

    let config = nanodb::DatabaseConfig::from_properties(&props).unwrap();
    let db = Database::open(config).unwrap();
    assert_eq!(db.config().page_size, 4096);
    assert!(!db.config().transactions);

    // With transactions off there is no transaction manager to talk to.
    let mut session = db.create_session();
    assert!(db.execute(&mut session, Command::Commit).is_err());
}

#[test]
fn deletes_reclaim_space_for_later_inserts() {
    let dir = tempdir().unwrap();
    let db = Database::builder()
        .base_dir(dir.path().join("db"))
        .page_size(512)
        .transactions(false)
        .open()
        .unwrap();
    let mut session = db.create_session();

    db.execute(
        &mut session,
        Command::CreateTable {
            table: "t".into(),
            schema: wide_schema(),
            storage: TableStorageKind::Heap,
        },
    )
    .unwrap();
    for i in 0..20 {
        db.execute(
            &mut session,
            Command::Insert {
                table: "t".into(),
                values: vec![Value::Integer(i), Value::String("p".repeat(100))],
            },
        )
        .unwrap();
    }

    let table = db.heap_manager().open_table("t").unwrap();
    let pages_before = table.stats_snapshot().num_data_pages;

    // Delete every row, then insert the same number again: the table
    // should not need new pages.
    use nanodb::tables::{Insertable, Scannable};
    let mut cursor = db.heap_manager().get_first_tuple(&table).unwrap();
    while let Some(tuple) = cursor {
        let fp = tuple.file_pointer();
        drop(tuple);
        db.heap_manager().delete_tuple(&table, None, fp).unwrap();
        cursor = db.heap_manager().get_next_tuple(&table, fp).unwrap();
    }
    assert_eq!(table.stats_snapshot().num_tuples, 0);

    for i in 0..20 {
        db.execute(
            &mut session,
            Command::Insert {
                table: "t".into(),
                values: vec![Value::Integer(100 + i), Value::String("q".repeat(100))],
            },
        )
        .unwrap();
    }

    let table = db.heap_manager().open_table("t").unwrap();
    let stats = table.stats_snapshot();
    assert_eq!(stats.num_tuples, 20);
    assert_eq!(stats.num_data_pages, pages_before);
}
