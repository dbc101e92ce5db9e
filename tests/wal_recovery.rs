//! Crash-recovery behavior: uncommitted work disappears on restart,
//! committed work survives, rollback reverts through the log, and
//! recovery is idempotent.
//!
//! "Crashes" are simulated by dropping the `Database` without closing it:
//! the buffer pool's dirty data pages are lost, and only what the WAL and
//! the force calls put on disk survives into the reopened engine.

use std::path::Path;

use tempfile::tempdir;

use nanodb::commands::{Command, FromClause, SelectClause, TableStorageKind};
use nanodb::config::TXNSTATE_FILENAME;
use nanodb::relations::{ColumnInfo, ColumnType, Schema, SqlType, Tuple, Value};
use nanodb::transactions::TransactionStatePage;
use nanodb::Database;

fn open_db(path: &Path) -> Database {
    Database::builder()
        .base_dir(path)
        .page_size(512)
        .open()
        .unwrap()
}

fn employee_schema() -> Schema {
    Schema::with_columns(vec![
        ColumnInfo::new("a", None, ColumnType::new(SqlType::Integer)),
        ColumnInfo::new("b", None, ColumnType::new(SqlType::Integer)),
    ])
    .unwrap()
}

fn create_employee(db: &Database) {
    let mut session = db.create_session();
    db.execute(
        &mut session,
        Command::CreateTable {
            table: "Employee".into(),
            schema: employee_schema(),
            storage: TableStorageKind::Heap,
        },
    )
    .unwrap();
    db.close().unwrap();
}

fn insert_row(db: &Database, session: &mut nanodb::Session, a: i32, b: i32) {
    db.execute(
        session,
        Command::Insert {
            table: "Employee".into(),
            values: vec![Value::Integer(a), Value::Integer(b)],
        },
    )
    .unwrap();
}

fn employee_rows(db: &Database) -> Vec<(Value, Value)> {
    let (_, rows) = db
        .query(&SelectClause::scan_of(FromClause::base_table("Employee")))
        .unwrap();
    rows.iter()
        .map(|r| (r.value(0).unwrap(), r.value(1).unwrap()))
        .collect()
}

fn stored_lsns(db: &Database) -> (nanodb::wal::LogSequenceNumber, nanodb::wal::LogSequenceNumber) {
    let file = db.storage().open_db_file(TXNSTATE_FILENAME).unwrap();
    let page = db.storage().load_db_page(&file, 0, false).unwrap();
    let state = TransactionStatePage::new(page);
    (state.first_lsn().unwrap(), state.next_lsn().unwrap())
}

#[test]
fn crash_before_commit_leaves_the_table_empty() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let db = open_db(&db_path);
        create_employee(&db);
    }

    {
        let db = open_db(&db_path);
        let mut session = db.create_session();
        db.execute(&mut session, Command::Begin).unwrap();
        insert_row(&db, &mut session, 1, 27);

        // Push the update records to disk, then "crash" before COMMIT:
        // the dirty heap pages in the buffer pool are simply dropped.
        db.transaction_manager().unwrap().force_all().unwrap();
    }

    {
        let db = open_db(&db_path);
        assert_eq!(employee_rows(&db), vec![], "loser transaction must be undone");

        // Recovery appended compensation records and an ABORT for the
        // loser, so the stored nextLSN moved past the pre-crash tail.
        let (first, next) = stored_lsns(&db);
        assert!(first < next);

        // The engine keeps working after recovery.
        let mut session = db.create_session();
        db.execute(&mut session, Command::Begin).unwrap();
        insert_row(&db, &mut session, 2, 54);
        db.execute(&mut session, Command::Commit).unwrap();
        assert_eq!(employee_rows(&db).len(), 1);
    }
}

#[test]
fn crash_after_commit_keeps_the_row() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let db = open_db(&db_path);
        create_employee(&db);
    }

    {
        let db = open_db(&db_path);
        let mut session = db.create_session();
        db.execute(&mut session, Command::Begin).unwrap();
        insert_row(&db, &mut session, 1, 27);
        // COMMIT forces the WAL through the commit record; the dirty data
        // pages are still only in the buffer pool when we "crash".
        db.execute(&mut session, Command::Commit).unwrap();
    }

    {
        let db = open_db(&db_path);
        assert_eq!(
            employee_rows(&db),
            vec![(Value::Integer(1), Value::Integer(27))],
            "committed row must survive the crash"
        );
    }
}

#[test]
fn recovery_is_idempotent_across_repeated_restarts() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let db = open_db(&db_path);
        create_employee(&db);
    }
    {
        let db = open_db(&db_path);
        let mut session = db.create_session();
        db.execute(&mut session, Command::Begin).unwrap();
        insert_row(&db, &mut session, 1, 27);
        insert_row(&db, &mut session, 2, 54);
        db.execute(&mut session, Command::Commit).unwrap();
    }

    for _ in 0..3 {
        let db = open_db(&db_path);
        let mut rows = employee_rows(&db);
        rows.sort_by_key(|(a, _)| match a {
            Value::Integer(v) => *v,
            _ => 0,
        });
        assert_eq!(
            rows,
            vec![
                (Value::Integer(1), Value::Integer(27)),
                (Value::Integer(2), Value::Integer(54)),
            ]
        );
    }
}

#[test]
fn rollback_reverts_the_in_flight_transaction() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    let db = open_db(&db_path);
    create_employee(&db);

    let mut session = db.create_session();
    db.execute(&mut session, Command::Begin).unwrap();
    insert_row(&db, &mut session, 1, 10);
    db.execute(&mut session, Command::Commit).unwrap();

    db.execute(&mut session, Command::Begin).unwrap();
    insert_row(&db, &mut session, 2, 20);
    insert_row(&db, &mut session, 3, 30);
    db.execute(&mut session, Command::Rollback).unwrap();

    assert_eq!(
        employee_rows(&db),
        vec![(Value::Integer(1), Value::Integer(10))],
        "rolled-back inserts must disappear"
    );

    // A rolled-back transaction is indistinguishable from one that never
    // ran: new work proceeds normally.
    db.execute(&mut session, Command::Begin).unwrap();
    insert_row(&db, &mut session, 4, 40);
    db.execute(&mut session, Command::Commit).unwrap();
    assert_eq!(employee_rows(&db).len(), 2);
}

#[test]
fn disabled_transactions_still_persist_through_explicit_close() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let db = Database::builder()
            .base_dir(&db_path)
            .page_size(512)
            .transactions(false)
            .open()
            .unwrap();
        let mut session = db.create_session();
        db.execute(
            &mut session,
            Command::CreateTable {
                table: "Employee".into(),
                schema: employee_schema(),
                storage: TableStorageKind::Heap,
            },
        )
        .unwrap();
        insert_row(&db, &mut session, 9, 90);

        // BEGIN must be refused outright.
        assert!(db.execute(&mut session, Command::Begin).is_err());

        db.close().unwrap();
    }

    {
        let db = Database::builder()
            .base_dir(&db_path)
            .page_size(512)
            .transactions(false)
            .open()
            .unwrap();
        assert_eq!(
            employee_rows(&db),
            vec![(Value::Integer(9), Value::Integer(90))]
        );
    }
}
