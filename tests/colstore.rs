//! Column-store bulk loading and the block-scan query path.

use std::io::Write;

use tempfile::tempdir;

use nanodb::commands::{Command, FromClause, SelectClause, SelectValue, TableStorageKind};
use nanodb::expressions::{CompareOp, Expression};
use nanodb::relations::{ColumnInfo, ColumnType, Schema, SqlType, Tuple, Value};
use nanodb::tables::colstore::ColStoreEncoding;
use nanodb::Database;

fn weather_schema() -> Schema {
    Schema::with_columns(vec![
        ColumnInfo::new("state", None, ColumnType::with_length(SqlType::VarChar, 12)),
        ColumnInfo::new("city", None, ColumnType::with_length(SqlType::VarChar, 20)),
        ColumnInfo::new("reading", None, ColumnType::new(SqlType::Integer)),
    ])
    .unwrap()
}

/// Writes a pipe-delimited input whose columns exercise all three
/// encodings: long runs (state), low cardinality (city), unique values
/// (reading).
fn write_input(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("weather.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    let cities = ["fresno", "oakland"];
    let mut line = 0;
    for state in ["CA", "CA", "CA", "NY", "NY", "NY"] {
        writeln!(
            file,
            "{}|{}|{}",
            state,
            cities[line % cities.len()],
            line * 7
        )
        .unwrap();
        line += 1;
    }
    path
}

fn load_weather(db: &Database, input: &std::path::Path) {
    let mut session = db.create_session();
    db.execute(
        &mut session,
        Command::CreateTable {
            table: "weather".into(),
            schema: weather_schema(),
            storage: TableStorageKind::ColumnStore,
        },
    )
    .unwrap();
    let result = db
        .execute(
            &mut session,
            Command::LoadFile {
                table: "weather".into(),
                path: input.to_path_buf(),
                delimiter: '|',
            },
        )
        .unwrap();
    assert_eq!(result.status(), Some("loaded 6 rows into 'weather'"));
}

#[test]
fn load_then_select_star_streams_all_rows() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let db = Database::builder()
        .base_dir(dir.path().join("db"))
        .page_size(512)
        .open()
        .unwrap();
    load_weather(&db, &input);

    let (schema, rows) = db
        .query(&SelectClause::scan_of(FromClause::base_table("weather")))
        .unwrap();

    assert_eq!(schema.num_columns(), 3);
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0].value(0).unwrap(), Value::String("CA".into()));
    assert_eq!(rows[5].value(1).unwrap(), Value::String("oakland".into()));
    assert_eq!(rows[5].value(2).unwrap(), Value::Integer(35));
}

#[test]
fn predicates_and_projection_run_against_column_blocks() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let db = Database::builder()
        .base_dir(dir.path().join("db"))
        .page_size(512)
        .open()
        .unwrap();
    load_weather(&db, &input);

    let mut clause = SelectClause::scan_of(FromClause::base_table("weather"));
    clause.select_values = vec![SelectValue::expr(Expression::column("reading"))];
    clause.where_expr = Some(Expression::compare(
        Expression::column("state"),
        CompareOp::Equals,
        Expression::literal(Value::String("NY".into())),
    ));

    let (schema, rows) = db.query(&clause).unwrap();
    assert_eq!(schema.num_columns(), 1);
    let readings: Vec<Value> = rows.iter().map(|r| r.value(0).unwrap()).collect();
    assert_eq!(
        readings,
        vec![Value::Integer(21), Value::Integer(28), Value::Integer(35)]
    );
}

#[test]
fn analyzer_chooses_the_expected_encodings() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let db = Database::builder()
        .base_dir(dir.path().join("db"))
        .page_size(512)
        .open()
        .unwrap();
    load_weather(&db, &input);

    let table = db.colstore_manager().open_table("weather").unwrap();
    let state = db.colstore_manager().open_column_reader(&table, 0).unwrap();
    let city = db.colstore_manager().open_column_reader(&table, 1).unwrap();
    let reading = db.colstore_manager().open_column_reader(&table, 2).unwrap();

    assert_eq!(state.encoding(), ColStoreEncoding::RunLength);
    assert_eq!(city.encoding(), ColStoreEncoding::Dictionary);
    assert_eq!(reading.encoding(), ColStoreEncoding::Uncompressed);
}

#[test]
fn column_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let db_path = dir.path().join("db");

    {
        let db = Database::builder()
            .base_dir(&db_path)
            .page_size(512)
            .open()
            .unwrap();
        load_weather(&db, &input);
        db.close().unwrap();
    }

    let db = Database::builder()
        .base_dir(&db_path)
        .page_size(512)
        .open()
        .unwrap();
    let (_, rows) = db
        .query(&SelectClause::scan_of(FromClause::base_table("weather")))
        .unwrap();
    assert_eq!(rows.len(), 6);
}

#[test]
fn column_store_in_a_join_is_refused() {
    let dir = tempdir().unwrap();
    let input = write_input(dir.path());
    let db = Database::builder()
        .base_dir(dir.path().join("db"))
        .page_size(512)
        .open()
        .unwrap();
    load_weather(&db, &input);

    let mut session = db.create_session();
    db.execute(
        &mut session,
        Command::CreateTable {
            table: "heap_side".into(),
            schema: Schema::with_columns(vec![ColumnInfo::new(
                "x",
                None,
                ColumnType::new(SqlType::Integer),
            )])
            .unwrap(),
            storage: TableStorageKind::Heap,
        },
    )
    .unwrap();

    let clause = SelectClause::scan_of(FromClause::join(
        FromClause::base_table("weather"),
        FromClause::base_table("heap_side"),
        nanodb::commands::JoinType::Cross,
        None,
    ));
    assert!(db.query(&clause).is_err());
}
