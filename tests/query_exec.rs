//! End-to-end query evaluation over heap tables: scans, predicates with
//! NULLs, projection, sorting, and outer joins.

use std::collections::HashSet;

use tempfile::tempdir;

use nanodb::commands::{Command, FromClause, JoinType, SelectClause, SelectValue, TableStorageKind};
use nanodb::expressions::{CompareOp, Expression, OrderByExpression};
use nanodb::relations::{ColumnInfo, ColumnType, Schema, SqlType, Tuple, Value};
use nanodb::Database;

fn open_db(dir: &std::path::Path) -> Database {
    Database::builder()
        .base_dir(dir.join("db"))
        .page_size(512)
        .open()
        .unwrap()
}

fn two_int_schema() -> Schema {
    Schema::with_columns(vec![
        ColumnInfo::new("a", None, ColumnType::new(SqlType::Integer)),
        ColumnInfo::new("b", None, ColumnType::new(SqlType::Integer)),
    ])
    .unwrap()
}

/// Creates `t(a INT, b INT)` with rows (0,NULL) (1,10) (2,20) (3,30) (4,NULL).
fn setup_t(db: &Database) {
    let mut session = db.create_session();
    db.execute(
        &mut session,
        Command::CreateTable {
            table: "t".into(),
            schema: two_int_schema(),
            storage: TableStorageKind::Heap,
        },
    )
    .unwrap();

    for (a, b) in [(0, None), (1, Some(10)), (2, Some(20)), (3, Some(30)), (4, None)] {
        db.execute(
            &mut session,
            Command::Insert {
                table: "t".into(),
                values: vec![
                    Value::Integer(a),
                    b.map(Value::Integer).unwrap_or(Value::Null),
                ],
            },
        )
        .unwrap();
    }
}

fn b_less_than(n: i32) -> Expression {
    Expression::compare(
        Expression::column("b"),
        CompareOp::LessThan,
        Expression::literal(Value::Integer(n)),
    )
}

fn b_greater_than(n: i32) -> Expression {
    Expression::compare(
        Expression::column("b"),
        CompareOp::GreaterThan,
        Expression::literal(Value::Integer(n)),
    )
}

fn collect_a_column(rows: &[nanodb::TupleLiteral]) -> HashSet<i32> {
    rows.iter()
        .map(|row| match row.value(0).unwrap() {
            Value::Integer(v) => v,
            other => panic!("expected integer in column a, got {:?}", other),
        })
        .collect()
}

#[test]
fn select_star_returns_every_row_including_nulls() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    setup_t(&db);

    let (schema, rows) = db
        .query(&SelectClause::scan_of(FromClause::base_table("t")))
        .unwrap();

    assert_eq!(schema.num_columns(), 2);
    assert_eq!(rows.len(), 5);
    assert_eq!(collect_a_column(&rows), HashSet::from([0, 1, 2, 3, 4]));

    let nulls = rows
        .iter()
        .filter(|row| row.value(1).unwrap().is_null())
        .count();
    assert_eq!(nulls, 2);
}

#[test]
fn range_predicates_drop_null_rows() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    setup_t(&db);

    let mut clause = SelectClause::scan_of(FromClause::base_table("t"));
    clause.where_expr = Some(b_less_than(25));
    let (_, rows) = db.query(&clause).unwrap();
    assert_eq!(collect_a_column(&rows), HashSet::from([1, 2]));

    clause.where_expr = Some(b_greater_than(15));
    let (_, rows) = db.query(&clause).unwrap();
    assert_eq!(collect_a_column(&rows), HashSet::from([2, 3]));

    clause.where_expr = Some(Expression::and(vec![b_greater_than(15), b_less_than(25)]));
    let (_, rows) = db.query(&clause).unwrap();
    assert_eq!(collect_a_column(&rows), HashSet::from([2]));
}

#[test]
fn projection_evaluates_expressions_and_aliases() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    setup_t(&db);

    let mut clause = SelectClause::scan_of(FromClause::base_table("t"));
    clause.select_values = vec![
        SelectValue::expr(Expression::column("a")),
        SelectValue::aliased(
            Expression::Arithmetic {
                op: nanodb::expressions::ArithOp::Multiply,
                left: Box::new(Expression::column("b")),
                right: Box::new(Expression::literal(Value::Integer(2))),
            },
            "doubled",
        ),
    ];
    clause.where_expr = Some(b_greater_than(15));
    clause.order_by = vec![OrderByExpression::asc(Expression::column("a"))];

    let (schema, rows) = db.query(&clause).unwrap();
    assert_eq!(schema.column(1).name, "doubled");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value(1).unwrap(), Value::Integer(40));
    assert_eq!(rows[1].value(1).unwrap(), Value::Integer(60));
}

#[test]
fn order_by_puts_nulls_last_ascending() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    setup_t(&db);

    let mut clause = SelectClause::scan_of(FromClause::base_table("t"));
    clause.order_by = vec![OrderByExpression::asc(Expression::column("b"))];

    let (_, rows) = db.query(&clause).unwrap();
    let b_values: Vec<Value> = rows.iter().map(|r| r.value(1).unwrap()).collect();
    assert_eq!(
        b_values,
        vec![
            Value::Integer(10),
            Value::Integer(20),
            Value::Integer(30),
            Value::Null,
            Value::Null,
        ]
    );
}

#[test]
fn inner_join_combines_matching_rows() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    let mut session = db.create_session();

    for table in ["emp", "dept"] {
        let schema = Schema::with_columns(vec![
            ColumnInfo::new("id", None, ColumnType::new(SqlType::Integer)),
            ColumnInfo::new("n", None, ColumnType::new(SqlType::Integer)),
        ])
        .unwrap();
        db.execute(
            &mut session,
            Command::CreateTable {
                table: table.into(),
                schema,
                storage: TableStorageKind::Heap,
            },
        )
        .unwrap();
    }

    for (id, n) in [(1, 100), (2, 200), (3, 300)] {
        db.execute(
            &mut session,
            Command::Insert {
                table: "emp".into(),
                values: vec![Value::Integer(id), Value::Integer(n)],
            },
        )
        .unwrap();
    }
    for (id, n) in [(1, 7), (3, 9)] {
        db.execute(
            &mut session,
            Command::Insert {
                table: "dept".into(),
                values: vec![Value::Integer(id), Value::Integer(n)],
            },
        )
        .unwrap();
    }

    let join_pred = Expression::compare(
        Expression::qualified_column("emp", "id"),
        CompareOp::Equals,
        Expression::qualified_column("dept", "id"),
    );
    let mut clause = SelectClause::scan_of(FromClause::join(
        FromClause::base_table("emp"),
        FromClause::base_table("dept"),
        JoinType::Inner,
        Some(join_pred),
    ));

    let (schema, rows) = db.query(&clause).unwrap();
    assert_eq!(schema.num_columns(), 4);
    assert_eq!(rows.len(), 2);

    // Single-table conjuncts in WHERE are pushed below the join and the
    // result is unchanged semantically.
    clause.where_expr = Some(Expression::compare(
        Expression::qualified_column("emp", "n"),
        CompareOp::GreaterThan,
        Expression::literal(Value::Integer(150)),
    ));
    let (_, filtered) = db.query(&clause).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].value(0).unwrap(), Value::Integer(3));
}

#[test]
fn left_outer_join_pads_unmatched_rows_with_nulls() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    let mut session = db.create_session();

    for (table, rows) in [
        ("l", vec![(1, 10), (2, 20), (3, 30)]),
        ("r", vec![(2, 200)]),
    ] {
        let schema = Schema::with_columns(vec![
            ColumnInfo::new("id", None, ColumnType::new(SqlType::Integer)),
            ColumnInfo::new("v", None, ColumnType::new(SqlType::Integer)),
        ])
        .unwrap();
        db.execute(
            &mut session,
            Command::CreateTable {
                table: table.into(),
                schema,
                storage: TableStorageKind::Heap,
            },
        )
        .unwrap();
        for (id, v) in rows {
            db.execute(
                &mut session,
                Command::Insert {
                    table: table.into(),
                    values: vec![Value::Integer(id), Value::Integer(v)],
                },
            )
            .unwrap();
        }
    }

    let on = Expression::compare(
        Expression::qualified_column("l", "id"),
        CompareOp::Equals,
        Expression::qualified_column("r", "id"),
    );
    let clause = SelectClause::scan_of(FromClause::join(
        FromClause::base_table("l"),
        FromClause::base_table("r"),
        JoinType::LeftOuter,
        Some(on),
    ));

    let (_, rows) = db.query(&clause).unwrap();
    assert_eq!(rows.len(), 3);

    let padded = rows
        .iter()
        .filter(|row| row.value(2).unwrap().is_null() && row.value(3).unwrap().is_null())
        .count();
    assert_eq!(padded, 2, "rows 1 and 3 have no match and get NULL halves");

    let matched: Vec<_> = rows
        .iter()
        .filter(|row| !row.value(2).unwrap().is_null())
        .collect();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].value(3).unwrap(), Value::Integer(200));
}

#[test]
fn subquery_in_from_is_planned_and_renamed() {
    let dir = tempdir().unwrap();
    let db = open_db(dir.path());
    setup_t(&db);

    let mut inner = SelectClause::scan_of(FromClause::base_table("t"));
    inner.where_expr = Some(b_greater_than(15));

    let mut clause = SelectClause::scan_of(FromClause::SelectSubquery {
        select: Box::new(inner),
        alias: "sub".into(),
    });
    clause.where_expr = Some(Expression::compare(
        Expression::qualified_column("sub", "a"),
        CompareOp::LessThan,
        Expression::literal(Value::Integer(3)),
    ));

    let (schema, rows) = db.query(&clause).unwrap();
    assert_eq!(schema.column(0).table_name.as_deref(), Some("sub"));
    assert_eq!(collect_a_column(&rows), HashSet::from([2]));
}
