//! # Command Surface
//!
//! The abstract commands a shell or driver submits to the engine, and the
//! query representation the planner consumes. The SQL text parser that
//! produces these lives outside the engine; tests and embedders build them
//! directly.

use std::path::PathBuf;

use crate::expressions::{Expression, OrderByExpression};
use crate::relations::{ColumnName, Schema, Value};

/// One item of a SELECT list: an expression (optionally aliased) or a
/// wildcard (`*` / `tbl.*`).
#[derive(Debug, Clone, PartialEq)]
pub enum SelectValue {
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
    Wildcard(ColumnName),
}

impl SelectValue {
    pub fn expr(expr: Expression) -> Self {
        SelectValue::Expression { expr, alias: None }
    }

    pub fn aliased(expr: Expression, alias: &str) -> Self {
        SelectValue::Expression {
            expr,
            alias: Some(alias.to_string()),
        }
    }

    pub fn star() -> Self {
        SelectValue::Wildcard(ColumnName::wildcard())
    }

    pub fn table_star(table: &str) -> Self {
        SelectValue::Wildcard(ColumnName::table_wildcard(table))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Cross,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(
            self,
            JoinType::LeftOuter | JoinType::RightOuter | JoinType::FullOuter
        )
    }
}

/// A FROM-clause tree: base tables and subqueries at the leaves, joins
/// above them.
#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    BaseTable {
        table: String,
        alias: Option<String>,
    },
    SelectSubquery {
        select: Box<SelectClause>,
        alias: String,
    },
    Join {
        left: Box<FromClause>,
        right: Box<FromClause>,
        join_type: JoinType,
        on: Option<Expression>,
    },
}

impl FromClause {
    pub fn base_table(table: &str) -> Self {
        FromClause::BaseTable {
            table: table.to_string(),
            alias: None,
        }
    }

    pub fn aliased_table(table: &str, alias: &str) -> Self {
        FromClause::BaseTable {
            table: table.to_string(),
            alias: Some(alias.to_string()),
        }
    }

    pub fn join(left: FromClause, right: FromClause, join_type: JoinType, on: Option<Expression>) -> Self {
        FromClause::Join {
            left: Box::new(left),
            right: Box::new(right),
            join_type,
            on,
        }
    }

    pub fn is_outer_join(&self) -> bool {
        matches!(self, FromClause::Join { join_type, .. } if join_type.is_outer())
    }
}

/// A parsed SELECT statement, as handed over by the surface parser.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    pub select_values: Vec<SelectValue>,
    pub from: Option<FromClause>,
    pub where_expr: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: Vec<OrderByExpression>,
    pub distinct: bool,
}

impl SelectClause {
    /// `SELECT * FROM ...` with no WHERE / grouping / ordering decoration.
    pub fn scan_of(from: FromClause) -> Self {
        Self {
            select_values: vec![SelectValue::star()],
            from: Some(from),
            where_expr: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            distinct: false,
        }
    }

    /// A projection is trivial when it is exactly the unqualified `*`:
    /// no reshaping of the child's output is needed.
    pub fn is_trivial_project(&self) -> bool {
        self.select_values.len() == 1
            && matches!(
                &self.select_values[0],
                SelectValue::Wildcard(name) if name.is_wildcard() && name.table.is_none()
            )
    }
}

/// How a new table stores its tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStorageKind {
    Heap,
    ColumnStore,
}

/// The commands the engine accepts from its callers.
#[derive(Debug, Clone)]
pub enum Command {
    Select(SelectClause),
    Insert {
        table: String,
        values: Vec<Value>,
    },
    CreateTable {
        table: String,
        schema: Schema,
        storage: TableStorageKind,
    },
    Begin,
    Commit,
    Rollback,
    LoadFile {
        table: String,
        path: PathBuf,
        delimiter: char,
    },
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_projection_is_exactly_the_bare_star() {
        assert!(SelectClause::scan_of(FromClause::base_table("t")).is_trivial_project());

        let mut qualified = SelectClause::scan_of(FromClause::base_table("t"));
        qualified.select_values = vec![SelectValue::table_star("t")];
        assert!(!qualified.is_trivial_project());

        let mut exprs = SelectClause::scan_of(FromClause::base_table("t"));
        exprs.select_values = vec![SelectValue::expr(Expression::column("a"))];
        assert!(!exprs.is_trivial_project());
    }

    #[test]
    fn outer_join_detection() {
        let join = FromClause::join(
            FromClause::base_table("a"),
            FromClause::base_table("b"),
            JoinType::LeftOuter,
            None,
        );
        assert!(join.is_outer_join());

        let inner = FromClause::join(
            FromClause::base_table("a"),
            FromClause::base_table("b"),
            JoinType::Inner,
            None,
        );
        assert!(!inner.is_outer_join());
    }
}
