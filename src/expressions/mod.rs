//! # Expression Algebra
//!
//! A closed sum type of expression variants with a single evaluator.
//! Predicates use SQL three-valued logic collapsed at the boundary: a NULL
//! predicate result is false. Structural equality derives from the tag and
//! children, which is what the planner's conjunct bookkeeping relies on.
//!
//! An [`Environment`] holds a stack of `(schema, tuple)` bindings; column
//! lookup resolves against the deepest binding that defines the column, so
//! correlated lookups see the innermost row first.

use eyre::{bail, Result};

use crate::error::DbError;
use crate::relations::{
    compare_values, ColumnInfo, ColumnName, ColumnType, Schema, SqlType, Tuple, TupleLiteral,
    Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl CompareOp {
    pub fn flip(self) -> Self {
        match self {
            CompareOp::LessThan => CompareOp::GreaterThan,
            CompareOp::LessOrEqual => CompareOp::GreaterOrEqual,
            CompareOp::GreaterThan => CompareOp::LessThan,
            CompareOp::GreaterOrEqual => CompareOp::LessOrEqual,
            op => op,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    ColumnRef(ColumnName),
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Boolean {
        op: BoolOp,
        terms: Vec<Expression>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Function {
        name: String,
        args: Vec<Expression>,
    },
}

impl Expression {
    pub fn column(name: &str) -> Self {
        Expression::ColumnRef(ColumnName::named(name))
    }

    pub fn qualified_column(table: &str, name: &str) -> Self {
        Expression::ColumnRef(ColumnName::qualified(table, name))
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn compare(left: Expression, op: CompareOp, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(terms: Vec<Expression>) -> Self {
        Expression::Boolean {
            op: BoolOp::And,
            terms,
        }
    }

    pub fn or(terms: Vec<Expression>) -> Self {
        Expression::Boolean {
            op: BoolOp::Or,
            terms,
        }
    }

    pub fn not(term: Expression) -> Self {
        Expression::Boolean {
            op: BoolOp::Not,
            terms: vec![term],
        }
    }

    pub fn evaluate(&self, env: &Environment) -> Result<Value> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),

            Expression::ColumnRef(name) => env.lookup(name),

            Expression::Compare { op, left, right } => {
                let lhs = left.evaluate(env)?;
                let rhs = right.evaluate(env)?;
                Ok(match compare_values(&lhs, &rhs) {
                    None => Value::Null,
                    Some(ord) => {
                        let holds = match op {
                            CompareOp::Equals => ord.is_eq(),
                            CompareOp::NotEquals => ord.is_ne(),
                            CompareOp::LessThan => ord.is_lt(),
                            CompareOp::LessOrEqual => ord.is_le(),
                            CompareOp::GreaterThan => ord.is_gt(),
                            CompareOp::GreaterOrEqual => ord.is_ge(),
                        };
                        Value::Integer(holds as i32)
                    }
                })
            }

            Expression::Boolean { op, terms } => match op {
                BoolOp::And => {
                    for term in terms {
                        if !term.evaluate_predicate(env)? {
                            return Ok(Value::Integer(0));
                        }
                    }
                    Ok(Value::Integer(1))
                }
                BoolOp::Or => {
                    for term in terms {
                        if term.evaluate_predicate(env)? {
                            return Ok(Value::Integer(1));
                        }
                    }
                    Ok(Value::Integer(0))
                }
                BoolOp::Not => {
                    let inner = terms
                        .first()
                        .ok_or_else(|| eyre::eyre!("NOT requires one term"))?;
                    Ok(Value::Integer(!inner.evaluate_predicate(env)? as i32))
                }
            },

            Expression::Arithmetic { op, left, right } => {
                let lhs = left.evaluate(env)?;
                let rhs = right.evaluate(env)?;
                eval_arithmetic(*op, &lhs, &rhs)
            }

            Expression::Function { name, args } => {
                if name.eq_ignore_ascii_case("IFNULL") {
                    if args.len() != 2 {
                        bail!(DbError::Schema(format!(
                            "IFNULL takes 2 arguments, got {}",
                            args.len()
                        )));
                    }
                    let first = args[0].evaluate(env)?;
                    if first.is_null() {
                        args[1].evaluate(env)
                    } else {
                        Ok(first)
                    }
                } else {
                    bail!(DbError::Schema(format!("unknown function '{}'", name)))
                }
            }
        }
    }

    /// Evaluates as a predicate. NULL (unknown) is false.
    pub fn evaluate_predicate(&self, env: &Environment) -> Result<bool> {
        Ok(match self.evaluate(env)? {
            Value::Null => false,
            Value::Integer(v) => v != 0,
            Value::BigInt(v) => v != 0,
            other => bail!(DbError::Execution(format!(
                "predicate evaluated to non-boolean value {}",
                other
            ))),
        })
    }

    /// Result-column descriptor of this expression against an input schema.
    pub fn column_info(&self, schema: &Schema) -> Result<ColumnInfo> {
        match self {
            Expression::ColumnRef(name) => {
                let idx = schema.column_index(name)?.ok_or_else(|| {
                    DbError::Schema(format!("unresolved column reference '{}'", name))
                })?;
                Ok(schema.column(idx).clone())
            }
            other => Ok(ColumnInfo {
                name: format!("{}", other),
                table_name: None,
                column_type: other.infer_type(schema)?,
            }),
        }
    }

    fn infer_type(&self, schema: &Schema) -> Result<ColumnType> {
        Ok(match self {
            Expression::Literal(v) => match v {
                Value::Null | Value::Integer(_) => ColumnType::new(SqlType::Integer),
                Value::BigInt(_) => ColumnType::new(SqlType::BigInt),
                Value::Float(_) => ColumnType::new(SqlType::Float),
                Value::Double(_) => ColumnType::new(SqlType::Double),
                Value::String(s) => ColumnType::with_length(SqlType::VarChar, s.len() as u16),
            },
            Expression::ColumnRef(_) => self.column_info(schema)?.column_type,
            Expression::Compare { .. } | Expression::Boolean { .. } => {
                ColumnType::new(SqlType::Integer)
            }
            Expression::Arithmetic { left, right, .. } => {
                let l = left.infer_type(schema)?;
                let r = right.infer_type(schema)?;
                if l.base == SqlType::Double
                    || r.base == SqlType::Double
                    || l.base == SqlType::Float
                    || r.base == SqlType::Float
                {
                    ColumnType::new(SqlType::Double)
                } else if l.base == SqlType::BigInt || r.base == SqlType::BigInt {
                    ColumnType::new(SqlType::BigInt)
                } else {
                    ColumnType::new(SqlType::Integer)
                }
            }
            Expression::Function { args, .. } => match args.first() {
                Some(arg) => arg.infer_type(schema)?,
                None => ColumnType::new(SqlType::Integer),
            },
        })
    }

    /// Collects every column reference in the expression tree.
    pub fn collect_column_refs(&self, out: &mut Vec<ColumnName>) {
        match self {
            Expression::Literal(_) => {}
            Expression::ColumnRef(name) => out.push(name.clone()),
            Expression::Compare { left, right, .. }
            | Expression::Arithmetic { left, right, .. } => {
                left.collect_column_refs(out);
                right.collect_column_refs(out);
            }
            Expression::Boolean { terms, .. } => {
                for term in terms {
                    term.collect_column_refs(out);
                }
            }
            Expression::Function { args, .. } => {
                for arg in args {
                    arg.collect_column_refs(out);
                }
            }
        }
    }
}

fn eval_arithmetic(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }

    // Exact integer arithmetic when both sides are integers, else f64.
    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64()) {
        let result = match op {
            ArithOp::Add => l.wrapping_add(r),
            ArithOp::Subtract => l.wrapping_sub(r),
            ArithOp::Multiply => l.wrapping_mul(r),
            ArithOp::Divide | ArithOp::Remainder => {
                if r == 0 {
                    bail!(DbError::Execution("division by zero".into()));
                }
                if op == ArithOp::Divide {
                    l / r
                } else {
                    l % r
                }
            }
        };
        let narrow = matches!(lhs, Value::Integer(_)) && matches!(rhs, Value::Integer(_));
        return Ok(if narrow && i32::try_from(result).is_ok() {
            Value::Integer(result as i32)
        } else {
            Value::BigInt(result)
        });
    }

    let (l, r) = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => (l, r),
        _ => bail!(DbError::Execution(format!(
            "cannot apply arithmetic to {} and {}",
            lhs, rhs
        ))),
    };
    let result = match op {
        ArithOp::Add => l + r,
        ArithOp::Subtract => l - r,
        ArithOp::Multiply => l * r,
        ArithOp::Divide => {
            if r == 0.0 {
                bail!(DbError::Execution("division by zero".into()));
            }
            l / r
        }
        ArithOp::Remainder => {
            if r == 0.0 {
                bail!(DbError::Execution("division by zero".into()));
            }
            l % r
        }
    };
    Ok(Value::Double(result))
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::ColumnRef(name) => write!(f, "{}", name),
            Expression::Compare { op, left, right } => {
                let sym = match op {
                    CompareOp::Equals => "=",
                    CompareOp::NotEquals => "!=",
                    CompareOp::LessThan => "<",
                    CompareOp::LessOrEqual => "<=",
                    CompareOp::GreaterThan => ">",
                    CompareOp::GreaterOrEqual => ">=",
                };
                write!(f, "{} {} {}", left, sym, right)
            }
            Expression::Boolean { op, terms } => match op {
                BoolOp::Not => write!(f, "NOT ({})", terms[0]),
                _ => {
                    let sep = if *op == BoolOp::And { " AND " } else { " OR " };
                    let parts: Vec<String> = terms.iter().map(|t| format!("({})", t)).collect();
                    write!(f, "{}", parts.join(sep))
                }
            },
            Expression::Arithmetic { op, left, right } => {
                let sym = match op {
                    ArithOp::Add => "+",
                    ArithOp::Subtract => "-",
                    ArithOp::Multiply => "*",
                    ArithOp::Divide => "/",
                    ArithOp::Remainder => "%",
                };
                write!(f, "{} {} {}", left, sym, right)
            }
            Expression::Function { name, args } => {
                let parts: Vec<String> = args.iter().map(|a| format!("{}", a)).collect();
                write!(f, "{}({})", name, parts.join(", "))
            }
        }
    }
}

/// An ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpression {
    pub expr: Expression,
    pub ascending: bool,
}

impl OrderByExpression {
    pub fn asc(expr: Expression) -> Self {
        Self {
            expr,
            ascending: true,
        }
    }

    pub fn desc(expr: Expression) -> Self {
        Self {
            expr,
            ascending: false,
        }
    }
}

/// Evaluation context: a stack of `(schema, tuple)` bindings.
#[derive(Default)]
pub struct Environment {
    bindings: Vec<(Schema, TupleLiteral)>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn add_tuple(&mut self, schema: Schema, tuple: TupleLiteral) {
        self.bindings.push((schema, tuple));
    }

    /// Resolves a column against the deepest binding that defines it.
    pub fn lookup(&self, name: &ColumnName) -> Result<Value> {
        for (schema, tuple) in self.bindings.iter().rev() {
            if let Some(idx) = schema.column_index(name)? {
                return tuple.value(idx);
            }
        }
        bail!(DbError::Schema(format!(
            "unresolved column reference '{}'",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::ColumnInfo;

    fn env_with(columns: Vec<(&str, Value)>) -> Environment {
        let infos = columns
            .iter()
            .map(|(name, _)| ColumnInfo::new(name, Some("t"), ColumnType::new(SqlType::Integer)))
            .collect();
        let schema = Schema::with_columns(infos).unwrap();
        let tuple = TupleLiteral::new(columns.into_iter().map(|(_, v)| v).collect());
        let mut env = Environment::new();
        env.add_tuple(schema, tuple);
        env
    }

    #[test]
    fn comparison_against_null_is_not_satisfied() {
        let env = env_with(vec![("b", Value::Null)]);
        let pred = Expression::compare(
            Expression::column("b"),
            CompareOp::LessThan,
            Expression::literal(Value::Integer(25)),
        );
        assert!(!pred.evaluate_predicate(&env).unwrap());

        let pred = Expression::compare(
            Expression::column("b"),
            CompareOp::Equals,
            Expression::literal(Value::Null),
        );
        assert!(!pred.evaluate_predicate(&env).unwrap());
    }

    #[test]
    fn and_or_not_follow_boolean_semantics() {
        let env = env_with(vec![("a", Value::Integer(5))]);
        let gt = |n| {
            Expression::compare(
                Expression::column("a"),
                CompareOp::GreaterThan,
                Expression::literal(Value::Integer(n)),
            )
        };

        assert!(Expression::and(vec![gt(1), gt(4)])
            .evaluate_predicate(&env)
            .unwrap());
        assert!(!Expression::and(vec![gt(1), gt(10)])
            .evaluate_predicate(&env)
            .unwrap());
        assert!(Expression::or(vec![gt(10), gt(4)])
            .evaluate_predicate(&env)
            .unwrap());
        assert!(Expression::not(gt(10)).evaluate_predicate(&env).unwrap());
    }

    #[test]
    fn arithmetic_propagates_null_and_catches_division_by_zero() {
        let env = env_with(vec![("a", Value::Null)]);
        let sum = Expression::Arithmetic {
            op: ArithOp::Add,
            left: Box::new(Expression::column("a")),
            right: Box::new(Expression::literal(Value::Integer(1))),
        };
        assert_eq!(sum.evaluate(&env).unwrap(), Value::Null);

        let div = Expression::Arithmetic {
            op: ArithOp::Divide,
            left: Box::new(Expression::literal(Value::Integer(1))),
            right: Box::new(Expression::literal(Value::Integer(0))),
        };
        assert!(div.evaluate(&env).is_err());
    }

    #[test]
    fn ifnull_substitutes_only_for_null() {
        let env = env_with(vec![("a", Value::Null), ("b", Value::Integer(3))]);
        let call = |col| Expression::Function {
            name: "IFNULL".into(),
            args: vec![Expression::column(col), Expression::literal(Value::Integer(9))],
        };
        assert_eq!(call("a").evaluate(&env).unwrap(), Value::Integer(9));
        assert_eq!(call("b").evaluate(&env).unwrap(), Value::Integer(3));
    }

    #[test]
    fn deepest_binding_wins() {
        let schema_outer = Schema::with_columns(vec![ColumnInfo::new(
            "x",
            Some("outer"),
            ColumnType::new(SqlType::Integer),
        )])
        .unwrap();
        let schema_inner = Schema::with_columns(vec![ColumnInfo::new(
            "x",
            Some("inner"),
            ColumnType::new(SqlType::Integer),
        )])
        .unwrap();

        let mut env = Environment::new();
        env.add_tuple(schema_outer, TupleLiteral::new(vec![Value::Integer(1)]));
        env.add_tuple(schema_inner, TupleLiteral::new(vec![Value::Integer(2)]));

        assert_eq!(
            env.lookup(&ColumnName::named("x")).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            env.lookup(&ColumnName::qualified("outer", "x")).unwrap(),
            Value::Integer(1)
        );
    }

    #[test]
    fn collect_column_refs_walks_the_whole_tree() {
        let expr = Expression::and(vec![
            Expression::compare(
                Expression::qualified_column("a", "id"),
                CompareOp::Equals,
                Expression::qualified_column("b", "id"),
            ),
            Expression::not(Expression::compare(
                Expression::column("flag"),
                CompareOp::GreaterThan,
                Expression::literal(Value::Integer(0)),
            )),
        ]);

        let mut refs = Vec::new();
        expr.collect_column_refs(&mut refs);
        assert_eq!(refs.len(), 3);
    }
}
