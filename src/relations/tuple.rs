//! # Values and Tuples
//!
//! A [`Value`] is a single typed SQL value or NULL. SQL comparison is
//! three-valued: comparing against NULL yields no ordering, which predicates
//! treat as false. Sorting uses a separate total order that places NULL
//! last so ORDER BY has deterministic output.
//!
//! A tuple is an ordered sequence of values. [`TupleLiteral`] owns its
//! values; page-backed tuple views live with the heap table manager and
//! implement the same [`Tuple`] trait.

use std::cmp::Ordering;

use eyre::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Integer(_) | Value::BigInt(_) | Value::Float(_) | Value::Double(_)
        )
    }

    /// Numeric value widened to f64, for mixed-type comparison and
    /// arithmetic.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::BigInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

/// SQL comparison: `None` when either side is NULL or the types are not
/// comparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ if a.is_numeric() && b.is_numeric() => {
            // Integer pairs compare exactly; anything involving a float
            // widens to f64.
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                Some(x.cmp(&y))
            } else {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
        }
        _ => None,
    }
}

/// Total order for sorting: NULL sorts after every value (ascending), and
/// incomparable non-null values fall back to Equal.
pub fn order_values_null_last(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Lexicographic tuple order using the NULL-last value order, comparing up
/// to the shorter arity.
pub fn compare_tuples(a: &dyn Tuple, b: &dyn Tuple) -> Result<Ordering> {
    let common = a.arity().min(b.arity());
    for i in 0..common {
        let ord = order_values_null_last(&a.value(i)?, &b.value(i)?);
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.arity().cmp(&b.arity()))
}

/// Read access to an ordered sequence of typed values.
pub trait Tuple {
    fn arity(&self) -> usize;
    fn value(&self, index: usize) -> Result<Value>;

    fn is_null_value(&self, index: usize) -> Result<bool> {
        Ok(self.value(index)?.is_null())
    }
}

/// A tuple that owns its values outright.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TupleLiteral {
    values: Vec<Value>,
}

impl TupleLiteral {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Materializes any tuple into an owned literal.
    pub fn from_tuple(tuple: &dyn Tuple) -> Result<Self> {
        let mut values = Vec::with_capacity(tuple.arity());
        for i in 0..tuple.arity() {
            values.push(tuple.value(i)?);
        }
        Ok(Self { values })
    }

    /// Concatenation of two tuples, as produced by a join.
    pub fn join(left: &dyn Tuple, right: &dyn Tuple) -> Result<Self> {
        let mut values = Vec::with_capacity(left.arity() + right.arity());
        for i in 0..left.arity() {
            values.push(left.value(i)?);
        }
        for i in 0..right.arity() {
            values.push(right.value(i)?);
        }
        Ok(Self { values })
    }

    /// All-NULL tuple of the given width, used to pad outer-join output.
    pub fn nulls(arity: usize) -> Self {
        Self {
            values: vec![Value::Null; arity],
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }
}

impl Tuple for TupleLiteral {
    fn arity(&self) -> usize {
        self.values.len()
    }

    fn value(&self, index: usize) -> Result<Value> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| eyre::eyre!("tuple index {} out of range", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_comparison_yields_no_ordering() {
        assert_eq!(compare_values(&Value::Null, &Value::Integer(1)), None);
        assert_eq!(compare_values(&Value::Integer(1), &Value::Null), None);
        assert_eq!(compare_values(&Value::Null, &Value::Null), None);
    }

    #[test]
    fn mixed_numeric_types_compare_by_value() {
        assert_eq!(
            compare_values(&Value::Integer(3), &Value::Double(3.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_values(&Value::BigInt(10), &Value::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_values(&Value::Integer(5), &Value::String("5".into())),
            None
        );
    }

    #[test]
    fn large_integers_compare_exactly() {
        let a = Value::BigInt(i64::MAX);
        let b = Value::BigInt(i64::MAX - 1);
        assert_eq!(compare_values(&a, &b), Some(Ordering::Greater));
    }

    #[test]
    fn sort_order_puts_null_last() {
        let mut vals = vec![Value::Null, Value::Integer(2), Value::Integer(1)];
        vals.sort_by(order_values_null_last);
        assert_eq!(
            vals,
            vec![Value::Integer(1), Value::Integer(2), Value::Null]
        );
    }

    #[test]
    fn join_concatenates_in_order() {
        let left = TupleLiteral::new(vec![Value::Integer(1)]);
        let right = TupleLiteral::new(vec![Value::Null, Value::String("x".into())]);
        let joined = TupleLiteral::join(&left, &right).unwrap();
        assert_eq!(joined.arity(), 3);
        assert_eq!(joined.value(2).unwrap(), Value::String("x".into()));
    }
}
