//! # Relational Model
//!
//! Types, values, tuples and schemas shared by the storage and query
//! layers.

pub mod schema;
pub mod tuple;
pub mod types;

pub use schema::{ForeignKeyColumns, KeyColumns, Schema, TableConstraintType};
pub use tuple::{
    compare_tuples, compare_values, order_values_null_last, Tuple, TupleLiteral, Value,
};
pub use types::{ColumnInfo, ColumnName, ColumnType, SqlType};
