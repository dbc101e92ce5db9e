//! # SQL Type System
//!
//! Canonical column types used across schema persistence, tuple codecs and
//! expression evaluation. Type ids are stable: they are written into table
//! header pages.

use eyre::{bail, Result};

use crate::error::DbError;

/// Base SQL types with persisted single-byte ids.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Integer = 1,
    BigInt = 2,
    Float = 3,
    Double = 4,

    Char = 21,
    VarChar = 22,
}

impl SqlType {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => SqlType::Integer,
            2 => SqlType::BigInt,
            3 => SqlType::Float,
            4 => SqlType::Double,
            21 => SqlType::Char,
            22 => SqlType::VarChar,
            other => bail!(DbError::Corruption(format!("unknown type id {}", other))),
        })
    }

    /// Whether the type carries a declared length (CHAR(n), VARCHAR(n)).
    pub fn has_length(self) -> bool {
        matches!(self, SqlType::Char | SqlType::VarChar)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            SqlType::Integer | SqlType::BigInt | SqlType::Float | SqlType::Double
        )
    }
}

/// A base type plus its declared length, when the type has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub base: SqlType,
    pub length: Option<u16>,
}

impl ColumnType {
    pub fn new(base: SqlType) -> Self {
        debug_assert!(!base.has_length());
        Self { base, length: None }
    }

    pub fn with_length(base: SqlType, length: u16) -> Self {
        debug_assert!(base.has_length());
        Self {
            base,
            length: Some(length),
        }
    }

    /// Average stored width, used for cost estimation.
    pub fn estimated_size(&self) -> usize {
        match self.base {
            SqlType::Integer | SqlType::Float => 4,
            SqlType::BigInt | SqlType::Double => 8,
            SqlType::Char => self.length.unwrap_or(1) as usize,
            SqlType::VarChar => 2 + self.length.unwrap_or(16) as usize / 2,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.base, self.length) {
            (SqlType::Char, Some(n)) => write!(f, "CHAR({})", n),
            (SqlType::VarChar, Some(n)) => write!(f, "VARCHAR({})", n),
            (SqlType::Integer, _) => write!(f, "INTEGER"),
            (SqlType::BigInt, _) => write!(f, "BIGINT"),
            (SqlType::Float, _) => write!(f, "FLOAT"),
            (SqlType::Double, _) => write!(f, "DOUBLE"),
            (base, _) => write!(f, "{:?}", base),
        }
    }
}

/// One column of a schema: name, optional table qualifier, type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub table_name: Option<String>,
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: &str, table_name: Option<&str>, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            table_name: table_name.map(str::to_string),
            column_type,
        }
    }
}

impl std::fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.table_name {
            Some(t) => write!(f, "{}.{}:{}", t, self.name, self.column_type),
            None => write!(f, "{}:{}", self.name, self.column_type),
        }
    }
}

/// A possibly-qualified, possibly-wildcard column reference.
///
/// `column == None` is a wildcard: `*` when unqualified, `tbl.*` when the
/// table is set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnName {
    pub table: Option<String>,
    pub column: Option<String>,
}

impl ColumnName {
    pub fn named(column: &str) -> Self {
        Self {
            table: None,
            column: Some(column.to_string()),
        }
    }

    pub fn qualified(table: &str, column: &str) -> Self {
        Self {
            table: Some(table.to_string()),
            column: Some(column.to_string()),
        }
    }

    pub fn wildcard() -> Self {
        Self {
            table: None,
            column: None,
        }
    }

    pub fn table_wildcard(table: &str) -> Self {
        Self {
            table: Some(table.to_string()),
            column: None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.column.is_none()
    }
}

impl std::fmt::Display for ColumnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let col = self.column.as_deref().unwrap_or("*");
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, col),
            None => write!(f, "{}", col),
        }
    }
}
