//! # Schemas
//!
//! An ordered list of column descriptors plus optional key metadata.
//! Column names must be unique within their table qualifier. Lookup by
//! [`ColumnName`] resolves unqualified names only when unambiguous, which
//! is what makes predicate pushdown sound: a conjunct moves to a subplan
//! only if every column it references resolves in that subplan's schema.

use eyre::{bail, ensure, Result};

use crate::error::DbError;
use crate::relations::types::{ColumnInfo, ColumnName};

/// A key over column indexes: primary key or candidate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumns {
    pub constraint_name: Option<String>,
    pub columns: Vec<u8>,
    pub index_name: Option<String>,
}

/// A foreign key: local column indexes paired with referenced columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumns {
    pub constraint_name: Option<String>,
    pub ref_table: String,
    pub columns: Vec<u8>,
    pub ref_columns: Vec<u8>,
}

/// Persisted constraint tags; the high bit marks a named constraint.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableConstraintType {
    PrimaryKey = 1,
    Unique = 2,
    ForeignKey = 3,
}

impl TableConstraintType {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => TableConstraintType::PrimaryKey,
            2 => TableConstraintType::Unique,
            3 => TableConstraintType::ForeignKey,
            other => bail!(DbError::Corruption(format!(
                "unknown constraint type id {}",
                other
            ))),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
    pub primary_key: Option<KeyColumns>,
    pub candidate_keys: Vec<KeyColumns>,
    pub foreign_keys: Vec<ForeignKeyColumns>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(columns: Vec<ColumnInfo>) -> Result<Self> {
        let mut schema = Self::new();
        for col in columns {
            schema.add_column(col)?;
        }
        Ok(schema)
    }

    pub fn add_column(&mut self, column: ColumnInfo) -> Result<()> {
        ensure!(
            !self
                .columns
                .iter()
                .any(|c| c.name == column.name && c.table_name == column.table_name),
            DbError::Schema(format!("duplicate column '{}'", column))
        );
        self.columns.push(column);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &ColumnInfo {
        &self.columns[index]
    }

    /// Index of the column a non-wildcard reference resolves to.
    ///
    /// Unqualified references match any qualifier but must be unambiguous;
    /// an ambiguous reference is a schema error rather than silently
    /// resolving to the first match.
    pub fn column_index(&self, name: &ColumnName) -> Result<Option<usize>> {
        let col = match &name.column {
            Some(c) => c,
            None => {
                bail!(DbError::InvalidArgument(format!(
                    "wildcard '{}' cannot be resolved to one column",
                    name
                )))
            }
        };

        let mut found = None;
        for (i, info) in self.columns.iter().enumerate() {
            if !info.name.eq_ignore_ascii_case(col) {
                continue;
            }
            if let Some(table) = &name.table {
                if info.table_name.as_deref() != Some(table.as_str()) {
                    continue;
                }
            }
            if found.is_some() {
                bail!(DbError::Schema(format!("ambiguous column reference '{}'", name)));
            }
            found = Some(i);
        }
        Ok(found)
    }

    /// Expands a wildcard reference into matching column indexes, or the
    /// single resolved column for a plain reference.
    pub fn find_columns(&self, name: &ColumnName) -> Result<Vec<usize>> {
        if !name.is_wildcard() {
            return Ok(self.column_index(name)?.into_iter().collect());
        }

        let matching: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, info)| match &name.table {
                Some(t) => info.table_name.as_deref() == Some(t.as_str()),
                None => true,
            })
            .map(|(i, _)| i)
            .collect();
        Ok(matching)
    }

    /// Schema of a join: left columns followed by right columns.
    pub fn concat(&self, other: &Schema) -> Result<Schema> {
        let mut result = Schema::new();
        for col in self.columns.iter().chain(other.columns.iter()) {
            result.add_column(col.clone())?;
        }
        Ok(result)
    }

    /// Rewrites every column's qualifier, as the rename node does for
    /// `FROM t AS alias`.
    pub fn with_table_name(&self, table: &str) -> Schema {
        let columns = self
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                table_name: Some(table.to_string()),
                column_type: c.column_type,
            })
            .collect();
        Schema {
            columns,
            primary_key: self.primary_key.clone(),
            candidate_keys: self.candidate_keys.clone(),
            foreign_keys: self.foreign_keys.clone(),
        }
    }

    /// Average stored tuple width, for cost estimation.
    pub fn estimated_tuple_size(&self) -> usize {
        let bitmap = self.columns.len().div_ceil(8);
        bitmap
            + self
                .columns
                .iter()
                .map(|c| c.column_type.estimated_size())
                .sum::<usize>()
    }
}
