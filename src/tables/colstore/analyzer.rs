//! # Bulk-Load Analyzer
//!
//! Inspects the rows destined for a column-store table and picks an
//! encoding per column:
//!
//! - long runs of repeated values favor run-length encoding,
//! - low-cardinality string columns favor dictionary encoding,
//! - everything else stays uncompressed.
//!
//! The analyzer also doubles as the LoadFile front-end, parsing delimited
//! text into typed rows against the table schema.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use eyre::{bail, Result, WrapErr};
use tracing::debug;

use crate::error::DbError;
use crate::relations::{Schema, SqlType, Tuple, TupleLiteral, Value};
use crate::tables::colstore::encoding::ColStoreEncoding;

/// Average run length at or above which RLE pays off.
const RLE_RUN_THRESHOLD: f32 = 2.0;

/// Largest dictionary the encoding supports (codes pack into 16-bit words).
const MAX_DICTIONARY_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct ColumnAnalysis {
    pub encoding: ColStoreEncoding,
    pub distinct_values: usize,
    pub avg_run_length: f32,
}

/// Holds the rows of one bulk load and the per-column statistics derived
/// from them.
pub struct TableAnalyzer {
    schema: Arc<Schema>,
    rows: Vec<TupleLiteral>,
}

impl TableAnalyzer {
    pub fn new(schema: Arc<Schema>, rows: Vec<TupleLiteral>) -> Result<Self> {
        for (row_no, row) in rows.iter().enumerate() {
            for i in 0..schema.num_columns() {
                if row.value(i)?.is_null() {
                    bail!(DbError::Schema(format!(
                        "column stores do not accept NULLs (row {}, column '{}')",
                        row_no,
                        schema.column(i).name
                    )));
                }
            }
        }
        Ok(Self { schema, rows })
    }

    /// Parses a delimited text file (one row per line) against the schema.
    pub fn from_delimited_file(
        schema: Arc<Schema>,
        path: &Path,
        delimiter: char,
    ) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DbError::Io(format!("failed to read '{}': {}", path.display(), e)))?;

        let mut rows = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(delimiter).collect();
            if fields.len() != schema.num_columns() {
                bail!(DbError::Schema(format!(
                    "line {} has {} fields but the table has {} columns",
                    line_no + 1,
                    fields.len(),
                    schema.num_columns()
                )));
            }

            let mut values = Vec::with_capacity(fields.len());
            for (field, col) in fields.iter().zip(schema.columns()) {
                let field = field.trim();
                let value = match col.column_type.base {
                    SqlType::Integer => Value::Integer(field.parse().wrap_err_with(|| {
                        format!("line {}: '{}' is not an INTEGER", line_no + 1, field)
                    })?),
                    SqlType::BigInt => Value::BigInt(field.parse().wrap_err_with(|| {
                        format!("line {}: '{}' is not a BIGINT", line_no + 1, field)
                    })?),
                    SqlType::Float => Value::Float(field.parse().wrap_err_with(|| {
                        format!("line {}: '{}' is not a FLOAT", line_no + 1, field)
                    })?),
                    SqlType::Double => Value::Double(field.parse().wrap_err_with(|| {
                        format!("line {}: '{}' is not a DOUBLE", line_no + 1, field)
                    })?),
                    SqlType::Char | SqlType::VarChar => Value::String(field.to_string()),
                };
                values.push(value);
            }
            rows.push(TupleLiteral::new(values));
        }

        Self::new(schema, rows)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_values(&self, column: usize) -> Result<Vec<Value>> {
        self.rows.iter().map(|row| row.value(column)).collect()
    }

    /// Chooses the encoding for one column from its run structure and
    /// cardinality.
    pub fn analyze_column(&self, column: usize) -> Result<ColumnAnalysis> {
        let values = self.column_values(column)?;
        let column_type = self.schema.column(column).column_type;

        let mut runs = 0usize;
        let mut distinct: BTreeSet<String> = BTreeSet::new();
        for (i, value) in values.iter().enumerate() {
            if i == 0 || values[i - 1] != *value {
                runs += 1;
            }
            distinct.insert(value.to_string());
        }

        let avg_run_length = if runs == 0 {
            0.0
        } else {
            values.len() as f32 / runs as f32
        };

        let encoding = if !values.is_empty() && avg_run_length >= RLE_RUN_THRESHOLD {
            ColStoreEncoding::RunLength
        } else if column_type.base.has_length()
            && !distinct.is_empty()
            && distinct.len() <= MAX_DICTIONARY_SIZE
            && distinct.len() < values.len()
        {
            ColStoreEncoding::Dictionary
        } else {
            ColStoreEncoding::Uncompressed
        };

        debug!(
            column = %self.schema.column(column).name,
            ?encoding,
            distinct = distinct.len(),
            avg_run_length,
            "column analyzed"
        );

        Ok(ColumnAnalysis {
            encoding,
            distinct_values: distinct.len(),
            avg_run_length,
        })
    }

    /// The distinct string values of a column, in first-appearance order;
    /// the dictionary encoder assigns codes from this.
    pub fn distinct_strings(&self, column: usize) -> Result<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for value in self.column_values(column)? {
            let s = match value {
                Value::String(s) => s,
                other => bail!(DbError::Schema(format!(
                    "dictionary encoding requires string values, found {}",
                    other
                ))),
            };
            if seen.insert(s.clone()) {
                ordered.push(s);
            }
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relations::{ColumnInfo, ColumnType};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::with_columns(vec![
                ColumnInfo::new("state", Some("t"), ColumnType::with_length(SqlType::VarChar, 10)),
                ColumnInfo::new("reading", Some("t"), ColumnType::new(SqlType::Integer)),
            ])
            .unwrap(),
        )
    }

    fn rows(pairs: &[(&str, i32)]) -> Vec<TupleLiteral> {
        pairs
            .iter()
            .map(|(s, n)| {
                TupleLiteral::new(vec![Value::String(s.to_string()), Value::Integer(*n)])
            })
            .collect()
    }

    #[test]
    fn repeated_runs_choose_rle() {
        let analyzer = TableAnalyzer::new(
            schema(),
            rows(&[("CA", 1), ("CA", 2), ("CA", 3), ("NY", 4), ("NY", 5), ("NY", 6)]),
        )
        .unwrap();

        let analysis = analyzer.analyze_column(0).unwrap();
        assert_eq!(analysis.encoding, ColStoreEncoding::RunLength);
        assert!(analysis.avg_run_length >= 2.0);
    }

    #[test]
    fn low_cardinality_strings_choose_dictionary() {
        let analyzer = TableAnalyzer::new(
            schema(),
            rows(&[("CA", 1), ("NY", 2), ("CA", 3), ("NY", 4), ("TX", 5), ("CA", 6)]),
        )
        .unwrap();

        let analysis = analyzer.analyze_column(0).unwrap();
        assert_eq!(analysis.encoding, ColStoreEncoding::Dictionary);
        assert_eq!(analysis.distinct_values, 3);
    }

    #[test]
    fn unique_integers_stay_uncompressed() {
        let analyzer = TableAnalyzer::new(
            schema(),
            rows(&[("a", 1), ("b", 7), ("c", 3), ("d", 9), ("e", 5), ("f", 2)]),
        )
        .unwrap();

        let analysis = analyzer.analyze_column(1).unwrap();
        assert_eq!(analysis.encoding, ColStoreEncoding::Uncompressed);
    }

    #[test]
    fn nulls_are_rejected_up_front() {
        let bad = vec![TupleLiteral::new(vec![Value::Null, Value::Integer(1)])];
        assert!(TableAnalyzer::new(schema(), bad).is_err());
    }

    #[test]
    fn distinct_strings_preserve_first_appearance_order() {
        let analyzer = TableAnalyzer::new(
            schema(),
            rows(&[("NY", 1), ("CA", 2), ("NY", 3), ("TX", 4)]),
        )
        .unwrap();
        assert_eq!(analyzer.distinct_strings(0).unwrap(), vec!["NY", "CA", "TX"]);
    }
}
