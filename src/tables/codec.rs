//! # Page-Level Codecs
//!
//! Cursor-style reading and writing inside a single pinned page, plus the
//! two persistent encodings shared across table kinds:
//!
//! - the **table schema header** stored on page 0 of heap and column-store
//!   files (column descriptors, key constraints, statistics), and
//! - the **tuple encoding** used for heap rows and B+-tree keys: a null
//!   bitmap prefix followed by the non-null values in column order.

use eyre::{ensure, Result};

use crate::error::DbError;
use crate::relations::{
    ColumnInfo, ColumnType, ForeignKeyColumns, KeyColumns, Schema, SqlType, TableConstraintType,
    Tuple, TupleLiteral, Value,
};
use crate::storage::DBPage;

/// Position-tracking reader/writer over one pinned page.
pub struct PageCursor<'a> {
    page: &'a DBPage,
    position: usize,
}

impl<'a> PageCursor<'a> {
    pub fn new(page: &'a DBPage, position: usize) -> Self {
        Self { page, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.page.read_u8(self.position)?;
        self.position += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let v = self.page.read_u16(self.position)?;
        self.position += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.page.read_u32(self.position)?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.page.read(self.position, &mut buf)?;
        self.position += len;
        Ok(buf)
    }

    pub fn read_var_string255(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.page.write_u8(self.position, value)?;
        self.position += 1;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.page.write_u16(self.position, value)?;
        self.position += 2;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.page.write_u32(self.position, value)?;
        self.position += 4;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.page.write(self.position, bytes)?;
        self.position += bytes.len();
        Ok(())
    }

    pub fn write_var_string255(&mut self, s: &str) -> Result<()> {
        debug_assert!(s.len() <= 255);
        self.write_u8(s.len() as u8)?;
        self.write_bytes(s.as_bytes())
    }
}

const NAMED_CONSTRAINT_FLAG: u8 = 0x80;

/// Writes the table schema (columns, then constraints) starting at
/// `offset`; returns the cursor position after the constraints, which is
/// where the persisted statistics live.
pub fn write_table_schema(page: &DBPage, offset: usize, schema: &Schema) -> Result<usize> {
    let mut cursor = PageCursor::new(page, offset);

    cursor.write_u8(schema.num_columns() as u8)?;
    for col in schema.columns() {
        cursor.write_u8(col.column_type.base as u8)?;
        if col.column_type.base.has_length() {
            cursor.write_u16(col.column_type.length.unwrap_or(0))?;
        }
        cursor.write_var_string255(&col.name)?;
    }

    let num_constraints = schema.candidate_keys.len()
        + schema.foreign_keys.len()
        + usize::from(schema.primary_key.is_some());
    cursor.write_u8(num_constraints as u8)?;

    if let Some(pk) = &schema.primary_key {
        write_key(&mut cursor, TableConstraintType::PrimaryKey, pk)?;
    }
    for ck in &schema.candidate_keys {
        write_key(&mut cursor, TableConstraintType::Unique, ck)?;
    }
    for fk in &schema.foreign_keys {
        write_foreign_key(&mut cursor, fk)?;
    }

    Ok(cursor.position())
}

fn write_key(cursor: &mut PageCursor<'_>, kind: TableConstraintType, key: &KeyColumns) -> Result<()> {
    let mut tag = kind as u8;
    if key.constraint_name.is_some() {
        tag |= NAMED_CONSTRAINT_FLAG;
    }
    cursor.write_u8(tag)?;
    if let Some(name) = &key.constraint_name {
        cursor.write_var_string255(name)?;
    }
    cursor.write_u8(key.columns.len() as u8)?;
    for &col in &key.columns {
        cursor.write_u8(col)?;
    }
    cursor.write_var_string255(key.index_name.as_deref().unwrap_or(""))
}

fn write_foreign_key(cursor: &mut PageCursor<'_>, key: &ForeignKeyColumns) -> Result<()> {
    let mut tag = TableConstraintType::ForeignKey as u8;
    if key.constraint_name.is_some() {
        tag |= NAMED_CONSTRAINT_FLAG;
    }
    cursor.write_u8(tag)?;
    if let Some(name) = &key.constraint_name {
        cursor.write_var_string255(name)?;
    }
    cursor.write_var_string255(&key.ref_table)?;
    cursor.write_u8(key.columns.len() as u8)?;
    for (&col, &ref_col) in key.columns.iter().zip(&key.ref_columns) {
        cursor.write_u8(col)?;
        cursor.write_u8(ref_col)?;
    }
    Ok(())
}

/// Reads the schema back; columns are qualified with `table_name`.
/// Returns the schema and the position after the constraints.
pub fn read_table_schema(page: &DBPage, offset: usize, table_name: &str) -> Result<(Schema, usize)> {
    let mut cursor = PageCursor::new(page, offset);
    let mut schema = Schema::new();

    let num_columns = cursor.read_u8()?;
    ensure!(
        num_columns > 0,
        DbError::Corruption(format!("table '{}' header has no columns", table_name))
    );

    for _ in 0..num_columns {
        let base = SqlType::from_id(cursor.read_u8()?)?;
        let column_type = if base.has_length() {
            ColumnType::with_length(base, cursor.read_u16()?)
        } else {
            ColumnType::new(base)
        };
        let name = cursor.read_var_string255()?;
        schema.add_column(ColumnInfo::new(&name, Some(table_name), column_type))?;
    }

    let num_constraints = cursor.read_u8()?;
    for _ in 0..num_constraints {
        let tag = cursor.read_u8()?;
        let kind = TableConstraintType::from_id(tag & !NAMED_CONSTRAINT_FLAG)?;
        let constraint_name = if tag & NAMED_CONSTRAINT_FLAG != 0 {
            Some(cursor.read_var_string255()?)
        } else {
            None
        };

        match kind {
            TableConstraintType::PrimaryKey | TableConstraintType::Unique => {
                let size = cursor.read_u8()? as usize;
                let mut columns = Vec::with_capacity(size);
                for _ in 0..size {
                    columns.push(cursor.read_u8()?);
                }
                let index_name = match cursor.read_var_string255()? {
                    s if s.is_empty() => None,
                    s => Some(s),
                };
                let key = KeyColumns {
                    constraint_name,
                    columns,
                    index_name,
                };
                if kind == TableConstraintType::PrimaryKey {
                    schema.primary_key = Some(key);
                } else {
                    schema.candidate_keys.push(key);
                }
            }
            TableConstraintType::ForeignKey => {
                let ref_table = cursor.read_var_string255()?;
                let size = cursor.read_u8()? as usize;
                let mut columns = Vec::with_capacity(size);
                let mut ref_columns = Vec::with_capacity(size);
                for _ in 0..size {
                    columns.push(cursor.read_u8()?);
                    ref_columns.push(cursor.read_u8()?);
                }
                schema.foreign_keys.push(ForeignKeyColumns {
                    constraint_name,
                    ref_table,
                    columns,
                    ref_columns,
                });
            }
        }
    }

    Ok((schema, cursor.position()))
}

/// Encodes a tuple: null bitmap prefix, then non-null values in column
/// order.
pub fn encode_tuple(schema: &Schema, tuple: &dyn Tuple) -> Result<Vec<u8>> {
    ensure!(
        tuple.arity() == schema.num_columns(),
        DbError::Schema(format!(
            "tuple has {} values but the schema has {} columns",
            tuple.arity(),
            schema.num_columns()
        ))
    );

    let bitmap_len = schema.num_columns().div_ceil(8);
    let mut bytes = vec![0u8; bitmap_len];

    for (i, col) in schema.columns().iter().enumerate() {
        let value = tuple.value(i)?;
        if value.is_null() {
            bytes[i / 8] |= 1 << (i % 8);
            continue;
        }
        encode_value(&mut bytes, &col.column_type, &value)?;
    }

    Ok(bytes)
}

fn encode_value(out: &mut Vec<u8>, column_type: &ColumnType, value: &Value) -> Result<()> {
    match (column_type.base, value) {
        (SqlType::Integer, _) => {
            let v = value.as_i64().ok_or_else(|| type_mismatch(column_type, value))?;
            out.extend_from_slice(&(v as i32).to_be_bytes());
        }
        (SqlType::BigInt, _) => {
            let v = value.as_i64().ok_or_else(|| type_mismatch(column_type, value))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        (SqlType::Float, _) => {
            let v = value.as_f64().ok_or_else(|| type_mismatch(column_type, value))?;
            out.extend_from_slice(&(v as f32).to_be_bytes());
        }
        (SqlType::Double, _) => {
            let v = value.as_f64().ok_or_else(|| type_mismatch(column_type, value))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        (SqlType::Char, Value::String(s)) => {
            let n = column_type.length.unwrap_or(0) as usize;
            let mut fixed = s.as_bytes().to_vec();
            fixed.resize(n, b' ');
            out.extend_from_slice(&fixed[..n]);
        }
        (SqlType::VarChar, Value::String(s)) => {
            ensure!(
                s.len() <= column_type.length.unwrap_or(u16::MAX) as usize,
                DbError::Schema(format!(
                    "string of {} bytes exceeds {}",
                    s.len(),
                    column_type
                ))
            );
            out.extend_from_slice(&(s.len() as u16).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        _ => return Err(type_mismatch(column_type, value)),
    }
    Ok(())
}

fn type_mismatch(column_type: &ColumnType, value: &Value) -> eyre::Report {
    eyre::Report::new(DbError::Schema(format!(
        "value {} cannot be stored in a {} column",
        value, column_type
    )))
}

/// Decodes a tuple previously written by [`encode_tuple`].
pub fn decode_tuple(schema: &Schema, bytes: &[u8]) -> Result<TupleLiteral> {
    Ok(decode_tuple_with_size(schema, bytes)?.0)
}

/// Decodes a tuple and reports how many bytes it occupied, for layouts
/// that pack serialized tuples back to back (B+-tree pages).
pub fn decode_tuple_with_size(schema: &Schema, bytes: &[u8]) -> Result<(TupleLiteral, usize)> {
    let bitmap_len = schema.num_columns().div_ceil(8);
    ensure!(
        bytes.len() >= bitmap_len,
        DbError::Corruption("tuple shorter than its null bitmap".into())
    );

    let mut tuple = TupleLiteral::default();
    let mut pos = bitmap_len;

    for (i, col) in schema.columns().iter().enumerate() {
        if bytes[i / 8] & (1 << (i % 8)) != 0 {
            tuple.push(Value::Null);
            continue;
        }
        let (value, consumed) = decode_value(&bytes[pos..], &col.column_type)?;
        tuple.push(value);
        pos += consumed;
    }

    Ok((tuple, pos))
}

fn decode_value(bytes: &[u8], column_type: &ColumnType) -> Result<(Value, usize)> {
    let need = |n: usize| -> Result<&[u8]> {
        ensure!(
            bytes.len() >= n,
            DbError::Corruption("tuple truncated mid-value".into())
        );
        Ok(&bytes[..n])
    };

    Ok(match column_type.base {
        SqlType::Integer => {
            let b = need(4)?;
            (Value::Integer(i32::from_be_bytes(b.try_into().unwrap())), 4)
        }
        SqlType::BigInt => {
            let b = need(8)?;
            (Value::BigInt(i64::from_be_bytes(b.try_into().unwrap())), 8)
        }
        SqlType::Float => {
            let b = need(4)?;
            (Value::Float(f32::from_be_bytes(b.try_into().unwrap())), 4)
        }
        SqlType::Double => {
            let b = need(8)?;
            (Value::Double(f64::from_be_bytes(b.try_into().unwrap())), 8)
        }
        SqlType::Char => {
            let n = column_type.length.unwrap_or(0) as usize;
            let b = need(n)?;
            let s = String::from_utf8_lossy(b)
                .trim_end_matches(' ')
                .to_string();
            (Value::String(s), n)
        }
        SqlType::VarChar => {
            let len_bytes = need(2)?;
            let len = u16::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
            ensure!(
                bytes.len() >= 2 + len,
                DbError::Corruption("VARCHAR value truncated".into())
            );
            let s = String::from_utf8_lossy(&bytes[2..2 + len]).into_owned();
            (Value::String(s), 2 + len)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_POOL_BYTES;
    use crate::storage::{BufferPool, DBFileType, FileManager, StorageService, PAGE0_DATA_OFFSET};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn page_for_test() -> (tempfile::TempDir, DBPage) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(Arc::clone(&fm), DEFAULT_BUFFER_POOL_BYTES));
        let service = StorageService::new(fm, pool);
        let file = service
            .create_db_file("t/t.tbl", DBFileType::HeapDataFile, 8192)
            .unwrap();
        let page = service.load_db_page(&file, 0, false).unwrap();
        (dir, page)
    }

    fn sample_schema() -> Schema {
        let mut schema = Schema::with_columns(vec![
            ColumnInfo::new("id", Some("emp"), ColumnType::new(SqlType::Integer)),
            ColumnInfo::new("salary", Some("emp"), ColumnType::new(SqlType::Double)),
            ColumnInfo::new("name", Some("emp"), ColumnType::with_length(SqlType::VarChar, 40)),
            ColumnInfo::new("grade", Some("emp"), ColumnType::with_length(SqlType::Char, 2)),
        ])
        .unwrap();
        schema.primary_key = Some(KeyColumns {
            constraint_name: Some("pk_emp".into()),
            columns: vec![0],
            index_name: Some("emp_pk_idx".into()),
        });
        schema.foreign_keys.push(ForeignKeyColumns {
            constraint_name: None,
            ref_table: "dept".into(),
            columns: vec![1],
            ref_columns: vec![0],
        });
        schema
    }

    #[test]
    fn schema_header_round_trips() {
        let (_dir, page) = page_for_test();
        let schema = sample_schema();

        let end = write_table_schema(&page, PAGE0_DATA_OFFSET, &schema).unwrap();
        let (read_back, read_end) = read_table_schema(&page, PAGE0_DATA_OFFSET, "emp").unwrap();

        assert_eq!(read_back, schema);
        assert_eq!(read_end, end);
    }

    #[test]
    fn tuple_codec_preserves_nulls_and_values() {
        let schema = sample_schema();
        let tuple = TupleLiteral::new(vec![
            Value::Integer(7),
            Value::Null,
            Value::String("Dijkstra".into()),
            Value::String("A".into()),
        ]);

        let bytes = encode_tuple(&schema, &tuple).unwrap();
        let decoded = decode_tuple(&schema, &bytes).unwrap();

        assert_eq!(decoded.value(0).unwrap(), Value::Integer(7));
        assert_eq!(decoded.value(1).unwrap(), Value::Null);
        assert_eq!(decoded.value(2).unwrap(), Value::String("Dijkstra".into()));
        // CHAR(2) comes back space-trimmed.
        assert_eq!(decoded.value(3).unwrap(), Value::String("A".into()));
    }

    #[test]
    fn arity_mismatch_is_a_schema_error() {
        let schema = sample_schema();
        let short = TupleLiteral::new(vec![Value::Integer(1)]);
        assert!(encode_tuple(&schema, &short).is_err());
    }
}
