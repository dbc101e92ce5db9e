//! # Column Encodings
//!
//! Each column of a column-store table lives in its own file, encoded one
//! of three ways. The column file is self-describing:
//!
//! ```text
//! Page 0:
//!   0      common type/page-size header
//!   2      encoding id (u8)
//!   3      value count (u32)
//!   7      column base type id (u8)
//!   8      declared length (u16, 0 when the type has none)
//!   10     dictionary entry count (u16; 0 unless dictionary-encoded)
//!   12..   dictionary entries (vstr255 each, code order)
//!
//! Pages 1..: one block per page
//!   Uncompressed:  count:u16, then values back to back
//!   RunLength:     runCount:u16, then (value, startRow:u32, runLen:u32)*
//!   Dictionary:    codeCount:u16, then u16 words of packed codes
//! ```
//!
//! Dictionary codes are 1-based (`0` never appears) and `ceil(log2(|D|+1))`
//! bits wide; as many codes as fit pack into each 16-bit word.

use std::sync::Arc;

use eyre::{bail, ensure, Result};
use tracing::debug;

use crate::error::DbError;
use crate::relations::{ColumnType, SqlType, Value};
use crate::storage::{DBFile, DBPage, StorageService};
use crate::tables::codec::PageCursor;

pub const OFFSET_ENCODING: usize = 2;
pub const OFFSET_VALUE_COUNT: usize = 3;
pub const OFFSET_COLUMN_TYPE: usize = 7;
pub const OFFSET_COLUMN_LENGTH: usize = 8;
pub const OFFSET_DICT_COUNT: usize = 10;
pub const OFFSET_DICT_ENTRIES: usize = 12;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColStoreEncoding {
    Uncompressed = 1,
    RunLength = 2,
    Dictionary = 3,
}

impl ColStoreEncoding {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => ColStoreEncoding::Uncompressed,
            2 => ColStoreEncoding::RunLength,
            3 => ColStoreEncoding::Dictionary,
            other => bail!(DbError::Corruption(format!(
                "unknown column encoding id {}",
                other
            ))),
        })
    }
}

/// Bit width of dictionary codes for `distinct` entries.
pub fn dictionary_code_bits(distinct: usize) -> u32 {
    usize::BITS - distinct.leading_zeros()
}

fn encode_col_value(out: &mut Vec<u8>, column_type: &ColumnType, value: &Value) -> Result<()> {
    match column_type.base {
        SqlType::Integer => {
            let v = value
                .as_i64()
                .ok_or_else(|| DbError::Schema(format!("{} is not an INTEGER", value)))?;
            out.extend_from_slice(&(v as i32).to_be_bytes());
        }
        SqlType::BigInt => {
            let v = value
                .as_i64()
                .ok_or_else(|| DbError::Schema(format!("{} is not a BIGINT", value)))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        SqlType::Float => {
            let v = value
                .as_f64()
                .ok_or_else(|| DbError::Schema(format!("{} is not a FLOAT", value)))?;
            out.extend_from_slice(&(v as f32).to_be_bytes());
        }
        SqlType::Double => {
            let v = value
                .as_f64()
                .ok_or_else(|| DbError::Schema(format!("{} is not a DOUBLE", value)))?;
            out.extend_from_slice(&v.to_be_bytes());
        }
        SqlType::Char => match value {
            Value::String(s) => {
                let n = column_type.length.unwrap_or(0) as usize;
                let mut fixed = s.as_bytes().to_vec();
                fixed.resize(n, b' ');
                out.extend_from_slice(&fixed[..n]);
            }
            other => bail!(DbError::Schema(format!("{} is not a CHAR value", other))),
        },
        SqlType::VarChar => match value {
            Value::String(s) => {
                out.extend_from_slice(&(s.len() as u16).to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            other => bail!(DbError::Schema(format!("{} is not a VARCHAR value", other))),
        },
    }
    Ok(())
}

fn decode_col_value(cursor: &mut PageCursor<'_>, column_type: &ColumnType) -> Result<Value> {
    Ok(match column_type.base {
        SqlType::Integer => {
            Value::Integer(i32::from_be_bytes(cursor.read_bytes(4)?.try_into().unwrap()))
        }
        SqlType::BigInt => {
            Value::BigInt(i64::from_be_bytes(cursor.read_bytes(8)?.try_into().unwrap()))
        }
        SqlType::Float => {
            Value::Float(f32::from_be_bytes(cursor.read_bytes(4)?.try_into().unwrap()))
        }
        SqlType::Double => {
            Value::Double(f64::from_be_bytes(cursor.read_bytes(8)?.try_into().unwrap()))
        }
        SqlType::Char => {
            let n = column_type.length.unwrap_or(0) as usize;
            let bytes = cursor.read_bytes(n)?;
            Value::String(
                String::from_utf8_lossy(&bytes)
                    .trim_end_matches(' ')
                    .to_string(),
            )
        }
        SqlType::VarChar => {
            let len = cursor.read_u16()? as usize;
            let bytes = cursor.read_bytes(len)?;
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
    })
}

/// Writes the column-file header (page 0) fields.
pub fn write_column_header(
    page0: &DBPage,
    encoding: ColStoreEncoding,
    value_count: u32,
    column_type: &ColumnType,
    dictionary: Option<&[String]>,
) -> Result<()> {
    page0.write_u8(OFFSET_ENCODING, encoding as u8)?;
    page0.write_u32(OFFSET_VALUE_COUNT, value_count)?;
    page0.write_u8(OFFSET_COLUMN_TYPE, column_type.base as u8)?;
    page0.write_u16(OFFSET_COLUMN_LENGTH, column_type.length.unwrap_or(0))?;

    let dict = dictionary.unwrap_or(&[]);
    let dict_bytes: usize = dict.iter().map(|s| 1 + s.len()).sum();
    ensure!(
        OFFSET_DICT_ENTRIES + dict_bytes <= page0.page_size(),
        DbError::Schema(format!(
            "dictionary of {} entries does not fit the header page",
            dict.len()
        ))
    );

    page0.write_u16(OFFSET_DICT_COUNT, dict.len() as u16)?;
    let mut cursor = PageCursor::new(page0, OFFSET_DICT_ENTRIES);
    for entry in dict {
        cursor.write_var_string255(entry)?;
    }
    Ok(())
}

/// Fills data pages (from page 1) with per-page blocks. `payloads` is one
/// encoded item per value/run; each page gets a u16 item count followed by
/// as many whole items as fit.
fn write_blocks(
    service: &StorageService,
    file: &Arc<DBFile>,
    payloads: impl Iterator<Item = Vec<u8>>,
) -> Result<()> {
    let page_size = file.page_size();
    let mut page_no = 1u32;
    let mut buffer: Vec<u8> = Vec::new();
    let mut count: u16 = 0;

    let flush = |service: &StorageService,
                 page_no: u32,
                 count: u16,
                 buffer: &[u8]|
     -> Result<()> {
        let page = service.load_db_page(file, page_no, true)?;
        page.write_u16(0, count)?;
        page.write(2, buffer)?;
        Ok(())
    };

    for item in payloads {
        ensure!(
            2 + item.len() <= page_size,
            DbError::Execution(format!(
                "encoded item of {} bytes cannot fit a {}-byte page",
                item.len(),
                page_size
            ))
        );
        if 2 + buffer.len() + item.len() > page_size {
            flush(service, page_no, count, &buffer)?;
            page_no += 1;
            buffer.clear();
            count = 0;
        }
        buffer.extend_from_slice(&item);
        count += 1;
    }

    if count > 0 {
        flush(service, page_no, count, &buffer)?;
    }
    Ok(())
}

/// Writes a column uncompressed: values back to back.
pub fn write_uncompressed(
    service: &StorageService,
    file: &Arc<DBFile>,
    column_type: &ColumnType,
    values: &[Value],
) -> Result<()> {
    let page0 = service.load_db_page(file, 0, false)?;
    write_column_header(
        &page0,
        ColStoreEncoding::Uncompressed,
        values.len() as u32,
        column_type,
        None,
    )?;

    let items: Result<Vec<Vec<u8>>> = values
        .iter()
        .map(|v| {
            let mut item = Vec::new();
            encode_col_value(&mut item, column_type, v)?;
            Ok(item)
        })
        .collect();
    write_blocks(service, file, items?.into_iter())
}

/// Writes a column as `(value, startRow, runLength)` runs.
pub fn write_run_length(
    service: &StorageService,
    file: &Arc<DBFile>,
    column_type: &ColumnType,
    values: &[Value],
) -> Result<()> {
    let page0 = service.load_db_page(file, 0, false)?;
    write_column_header(
        &page0,
        ColStoreEncoding::RunLength,
        values.len() as u32,
        column_type,
        None,
    )?;

    let mut runs: Vec<Vec<u8>> = Vec::new();
    let mut i = 0usize;
    while i < values.len() {
        let mut run_len = 1usize;
        while i + run_len < values.len() && values[i + run_len] == values[i] {
            run_len += 1;
        }

        let mut item = Vec::new();
        encode_col_value(&mut item, column_type, &values[i])?;
        item.extend_from_slice(&(i as u32).to_be_bytes());
        item.extend_from_slice(&(run_len as u32).to_be_bytes());
        runs.push(item);

        i += run_len;
    }

    debug!(file = file.name(), runs = runs.len(), "run-length encoded");
    write_blocks(service, file, runs.into_iter())
}

/// Writes a string column as packed dictionary codes. `dictionary` maps
/// code `i + 1` to its string; every value must appear in it.
pub fn write_dictionary(
    service: &StorageService,
    file: &Arc<DBFile>,
    column_type: &ColumnType,
    values: &[Value],
    dictionary: &[String],
) -> Result<()> {
    let page0 = service.load_db_page(file, 0, false)?;
    write_column_header(
        &page0,
        ColStoreEncoding::Dictionary,
        values.len() as u32,
        column_type,
        Some(dictionary),
    )?;

    let code_of = |value: &Value| -> Result<u16> {
        let s = match value {
            Value::String(s) => s,
            other => bail!(DbError::Schema(format!(
                "dictionary encoding requires strings, found {}",
                other
            ))),
        };
        dictionary
            .iter()
            .position(|entry| entry == s)
            .map(|i| (i + 1) as u16)
            .ok_or_else(|| {
                eyre::Report::new(DbError::Corruption(format!(
                    "value '{}' missing from the dictionary",
                    s
                )))
            })
    };

    let bits = dictionary_code_bits(dictionary.len());
    let codes_per_word = (16 / bits).max(1) as usize;

    // Pack whole words; each word is one block item so words never split
    // across pages.
    let mut words: Vec<Vec<u8>> = Vec::new();
    for chunk in values.chunks(codes_per_word) {
        let mut word: u16 = 0;
        for (j, value) in chunk.iter().enumerate() {
            word |= code_of(value)? << (j as u32 * bits);
        }
        words.push(word.to_be_bytes().to_vec());
    }

    debug!(
        file = file.name(),
        entries = dictionary.len(),
        bits,
        "dictionary encoded"
    );
    write_blocks(service, file, words.into_iter())
}

/// One decoded block of column values, yielding values one at a time.
pub struct ColStoreBlock {
    values: std::vec::IntoIter<Value>,
}

impl ColStoreBlock {
    pub fn next_value(&mut self) -> Option<Value> {
        self.values.next()
    }
}

/// Streams one column's values in row order, page by page.
pub struct ColumnReader {
    service: Arc<StorageService>,
    file: Arc<DBFile>,
    column_type: ColumnType,
    encoding: ColStoreEncoding,
    value_count: u32,
    dictionary: Vec<String>,
    next_page: u32,
    rows_read: u32,
    block: Option<ColStoreBlock>,
}

impl ColumnReader {
    pub fn open(service: Arc<StorageService>, file: Arc<DBFile>) -> Result<Self> {
        let page0 = service.load_db_page(&file, 0, false)?;
        let encoding = ColStoreEncoding::from_id(page0.read_u8(OFFSET_ENCODING)?)?;
        let value_count = page0.read_u32(OFFSET_VALUE_COUNT)?;
        let base = SqlType::from_id(page0.read_u8(OFFSET_COLUMN_TYPE)?)?;
        let length = page0.read_u16(OFFSET_COLUMN_LENGTH)?;
        let column_type = ColumnType {
            base,
            length: if base.has_length() { Some(length) } else { None },
        };

        let dict_count = page0.read_u16(OFFSET_DICT_COUNT)?;
        let mut dictionary = Vec::with_capacity(dict_count as usize);
        let mut cursor = PageCursor::new(&page0, OFFSET_DICT_ENTRIES);
        for _ in 0..dict_count {
            dictionary.push(cursor.read_var_string255()?);
        }

        Ok(Self {
            service,
            file,
            column_type,
            encoding,
            value_count,
            dictionary,
            next_page: 1,
            rows_read: 0,
            block: None,
        })
    }

    pub fn value_count(&self) -> u32 {
        self.value_count
    }

    pub fn encoding(&self) -> ColStoreEncoding {
        self.encoding
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Restarts the stream at row 0.
    pub fn reset(&mut self) {
        self.next_page = 1;
        self.rows_read = 0;
        self.block = None;
    }

    /// The next value in row order, or `None` past the last row.
    pub fn next_value(&mut self) -> Result<Option<Value>> {
        loop {
            if self.rows_read == self.value_count {
                return Ok(None);
            }
            if let Some(block) = &mut self.block {
                if let Some(value) = block.next_value() {
                    self.rows_read += 1;
                    return Ok(Some(value));
                }
            }
            self.block = Some(self.read_block()?);
        }
    }

    fn read_block(&mut self) -> Result<ColStoreBlock> {
        let page = self
            .service
            .load_db_page(&self.file, self.next_page, false)?;
        self.next_page += 1;

        let mut cursor = PageCursor::new(&page, 0);
        let count = cursor.read_u16()? as usize;
        let mut values = Vec::new();

        match self.encoding {
            ColStoreEncoding::Uncompressed => {
                for _ in 0..count {
                    values.push(decode_col_value(&mut cursor, &self.column_type)?);
                }
            }
            ColStoreEncoding::RunLength => {
                for _ in 0..count {
                    let value = decode_col_value(&mut cursor, &self.column_type)?;
                    let start_row = cursor.read_u32()?;
                    let run_len = cursor.read_u32()?;
                    ensure!(
                        start_row == self.rows_read + values.len() as u32,
                        DbError::Corruption(format!(
                            "run starts at row {} but the stream is at row {}",
                            start_row,
                            self.rows_read + values.len() as u32
                        ))
                    );
                    for _ in 0..run_len {
                        values.push(value.clone());
                    }
                }
            }
            ColStoreEncoding::Dictionary => {
                let bits = dictionary_code_bits(self.dictionary.len());
                let codes_per_word = (16 / bits).max(1) as usize;
                let mask = if bits >= 16 { u16::MAX } else { (1u16 << bits) - 1 };

                let remaining = (self.value_count - self.rows_read) as usize - values.len();
                'words: for _ in 0..count {
                    let word = cursor.read_u16()?;
                    for j in 0..codes_per_word {
                        if values.len() == remaining {
                            break 'words;
                        }
                        let code = (word >> (j as u32 * bits)) & mask;
                        if code == 0 {
                            break;
                        }
                        let entry = self
                            .dictionary
                            .get(code as usize - 1)
                            .ok_or_else(|| {
                                DbError::Corruption(format!("dictionary code {} out of range", code))
                            })?;
                        values.push(Value::String(entry.clone()));
                    }
                }
            }
        }

        Ok(ColStoreBlock {
            values: values.into_iter(),
        })
    }
}
