//! # Table Managers
//!
//! Storage-format-specific managers sit behind capability traits instead of
//! one wide interface, so a table kind only advertises what it can do:
//!
//! - [`Scannable`] — full scans in storage order
//! - [`RandomAccess`] — fetch by tuple id (`(pageNo, slot)`)
//! - [`Insertable`] — insert and delete
//!
//! Heap tables implement all three. Column-store tables are scan-only
//! through their block readers; the planner checks capabilities before
//! emitting plans that need more.

pub mod codec;
pub mod colstore;
pub mod heap;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::relations::Schema;
use crate::storage::DBFile;
use crate::transactions::TransactionState;

pub use heap::{HeapPageTuple, HeapTableManager};

/// Identity of a tuple inside a table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilePointer {
    pub page_no: u32,
    pub slot: u16,
}

impl FilePointer {
    pub fn new(page_no: u32, slot: u16) -> Self {
        Self { page_no, slot }
    }
}

impl std::fmt::Display for FilePointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FP[{}:{}]", self.page_no, self.slot)
    }
}

/// Coarse statistics persisted in the table header, for cost estimation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableStats {
    pub num_tuples: u32,
    pub num_data_pages: u32,
}

/// An open table: name, backing file, schema, statistics.
#[derive(Debug)]
pub struct TableInfo {
    pub table_name: String,
    pub db_file: Arc<DBFile>,
    pub schema: Arc<Schema>,
    pub stats: Mutex<TableStats>,
    /// Byte offset of the persisted stats on the header page (right after
    /// the schema and constraints, so it depends on the schema size).
    pub stats_offset: usize,
}

impl TableInfo {
    pub fn stats_snapshot(&self) -> TableStats {
        *self.stats.lock()
    }
}

/// Full-scan access in storage order.
pub trait Scannable {
    fn get_first_tuple(&self, table: &TableInfo) -> eyre::Result<Option<HeapPageTuple>>;
    fn get_next_tuple(
        &self,
        table: &TableInfo,
        current: FilePointer,
    ) -> eyre::Result<Option<HeapPageTuple>>;
}

/// Fetch by tuple id.
pub trait RandomAccess {
    fn get_tuple(&self, table: &TableInfo, fp: FilePointer) -> eyre::Result<HeapPageTuple>;
}

/// Mutation: insert and delete.
pub trait Insertable {
    fn add_tuple(
        &self,
        table: &TableInfo,
        txn: Option<&mut TransactionState>,
        tuple: &dyn crate::relations::Tuple,
    ) -> eyre::Result<FilePointer>;

    fn delete_tuple(
        &self,
        table: &TableInfo,
        txn: Option<&mut TransactionState>,
        fp: FilePointer,
    ) -> eyre::Result<()>;
}

/// Path of a table's main file under the base directory.
pub fn table_file_name(table_name: &str) -> String {
    format!("{}/{}.tbl", table_name, table_name)
}

/// Path of one column's data file for a column-store table.
pub fn column_file_name(table_name: &str, column_name: &str) -> String {
    format!("{}/{}.{}.tbl", table_name, table_name, column_name)
}
