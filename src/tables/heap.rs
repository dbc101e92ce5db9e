//! # Heap Table Manager
//!
//! Variable-length tuples in slotted pages. Page 0 of a heap file holds the
//! schema header and table statistics; data pages start at page 1.
//!
//! ## Slotted page layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | numSlots:u16 | (offset:u16, len:u16) x numSlots | free ...  |
//! |                        ... space | tuple_k | ... | tuple_0  |
//! +-------------------------------------------------------------+
//! ```
//!
//! The slot directory grows from the page start, tuple bodies from the page
//! end. A slot with offset 0 is empty and may be reused. Deleting a tuple
//! compacts the data area so free space stays contiguous in the middle.
//!
//! A tuple id is `(pageNo, slot)`. Scans walk pages in order and slots
//! within each page; the page count comes from the persisted statistics so
//! pages still sitting only in the buffer pool are visible.
//!
//! Every mutation reports the dirtied pages to the transaction manager,
//! which logs the byte diffs before they can reach disk.

use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::DbError;
use crate::relations::{Schema, Tuple, TupleLiteral, Value};
use crate::storage::{DBFileType, DBPage, StorageService, PAGE0_DATA_OFFSET};
use crate::tables::codec::{decode_tuple, encode_tuple, read_table_schema, write_table_schema};
use crate::tables::{
    table_file_name, FilePointer, Insertable, RandomAccess, Scannable, TableInfo, TableStats,
};
use crate::transactions::{TransactionManager, TransactionState};

const OFFSET_NUM_SLOTS: usize = 0;
const SLOT_DIRECTORY_START: usize = 2;
const SLOT_ENTRY_SIZE: usize = 4;
const EMPTY_SLOT: u16 = 0;

fn slot_entry_offset(slot: u16) -> usize {
    SLOT_DIRECTORY_START + SLOT_ENTRY_SIZE * slot as usize
}

fn num_slots(page: &DBPage) -> Result<u16> {
    page.read_u16(OFFSET_NUM_SLOTS)
}

fn slot_entry(page: &DBPage, slot: u16) -> Result<(u16, u16)> {
    let offset = page.read_u16(slot_entry_offset(slot))?;
    let len = page.read_u16(slot_entry_offset(slot) + 2)?;
    Ok((offset, len))
}

fn set_slot_entry(page: &DBPage, slot: u16, offset: u16, len: u16) -> Result<()> {
    page.write_u16(slot_entry_offset(slot), offset)?;
    page.write_u16(slot_entry_offset(slot) + 2, len)
}

/// Start of the tuple-data area: the smallest live tuple offset, or the
/// page end when the page holds no tuples.
fn tuple_data_start(page: &DBPage) -> Result<usize> {
    let mut start = page.page_size();
    for slot in 0..num_slots(page)? {
        let (offset, _) = slot_entry(page, slot)?;
        if offset != EMPTY_SLOT {
            start = start.min(offset as usize);
        }
    }
    Ok(start)
}

fn free_space(page: &DBPage) -> Result<usize> {
    let directory_end = SLOT_DIRECTORY_START + SLOT_ENTRY_SIZE * num_slots(page)? as usize;
    Ok(tuple_data_start(page)?.saturating_sub(directory_end))
}

/// Tries to place `data` in this page, reusing an empty slot if one exists.
/// Returns the slot index, or `None` if the page lacks room.
fn insert_tuple_in_page(page: &DBPage, data: &[u8]) -> Result<Option<u16>> {
    let slots = num_slots(page)?;
    let reusable = {
        let mut found = None;
        for slot in 0..slots {
            if slot_entry(page, slot)?.0 == EMPTY_SLOT {
                found = Some(slot);
                break;
            }
        }
        found
    };

    let needed = data.len() + if reusable.is_none() { SLOT_ENTRY_SIZE } else { 0 };
    if free_space(page)? < needed {
        return Ok(None);
    }

    let offset = tuple_data_start(page)? - data.len();
    page.write(offset, data)?;

    let slot = match reusable {
        Some(slot) => slot,
        None => {
            page.write_u16(OFFSET_NUM_SLOTS, slots + 1)?;
            slots
        }
    };
    set_slot_entry(page, slot, offset as u16, data.len() as u16)?;
    Ok(Some(slot))
}

/// Frees the slot and compacts the data area so free space stays
/// contiguous.
fn delete_tuple_from_page(page: &DBPage, slot: u16) -> Result<()> {
    let slots = num_slots(page)?;
    ensure!(
        slot < slots,
        DbError::InvalidArgument(format!("slot {} out of range ({} slots)", slot, slots))
    );
    let (offset, len) = slot_entry(page, slot)?;
    ensure!(
        offset != EMPTY_SLOT,
        DbError::InvalidArgument(format!("slot {} is already empty", slot))
    );

    // Shift every tuple stored below this one up by `len`, then fix the
    // slots that pointed into the moved region.
    let data_start = tuple_data_start(page)?;
    let moved = offset as usize - data_start;
    if moved > 0 {
        let mut region = vec![0u8; moved];
        page.read(data_start, &mut region)?;
        page.write(data_start + len as usize, &region)?;
    }

    for other in 0..slots {
        let (other_offset, other_len) = slot_entry(page, other)?;
        if other_offset != EMPTY_SLOT && other_offset < offset {
            set_slot_entry(page, other, other_offset + len, other_len)?;
        }
    }

    set_slot_entry(page, slot, EMPTY_SLOT, 0)?;

    // Trim trailing empty slots so the directory can shrink.
    let mut slots = slots;
    while slots > 0 && slot_entry(page, slots - 1)?.0 == EMPTY_SLOT {
        slots -= 1;
    }
    page.write_u16(OFFSET_NUM_SLOTS, slots)
}

/// A tuple living in a slot of a pinned heap page. The page stays pinned
/// for the life of the view.
#[derive(Debug)]
pub struct HeapPageTuple {
    #[allow(dead_code)]
    page: DBPage,
    fp: FilePointer,
    values: TupleLiteral,
}

impl HeapPageTuple {
    pub fn file_pointer(&self) -> FilePointer {
        self.fp
    }
}

impl Tuple for HeapPageTuple {
    fn arity(&self) -> usize {
        self.values.arity()
    }

    fn value(&self, index: usize) -> Result<Value> {
        self.values.value(index)
    }
}

pub struct HeapTableManager {
    service: Arc<StorageService>,
    txn_mgr: Option<Arc<TransactionManager>>,
}

impl HeapTableManager {
    pub fn new(service: Arc<StorageService>, txn_mgr: Option<Arc<TransactionManager>>) -> Self {
        Self { service, txn_mgr }
    }

    fn log_update(
        &self,
        txn: Option<&mut TransactionState>,
        page: &DBPage,
    ) -> Result<()> {
        match (&self.txn_mgr, txn) {
            (Some(mgr), Some(state)) => mgr.record_page_update(state, page),
            _ => Ok(()),
        }
    }

    /// Creates the table file and writes the schema header.
    pub fn create_table(
        &self,
        table_name: &str,
        schema: Schema,
        page_size: usize,
        txn: Option<&mut TransactionState>,
    ) -> Result<Arc<TableInfo>> {
        let schema = schema.with_table_name(table_name);
        let file = self.service.create_db_file(
            &table_file_name(table_name),
            DBFileType::HeapDataFile,
            page_size,
        )?;

        let page0 = self.service.load_db_page(&file, 0, false)?;
        let stats_offset = write_table_schema(&page0, PAGE0_DATA_OFFSET, &schema)?;
        page0.write_u32(stats_offset, 0)?; // tuple count
        page0.write_u32(stats_offset + 4, 0)?; // data page count
        self.log_update(txn, &page0)?;

        debug!(table_name, columns = schema.num_columns(), "created heap table");

        Ok(Arc::new(TableInfo {
            table_name: table_name.to_string(),
            db_file: file,
            schema: Arc::new(schema),
            stats: Mutex::new(TableStats::default()),
            stats_offset,
        }))
    }

    /// Opens an existing heap table, decoding its schema header.
    pub fn open_table(&self, table_name: &str) -> Result<Arc<TableInfo>> {
        let file = self.service.open_db_file(&table_file_name(table_name))?;
        ensure!(
            file.file_type() == DBFileType::HeapDataFile,
            DbError::Schema(format!("table '{}' is not a heap table", table_name))
        );

        let page0 = self.service.load_db_page(&file, 0, false)?;
        let (schema, stats_offset) = read_table_schema(&page0, PAGE0_DATA_OFFSET, table_name)
            .wrap_err_with(|| format!("failed to decode schema of table '{}'", table_name))?;
        let stats = TableStats {
            num_tuples: page0.read_u32(stats_offset)?,
            num_data_pages: page0.read_u32(stats_offset + 4)?,
        };

        Ok(Arc::new(TableInfo {
            table_name: table_name.to_string(),
            db_file: file,
            schema: Arc::new(schema),
            stats: Mutex::new(stats),
            stats_offset,
        }))
    }

    fn store_stats(
        &self,
        table: &TableInfo,
        txn: Option<&mut TransactionState>,
        stats: TableStats,
    ) -> Result<()> {
        let page0 = self.service.load_db_page(&table.db_file, 0, false)?;
        page0.write_u32(table.stats_offset, stats.num_tuples)?;
        page0.write_u32(table.stats_offset + 4, stats.num_data_pages)?;
        self.log_update(txn, &page0)?;
        *table.stats.lock() = stats;
        Ok(())
    }

    fn load_tuple(&self, table: &TableInfo, fp: FilePointer) -> Result<Option<HeapPageTuple>> {
        let page = self.service.load_db_page(&table.db_file, fp.page_no, false)?;
        if fp.slot >= num_slots(&page)? {
            return Ok(None);
        }
        let (offset, len) = slot_entry(&page, fp.slot)?;
        if offset == EMPTY_SLOT {
            return Ok(None);
        }

        let mut bytes = vec![0u8; len as usize];
        page.read(offset as usize, &mut bytes)?;
        let values = decode_tuple(&table.schema, &bytes)?;
        Ok(Some(HeapPageTuple { page, fp, values }))
    }
}

impl Insertable for HeapTableManager {
    fn add_tuple(
        &self,
        table: &TableInfo,
        mut txn: Option<&mut TransactionState>,
        tuple: &dyn Tuple,
    ) -> Result<FilePointer> {
        let data = encode_tuple(&table.schema, tuple)?;
        let page_size = table.db_file.page_size();
        ensure!(
            data.len() + SLOT_DIRECTORY_START + SLOT_ENTRY_SIZE <= page_size,
            DbError::Execution(format!(
                "tuple of {} bytes cannot fit a {}-byte page",
                data.len(),
                page_size
            ))
        );

        let mut stats = table.stats_snapshot();

        // First data page with room wins; otherwise append a fresh page.
        for page_no in 1..=stats.num_data_pages {
            let page = self.service.load_db_page(&table.db_file, page_no, false)?;
            if let Some(slot) = insert_tuple_in_page(&page, &data)? {
                self.log_update(txn.as_deref_mut(), &page)?;
                stats.num_tuples += 1;
                self.store_stats(table, txn, stats)?;
                return Ok(FilePointer::new(page_no, slot));
            }
        }

        let page_no = stats.num_data_pages + 1;
        let page = self.service.load_db_page(&table.db_file, page_no, true)?;
        let slot = insert_tuple_in_page(&page, &data)?.ok_or_else(|| {
            DbError::Execution(format!("fresh page {} rejected a tuple", page_no))
        })?;
        self.log_update(txn.as_deref_mut(), &page)?;

        stats.num_tuples += 1;
        stats.num_data_pages = page_no;
        self.store_stats(table, txn, stats)?;

        debug!(
            table = %table.table_name,
            page_no, slot, "tuple added on a new page"
        );
        Ok(FilePointer::new(page_no, slot))
    }

    fn delete_tuple(
        &self,
        table: &TableInfo,
        mut txn: Option<&mut TransactionState>,
        fp: FilePointer,
    ) -> Result<()> {
        let stats = table.stats_snapshot();
        ensure!(
            (1..=stats.num_data_pages).contains(&fp.page_no),
            DbError::InvalidArgument(format!("{} is not a data page of '{}'", fp, table.table_name))
        );

        let page = self.service.load_db_page(&table.db_file, fp.page_no, false)?;
        delete_tuple_from_page(&page, fp.slot)?;
        self.log_update(txn.as_deref_mut(), &page)?;

        let mut stats = stats;
        stats.num_tuples = stats.num_tuples.saturating_sub(1);
        self.store_stats(table, txn, stats)
    }
}

impl RandomAccess for HeapTableManager {
    fn get_tuple(&self, table: &TableInfo, fp: FilePointer) -> Result<HeapPageTuple> {
        let stats = table.stats_snapshot();
        ensure!(
            (1..=stats.num_data_pages).contains(&fp.page_no),
            DbError::InvalidArgument(format!("{} is not a data page of '{}'", fp, table.table_name))
        );
        match self.load_tuple(table, fp)? {
            Some(tuple) => Ok(tuple),
            None => bail!(DbError::InvalidArgument(format!(
                "{} does not reference a live tuple",
                fp
            ))),
        }
    }
}

impl Scannable for HeapTableManager {
    fn get_first_tuple(&self, table: &TableInfo) -> Result<Option<HeapPageTuple>> {
        self.get_next_tuple(table, FilePointer::new(1, 0).backed_up())
    }

    fn get_next_tuple(
        &self,
        table: &TableInfo,
        current: FilePointer,
    ) -> Result<Option<HeapPageTuple>> {
        let stats = table.stats_snapshot();
        let mut page_no = current.page_no.max(1);
        let mut slot = current.slot.wrapping_add(1);

        while page_no <= stats.num_data_pages {
            let slots = {
                let page = self.service.load_db_page(&table.db_file, page_no, false)?;
                num_slots(&page)?
            };
            while slot < slots {
                if let Some(tuple) = self.load_tuple(table, FilePointer::new(page_no, slot))? {
                    return Ok(Some(tuple));
                }
                slot += 1;
            }
            page_no += 1;
            slot = 0;
        }
        Ok(None)
    }
}

impl FilePointer {
    /// Pointer just before the first slot of its page, so `get_next_tuple`
    /// starts the scan at slot 0.
    fn backed_up(self) -> Self {
        FilePointer::new(self.page_no, u16::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_POOL_BYTES;
    use crate::relations::{ColumnInfo, ColumnType, SqlType};
    use crate::storage::{BufferPool, FileManager};
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, HeapTableManager) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(Arc::clone(&fm), DEFAULT_BUFFER_POOL_BYTES));
        let service = Arc::new(StorageService::new(fm, pool));
        (dir, HeapTableManager::new(service, None))
    }

    fn two_int_schema() -> Schema {
        Schema::with_columns(vec![
            ColumnInfo::new("a", None, ColumnType::new(SqlType::Integer)),
            ColumnInfo::new("b", None, ColumnType::new(SqlType::Integer)),
        ])
        .unwrap()
    }

    fn row(a: i32, b: Option<i32>) -> TupleLiteral {
        TupleLiteral::new(vec![
            Value::Integer(a),
            b.map(Value::Integer).unwrap_or(Value::Null),
        ])
    }

    #[test]
    fn insert_then_scan_returns_all_rows() {
        let (_dir, mgr) = manager();
        let table = mgr.create_table("t", two_int_schema(), 512, None).unwrap();

        for (a, b) in [(0, None), (1, Some(10)), (2, Some(20))] {
            mgr.add_tuple(&table, None, &row(a, b)).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = mgr.get_first_tuple(&table).unwrap();
        while let Some(tuple) = cursor {
            seen.push((tuple.value(0).unwrap(), tuple.value(1).unwrap()));
            cursor = mgr.get_next_tuple(&table, tuple.file_pointer()).unwrap();
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, Value::Integer(0));
        assert_eq!(seen[0].1, Value::Null);
        assert_eq!(table.stats_snapshot().num_tuples, 3);
    }

    #[test]
    fn random_access_by_file_pointer() {
        let (_dir, mgr) = manager();
        let table = mgr.create_table("t", two_int_schema(), 512, None).unwrap();

        let fp0 = mgr.add_tuple(&table, None, &row(1, Some(11))).unwrap();
        let fp1 = mgr.add_tuple(&table, None, &row(2, Some(22))).unwrap();

        assert_eq!(
            mgr.get_tuple(&table, fp1).unwrap().value(1).unwrap(),
            Value::Integer(22)
        );
        assert_eq!(
            mgr.get_tuple(&table, fp0).unwrap().value(0).unwrap(),
            Value::Integer(1)
        );
        assert!(mgr.get_tuple(&table, FilePointer::new(99, 0)).is_err());
    }

    #[test]
    fn delete_compacts_and_scan_skips_the_hole() {
        let (_dir, mgr) = manager();
        let table = mgr.create_table("t", two_int_schema(), 512, None).unwrap();

        let _fp0 = mgr.add_tuple(&table, None, &row(1, Some(11))).unwrap();
        let fp1 = mgr.add_tuple(&table, None, &row(2, Some(22))).unwrap();
        let fp2 = mgr.add_tuple(&table, None, &row(3, Some(33))).unwrap();

        mgr.delete_tuple(&table, None, fp1).unwrap();

        let mut values = Vec::new();
        let mut cursor = mgr.get_first_tuple(&table).unwrap();
        while let Some(tuple) = cursor {
            values.push(tuple.value(0).unwrap());
            cursor = mgr.get_next_tuple(&table, tuple.file_pointer()).unwrap();
        }
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(3)]);

        // The surviving later tuple is still readable after compaction.
        assert_eq!(
            mgr.get_tuple(&table, fp2).unwrap().value(1).unwrap(),
            Value::Integer(33)
        );
        assert_eq!(table.stats_snapshot().num_tuples, 2);

        // Deleting the same slot twice is an error.
        assert!(mgr.delete_tuple(&table, None, fp1).is_err());
    }

    #[test]
    fn inserts_overflow_to_new_pages() {
        let (_dir, mgr) = manager();
        let table = mgr.create_table("t", two_int_schema(), 512, None).unwrap();

        for i in 0..100 {
            mgr.add_tuple(&table, None, &row(i, Some(i))).unwrap();
        }

        let stats = table.stats_snapshot();
        assert_eq!(stats.num_tuples, 100);
        assert!(stats.num_data_pages > 1);

        let mut count = 0;
        let mut cursor = mgr.get_first_tuple(&table).unwrap();
        while let Some(tuple) = cursor {
            count += 1;
            cursor = mgr.get_next_tuple(&table, tuple.file_pointer()).unwrap();
        }
        assert_eq!(count, 100);
    }

    #[test]
    fn freed_slots_are_reused() {
        let (_dir, mgr) = manager();
        let table = mgr.create_table("t", two_int_schema(), 512, None).unwrap();

        let _a = mgr.add_tuple(&table, None, &row(1, None)).unwrap();
        let b = mgr.add_tuple(&table, None, &row(2, None)).unwrap();
        let _c = mgr.add_tuple(&table, None, &row(3, None)).unwrap();

        mgr.delete_tuple(&table, None, b).unwrap();
        let d = mgr.add_tuple(&table, None, &row(4, None)).unwrap();
        assert_eq!(d, b, "hole in the slot directory should be reused");
    }

    #[test]
    fn schema_survives_reopen() {
        let (_dir, mgr) = manager();
        {
            let table = mgr.create_table("emp", two_int_schema(), 512, None).unwrap();
            mgr.add_tuple(&table, None, &row(5, Some(50))).unwrap();
            mgr.service.write_all(true).unwrap();
        }

        let table = mgr.open_table("emp").unwrap();
        assert_eq!(table.schema.num_columns(), 2);
        assert_eq!(table.stats_snapshot().num_tuples, 1);
        let first = mgr.get_first_tuple(&table).unwrap().unwrap();
        assert_eq!(first.value(0).unwrap(), Value::Integer(5));
    }
}
