//! # Leaf Pages
//!
//! Sorted serialized keys plus a next-leaf pointer chaining the leaf level
//! for range scans. Split helpers relocate whole entries between siblings
//! and report the key the parent should adopt as separator (the right
//! page's first key, per the usual B+-tree convention).

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::btree::{
    BTreePageType, OFFSET_ENTRY_COUNT, OFFSET_FIRST_LEAF_ENTRY, OFFSET_NEXT_LEAF, OFFSET_PAGE_TYPE,
};
use crate::error::DbError;
use crate::relations::{compare_tuples, Schema, TupleLiteral};
use crate::storage::DBPage;
use crate::tables::codec::{decode_tuple_with_size, encode_tuple};

/// Next-leaf value marking the end of the leaf chain.
pub const NO_NEXT_LEAF: u16 = 0;

pub struct LeafPage {
    page: DBPage,
    key_schema: Arc<Schema>,
    next_leaf: u16,
    entries: Vec<TupleLiteral>,
}

impl LeafPage {
    pub fn init_empty(page: DBPage, key_schema: Arc<Schema>) -> Result<Self> {
        page.write_u8(OFFSET_PAGE_TYPE, BTreePageType::Leaf as u8)?;
        page.write_u16(OFFSET_ENTRY_COUNT, 0)?;
        page.write_u16(OFFSET_NEXT_LEAF, NO_NEXT_LEAF)?;
        Self::load(page, key_schema)
    }

    pub fn load(page: DBPage, key_schema: Arc<Schema>) -> Result<Self> {
        let page_type = BTreePageType::from_id(page.read_u8(OFFSET_PAGE_TYPE)?)?;
        ensure!(
            page_type == BTreePageType::Leaf,
            DbError::Corruption(format!("page {} is not a leaf page", page.page_no()))
        );

        let count = page.read_u16(OFFSET_ENTRY_COUNT)?;
        let next_leaf = page.read_u16(OFFSET_NEXT_LEAF)?;

        let mut raw = vec![0u8; page.page_size() - OFFSET_FIRST_LEAF_ENTRY];
        page.read(OFFSET_FIRST_LEAF_ENTRY, &mut raw)?;

        let mut entries = Vec::with_capacity(count as usize);
        let mut pos = 0usize;
        for _ in 0..count {
            let (entry, size) = decode_tuple_with_size(&key_schema, &raw[pos..])?;
            entries.push(entry);
            pos += size;
        }

        Ok(Self {
            page,
            key_schema,
            next_leaf,
            entries,
        })
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, index: usize) -> &TupleLiteral {
        &self.entries[index]
    }

    pub fn next_leaf(&self) -> u16 {
        self.next_leaf
    }

    pub fn set_next_leaf(&mut self, next: u16) -> Result<()> {
        self.next_leaf = next;
        self.page.write_u16(OFFSET_NEXT_LEAF, next)
    }

    pub fn page_no(&self) -> u32 {
        self.page.page_no()
    }

    fn write_back(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        for entry in &self.entries {
            raw.extend_from_slice(&encode_tuple(&self.key_schema, entry)?);
        }
        ensure!(
            OFFSET_FIRST_LEAF_ENTRY + raw.len() <= self.page.page_size(),
            DbError::Execution(format!(
                "leaf page {} overflow: {} entry bytes",
                self.page.page_no(),
                raw.len()
            ))
        );

        self.page
            .write_u16(OFFSET_ENTRY_COUNT, self.entries.len() as u16)?;
        self.page.write_u16(OFFSET_NEXT_LEAF, self.next_leaf)?;
        self.page.write(OFFSET_FIRST_LEAF_ENTRY, &raw)
    }

    /// Inserts keeping entries sorted; duplicate keys are rejected (these
    /// pages back unique indexes).
    pub fn add_entry(&mut self, entry: TupleLiteral) -> Result<()> {
        let mut at = self.entries.len();
        for (i, existing) in self.entries.iter().enumerate() {
            match compare_tuples(existing, &entry)? {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => {
                    return Err(eyre::Report::new(DbError::Execution(
                        "duplicate key in unique index".into(),
                    )))
                }
                std::cmp::Ordering::Greater => {
                    at = i;
                    break;
                }
            }
        }
        self.entries.insert(at, entry);
        self.write_back()
    }

    /// Moves the first `count` entries to the end of the left sibling.
    /// Returns the separator the parent should use: this page's new first
    /// entry.
    pub fn move_entries_left(&mut self, sibling: &mut LeafPage, count: usize) -> Result<TupleLiteral> {
        ensure!(
            count >= 1 && count < self.entries.len(),
            DbError::InvalidArgument(format!(
                "cannot move {} of {} leaf entries",
                count,
                self.entries.len()
            ))
        );

        sibling.entries.extend(self.entries.drain(..count));
        sibling.write_back()?;
        self.write_back()?;
        Ok(self.entries[0].clone())
    }

    /// Moves the last `count` entries to the front of the right sibling.
    /// Returns the separator: the sibling's new first entry.
    pub fn move_entries_right(
        &mut self,
        sibling: &mut LeafPage,
        count: usize,
    ) -> Result<TupleLiteral> {
        ensure!(
            count >= 1 && count < self.entries.len(),
            DbError::InvalidArgument(format!(
                "cannot move {} of {} leaf entries",
                count,
                self.entries.len()
            ))
        );

        let split_at = self.entries.len() - count;
        let moved: Vec<TupleLiteral> = self.entries.drain(split_at..).collect();
        sibling.entries.splice(0..0, moved);

        // Keep the leaf chain intact across the split.
        if sibling.next_leaf == NO_NEXT_LEAF && self.next_leaf != sibling.page.page_no() as u16 {
            sibling.next_leaf = self.next_leaf;
        }
        self.next_leaf = sibling.page.page_no() as u16;

        sibling.write_back()?;
        self.write_back()?;
        Ok(sibling.entries[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_POOL_BYTES;
    use crate::relations::{ColumnInfo, ColumnType, SqlType, Tuple, Value};
    use crate::storage::{BufferPool, DBFileType, FileManager, StorageService};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Arc<StorageService>, Arc<Schema>) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(Arc::clone(&fm), DEFAULT_BUFFER_POOL_BYTES));
        let service = Arc::new(StorageService::new(fm, pool));
        let schema = Arc::new(
            Schema::with_columns(vec![ColumnInfo::new(
                "k",
                None,
                ColumnType::new(SqlType::Integer),
            )])
            .unwrap(),
        );
        (dir, service, schema)
    }

    fn page(service: &Arc<StorageService>, page_no: u32) -> DBPage {
        let file = match service.file_if_open("idx.tbl") {
            Some(f) => f,
            None => service
                .create_db_file("idx.tbl", DBFileType::BTreeIndexFile, 512)
                .unwrap(),
        };
        service.load_db_page(&file, page_no, true).unwrap()
    }

    fn key(v: i32) -> TupleLiteral {
        TupleLiteral::new(vec![Value::Integer(v)])
    }

    #[test]
    fn entries_insert_in_sorted_order() {
        let (_dir, service, schema) = setup();
        let mut leaf = LeafPage::init_empty(page(&service, 1), Arc::clone(&schema)).unwrap();

        for v in [30, 10, 20] {
            leaf.add_entry(key(v)).unwrap();
        }

        let reloaded = LeafPage::load(page(&service, 1), schema).unwrap();
        let values: Vec<_> = (0..reloaded.num_entries())
            .map(|i| reloaded.entry(i).value(0).unwrap())
            .collect();
        assert_eq!(
            values,
            vec![Value::Integer(10), Value::Integer(20), Value::Integer(30)]
        );
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let (_dir, service, schema) = setup();
        let mut leaf = LeafPage::init_empty(page(&service, 1), schema).unwrap();
        leaf.add_entry(key(5)).unwrap();
        assert!(leaf.add_entry(key(5)).is_err());
    }

    #[test]
    fn split_right_fixes_the_leaf_chain_and_separator() {
        let (_dir, service, schema) = setup();
        let mut left = LeafPage::init_empty(page(&service, 1), Arc::clone(&schema)).unwrap();
        for v in [10, 20, 30, 40] {
            left.add_entry(key(v)).unwrap();
        }
        let mut right = LeafPage::init_empty(page(&service, 2), Arc::clone(&schema)).unwrap();

        let separator = left.move_entries_right(&mut right, 2).unwrap();

        assert_eq!(separator.value(0).unwrap(), Value::Integer(30));
        assert_eq!(left.num_entries(), 2);
        assert_eq!(right.num_entries(), 2);
        assert_eq!(left.next_leaf(), 2);
    }

    #[test]
    fn split_left_reports_the_remaining_first_key() {
        let (_dir, service, schema) = setup();
        let mut source = LeafPage::init_empty(page(&service, 1), Arc::clone(&schema)).unwrap();
        for v in [10, 20, 30] {
            source.add_entry(key(v)).unwrap();
        }
        let mut sibling = LeafPage::init_empty(page(&service, 2), schema).unwrap();

        let separator = source.move_entries_left(&mut sibling, 1).unwrap();
        assert_eq!(separator.value(0).unwrap(), Value::Integer(20));
        assert_eq!(sibling.num_entries(), 1);
        assert_eq!(source.num_entries(), 2);
    }
}
