//! # Inner Pages
//!
//! Wrapper over a pinned inner page. The page contents are cached in the
//! wrapper on load; mutations rewrite the page wholesale, which keeps the
//! interleaved pointer/key layout simple to reason about.

use std::sync::Arc;

use eyre::{ensure, Result};

use crate::btree::{BTreePageType, OFFSET_ENTRY_COUNT, OFFSET_FIRST_POINTER, OFFSET_PAGE_TYPE};
use crate::error::DbError;
use crate::relations::{Schema, TupleLiteral};
use crate::storage::DBPage;
use crate::tables::codec::{decode_tuple_with_size, encode_tuple};

pub struct InnerPage {
    page: DBPage,
    key_schema: Arc<Schema>,
    pointers: Vec<u16>,
    keys: Vec<TupleLiteral>,
}

impl InnerPage {
    /// Initializes an empty inner page.
    pub fn init_empty(page: DBPage, key_schema: Arc<Schema>) -> Result<Self> {
        page.write_u8(OFFSET_PAGE_TYPE, BTreePageType::Inner as u8)?;
        page.write_u16(OFFSET_ENTRY_COUNT, 0)?;
        Self::load(page, key_schema)
    }

    /// Initializes an inner page holding `[ptr0, key0, ptr1]`; used when a
    /// split grows the tree by one level.
    pub fn init_root(
        page: DBPage,
        key_schema: Arc<Schema>,
        ptr0: u16,
        key0: TupleLiteral,
        ptr1: u16,
    ) -> Result<Self> {
        page.write_u8(OFFSET_PAGE_TYPE, BTreePageType::Inner as u8)?;
        let mut inner = Self {
            page,
            key_schema,
            pointers: vec![ptr0, ptr1],
            keys: vec![key0],
        };
        inner.write_back()?;
        Ok(inner)
    }

    /// Loads and caches the contents of an existing inner page.
    pub fn load(page: DBPage, key_schema: Arc<Schema>) -> Result<Self> {
        let page_type = BTreePageType::from_id(page.read_u8(OFFSET_PAGE_TYPE)?)?;
        ensure!(
            page_type == BTreePageType::Inner,
            DbError::Corruption(format!("page {} is not an inner page", page.page_no()))
        );

        let num_pointers = page.read_u16(OFFSET_ENTRY_COUNT)?;
        let mut pointers = Vec::with_capacity(num_pointers as usize);
        let mut keys = Vec::with_capacity(num_pointers.saturating_sub(1) as usize);

        let mut raw = vec![0u8; page.page_size() - OFFSET_FIRST_POINTER];
        page.read(OFFSET_FIRST_POINTER, &mut raw)?;

        let mut pos = 0usize;
        for i in 0..num_pointers {
            pointers.push(u16::from_be_bytes(raw[pos..pos + 2].try_into().unwrap()));
            pos += 2;
            if i + 1 < num_pointers {
                let (key, size) = decode_tuple_with_size(&key_schema, &raw[pos..])?;
                keys.push(key);
                pos += size;
            }
        }

        Ok(Self {
            page,
            key_schema,
            pointers,
            keys,
        })
    }

    pub fn num_pointers(&self) -> usize {
        self.pointers.len()
    }

    pub fn pointer(&self, index: usize) -> u16 {
        self.pointers[index]
    }

    pub fn key(&self, index: usize) -> &TupleLiteral {
        &self.keys[index]
    }

    pub fn page_no(&self) -> u32 {
        self.page.page_no()
    }

    fn write_back(&mut self) -> Result<()> {
        debug_assert!(
            self.pointers.is_empty() || self.pointers.len() == self.keys.len() + 1,
            "inner page must hold one more pointer than keys"
        );

        let mut raw = Vec::new();
        for (i, ptr) in self.pointers.iter().enumerate() {
            raw.extend_from_slice(&ptr.to_be_bytes());
            if i < self.keys.len() {
                raw.extend_from_slice(&encode_tuple(&self.key_schema, &self.keys[i])?);
            }
        }

        ensure!(
            OFFSET_FIRST_POINTER + raw.len() <= self.page.page_size(),
            DbError::Execution(format!(
                "inner page {} overflow: {} entry bytes",
                self.page.page_no(),
                raw.len()
            ))
        );

        self.page.write_u16(OFFSET_ENTRY_COUNT, self.pointers.len() as u16)?;
        self.page.write(OFFSET_FIRST_POINTER, &raw)
    }

    /// Moves the leftmost `count` pointers (and the keys between them) to
    /// the end of `sibling`. `parent_key` — the key separating the two
    /// pages in their parent — lands between the sibling's old contents and
    /// the moved run; it may be `None` only when the sibling starts empty.
    /// Returns the new separator: the key just past the moved run, which
    /// is removed from this page.
    pub fn move_pointers_left(
        &mut self,
        sibling: &mut InnerPage,
        count: usize,
        parent_key: Option<TupleLiteral>,
    ) -> Result<TupleLiteral> {
        ensure!(
            count >= 1 && count < self.pointers.len(),
            DbError::InvalidArgument(format!(
                "cannot move {} of {} pointers",
                count,
                self.pointers.len()
            ))
        );

        if sibling.pointers.is_empty() {
            ensure!(
                parent_key.is_none(),
                DbError::InvalidArgument("empty sibling cannot receive a parent key".into())
            );
        } else {
            let parent_key = parent_key.ok_or_else(|| {
                DbError::InvalidArgument("non-empty sibling requires the parent key".into())
            })?;
            sibling.keys.push(parent_key);
        }

        sibling.pointers.extend(self.pointers.drain(..count));
        sibling.keys.extend(self.keys.drain(..count - 1));

        // The key just past the moved run becomes the separator.
        let separator = self.keys.remove(0);

        sibling.write_back()?;
        self.write_back()?;
        Ok(separator)
    }

    /// Mirror of [`move_pointers_left`]: moves the rightmost `count`
    /// pointers to the front of `sibling`, returns the key just before the
    /// moved run.
    pub fn move_pointers_right(
        &mut self,
        sibling: &mut InnerPage,
        count: usize,
        parent_key: Option<TupleLiteral>,
    ) -> Result<TupleLiteral> {
        ensure!(
            count >= 1 && count < self.pointers.len(),
            DbError::InvalidArgument(format!(
                "cannot move {} of {} pointers",
                count,
                self.pointers.len()
            ))
        );

        if sibling.pointers.is_empty() {
            ensure!(
                parent_key.is_none(),
                DbError::InvalidArgument("empty sibling cannot receive a parent key".into())
            );
        } else {
            let parent_key = parent_key.ok_or_else(|| {
                DbError::InvalidArgument("non-empty sibling requires the parent key".into())
            })?;
            sibling.keys.insert(0, parent_key);
        }

        let first_moved_ptr = self.pointers.len() - count;
        let moved_pointers: Vec<u16> = self.pointers.drain(first_moved_ptr..).collect();
        let first_moved_key = self.keys.len() - (count - 1);
        let moved_keys: Vec<TupleLiteral> = self.keys.drain(first_moved_key..).collect();

        sibling.pointers.splice(0..0, moved_pointers);
        sibling.keys.splice(0..0, moved_keys);

        let separator = self.keys.pop().ok_or_else(|| {
            DbError::InvalidArgument("cannot split a page down to zero keys".into())
        })?;

        sibling.write_back()?;
        self.write_back()?;
        Ok(separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_POOL_BYTES;
    use crate::relations::{compare_values, ColumnInfo, ColumnType, SqlType, Tuple, Value};
    use std::cmp::Ordering;
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

    fn key(v: i32) -> TupleLiteral {
        TupleLiteral::new(vec![Value::Integer(v)])
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

    /// Builds an inner page [p10 k1 p20 k2 p30 k3 p40].
    fn four_pointer_page(service: &Arc<StorageService>, schema: &Arc<Schema>) -> InnerPage {
        let mut inner =
            InnerPage::init_root(page(service, 1), Arc::clone(schema), 10, key(1), 20).unwrap();
        inner.pointers.extend([30, 40]);
        inner.keys.extend([key(2), key(3)]);
        inner.write_back().unwrap();
        inner
    }

    #[test]
    fn root_init_round_trips_through_the_page() {
        let (_dir, service, schema) = setup();
        InnerPage::init_root(page(&service, 1), Arc::clone(&schema), 7, key(42), 9).unwrap();

        let loaded = InnerPage::load(page(&service, 1), schema).unwrap();
        assert_eq!(loaded.num_pointers(), 2);
        assert_eq!(loaded.pointer(0), 7);
        assert_eq!(loaded.pointer(1), 9);
        assert_eq!(loaded.key(0).value(0).unwrap(), Value::Integer(42));
    }

    #[test]
    fn move_left_into_empty_sibling_promotes_the_boundary_key() {
        let (_dir, service, schema) = setup();
        let mut source = four_pointer_page(&service, &schema);
        let mut sibling =
            InnerPage::init_empty(page(&service, 2), Arc::clone(&schema)).unwrap();

        let separator = source.move_pointers_left(&mut sibling, 2, None).unwrap();

        // Sibling took [p10 k1 p20]; separator is k2; source keeps [p30 k3 p40].
        assert_eq!(separator.value(0).unwrap(), Value::Integer(2));
        assert_eq!(sibling.num_pointers(), 2);
        assert_eq!(sibling.pointer(1), 20);
        assert_eq!(source.num_pointers(), 2);
        assert_eq!(source.pointer(0), 30);
        assert_eq!(source.key(0).value(0).unwrap(), Value::Integer(3));

        // The on-page bytes agree with the cached view.
        let reloaded = InnerPage::load(page(&service, 2), schema).unwrap();
        assert_eq!(reloaded.num_pointers(), 2);
        assert_eq!(reloaded.key(0).value(0).unwrap(), Value::Integer(1));
    }

    #[test]
    fn move_right_into_populated_sibling_requires_the_parent_key() {
        let (_dir, service, schema) = setup();
        let mut source = four_pointer_page(&service, &schema);
        let mut sibling =
            InnerPage::init_root(page(&service, 2), Arc::clone(&schema), 50, key(9), 60).unwrap();

        assert!(source.move_pointers_right(&mut sibling, 1, None).is_err());

        let separator = source
            .move_pointers_right(&mut sibling, 1, Some(key(5)))
            .unwrap();

        // p40 moved to the sibling front with parent key 5 after it;
        // separator is k3.
        assert_eq!(separator.value(0).unwrap(), Value::Integer(3));
        assert_eq!(sibling.num_pointers(), 3);
        assert_eq!(sibling.pointer(0), 40);
        assert_eq!(sibling.key(0).value(0).unwrap(), Value::Integer(5));
        assert_eq!(source.num_pointers(), 3);
    }

    #[test]
    fn keys_stay_sorted_between_sibling_and_separator() {
        let (_dir, service, schema) = setup();
        let mut source = four_pointer_page(&service, &schema);
        let mut sibling = InnerPage::init_empty(page(&service, 2), Arc::clone(&schema)).unwrap();

        let separator = source.move_pointers_left(&mut sibling, 2, None).unwrap();

        // sibling keys < separator < source keys
        for i in 0..sibling.keys.len() {
            assert_eq!(
                compare_values(&sibling.key(i).value(0).unwrap(), &separator.value(0).unwrap()),
                Some(Ordering::Less)
            );
        }
        for i in 0..source.keys.len() {
            assert_eq!(
                compare_values(&separator.value(0).unwrap(), &source.key(i).value(0).unwrap()),
                Some(Ordering::Less)
            );
        }
    }
}
