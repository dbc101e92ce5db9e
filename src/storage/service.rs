//! # Storage Service
//!
//! Thin composition of the file manager and the buffer pool, and the only
//! storage surface the table managers, WAL and transaction manager use.
//! Open files are cached by logical name, so `"wal-00003.log"` or
//! `"Employee/Employee.tbl"` resolves to the same handle (and therefore the
//! same buffer-pool frames) everywhere.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::storage::buffer::BufferPool;
use crate::storage::file_manager::{DBFile, DBFileType, FileManager};
use crate::storage::page::DBPage;

pub struct StorageService {
    file_manager: Arc<FileManager>,
    buffer_pool: Arc<BufferPool>,
    open_files: Mutex<HashMap<String, Arc<DBFile>>>,
}

impl StorageService {
    pub fn new(file_manager: Arc<FileManager>, buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            file_manager,
            buffer_pool,
            open_files: Mutex::new(HashMap::new()),
        }
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn create_db_file(
        &self,
        name: &str,
        file_type: DBFileType,
        page_size: usize,
    ) -> Result<Arc<DBFile>> {
        let file = Arc::new(self.file_manager.create_db_file(name, file_type, page_size)?);
        self.open_files
            .lock()
            .insert(name.to_string(), Arc::clone(&file));
        Ok(file)
    }

    pub fn open_db_file(&self, name: &str) -> Result<Arc<DBFile>> {
        if let Some(file) = self.open_files.lock().get(name) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(
            self.file_manager
                .open_db_file(name)
                .wrap_err_with(|| format!("failed to open database file '{}'", name))?,
        );
        self.open_files
            .lock()
            .insert(name.to_string(), Arc::clone(&file));
        Ok(file)
    }

    /// Returns the cached handle if the file is open, without touching disk.
    pub fn file_if_open(&self, name: &str) -> Option<Arc<DBFile>> {
        self.open_files.lock().get(name).cloned()
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.file_manager.file_exists(name)
    }

    /// Flushes and evicts the file's pages and drops it from the name cache.
    pub fn close_db_file(&self, file: &Arc<DBFile>) -> Result<()> {
        self.buffer_pool.release_file(file)?;
        self.file_manager.sync_db_file(file)?;
        self.open_files.lock().remove(file.name());
        Ok(())
    }

    pub fn load_db_page(&self, file: &Arc<DBFile>, page_no: u32, create: bool) -> Result<DBPage> {
        self.buffer_pool.pin(file, page_no, create)
    }

    /// Writes the file's dirty pages in `range` (inclusive) back to disk.
    pub fn write_db_file(
        &self,
        file: &Arc<DBFile>,
        range: Option<(u32, u32)>,
        sync: bool,
    ) -> Result<()> {
        self.buffer_pool.flush_file(file, range, sync)
    }

    /// Writes every dirty page of every open file back to disk.
    pub fn write_all(&self, sync: bool) -> Result<()> {
        self.buffer_pool.flush_all(sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_POOL_BYTES;
    use tempfile::tempdir;

    fn service() -> (tempfile::TempDir, StorageService) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(Arc::clone(&fm), DEFAULT_BUFFER_POOL_BYTES));
        (dir, StorageService::new(fm, pool))
    }

    #[test]
    fn open_returns_the_cached_handle() {
        let (_dir, service) = service();
        let created = service
            .create_db_file("a/a.tbl", DBFileType::HeapDataFile, 512)
            .unwrap();
        let opened = service.open_db_file("a/a.tbl").unwrap();
        assert_eq!(created.file_id(), opened.file_id());
        assert!(service.file_if_open("a/a.tbl").is_some());
    }

    #[test]
    fn close_drops_the_handle_from_the_cache() {
        let (_dir, service) = service();
        let file = service
            .create_db_file("b.dat", DBFileType::TxnStateFile, 512)
            .unwrap();
        service.close_db_file(&file).unwrap();
        assert!(service.file_if_open("b.dat").is_none());

        // Reopening gets a fresh file id but the same contents.
        let reopened = service.open_db_file("b.dat").unwrap();
        assert_eq!(reopened.file_type(), DBFileType::TxnStateFile);
    }

    #[test]
    fn pages_written_through_the_service_persist() {
        let (_dir, service) = service();
        let file = service
            .create_db_file("c.tbl", DBFileType::HeapDataFile, 512)
            .unwrap();

        {
            let page = service.load_db_page(&file, 2, true).unwrap();
            page.write_u32(16, 1234).unwrap();
        }
        service.write_db_file(&file, None, true).unwrap();

        let page = service.load_db_page(&file, 2, false).unwrap();
        assert_eq!(page.read_u32(16).unwrap(), 1234);
    }
}
