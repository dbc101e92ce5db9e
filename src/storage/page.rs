//! # Pinned Page Handles
//!
//! A [`DBPage`] is a pinned view of one page frame owned by the buffer pool.
//! The handle is RAII: cloning it pins the frame again, dropping it unpins.
//! A frame is only a candidate for eviction once every handle is gone.
//!
//! Alongside the current bytes, each frame keeps a snapshot of the page as
//! it was when it entered the pool (`old_data`). The write-ahead log diffs
//! the two to build UPDATE_PAGE records; after logging, the transaction
//! manager calls [`DBPage::sync_old_data`] so the next diff starts from the
//! logged state.
//!
//! All multi-byte accessors are big-endian, matching the on-disk formats.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::Mutex;

use crate::error::DbError;
use crate::storage::file_manager::DBFile;
use crate::wal::LogSequenceNumber;

/// Buffer-pool frame identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub file_id: u32,
    pub page_no: u32,
}

impl PageKey {
    pub fn new(file_id: u32, page_no: u32) -> Self {
        Self { file_id, page_no }
    }
}

#[derive(Debug)]
pub(crate) struct FrameData {
    pub data: Box<[u8]>,
    pub old_data: Box<[u8]>,
    pub dirty: bool,
    pub page_lsn: Option<LogSequenceNumber>,
}

/// One resident page. Owned by the buffer pool, shared out as [`DBPage`]
/// handles.
#[derive(Debug)]
pub struct PageFrame {
    key: PageKey,
    file: Arc<DBFile>,
    pin_count: AtomicU32,
    /// Access stamp for approximate-LRU eviction; refreshed on every pin.
    stamp: AtomicU64,
    pub(crate) inner: Mutex<FrameData>,
}

impl PageFrame {
    pub(crate) fn new(key: PageKey, file: Arc<DBFile>, data: Box<[u8]>) -> Self {
        let old_data = data.clone();
        Self {
            key,
            file,
            pin_count: AtomicU32::new(0),
            stamp: AtomicU64::new(0),
            inner: Mutex::new(FrameData {
                data,
                old_data,
                dirty: false,
                page_lsn: None,
            }),
        }
    }

    pub(crate) fn key(&self) -> PageKey {
        self.key
    }

    pub(crate) fn file(&self) -> &Arc<DBFile> {
        &self.file
    }

    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin of an unpinned page");
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    pub(crate) fn touch(&self, stamp: u64) {
        self.stamp.store(stamp, Ordering::Release);
    }

    pub(crate) fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }
}

/// A pinned page. See the module docs for the pin/snapshot protocol.
#[derive(Debug)]
pub struct DBPage {
    frame: Arc<PageFrame>,
}

impl DBPage {
    pub(crate) fn from_frame(frame: Arc<PageFrame>) -> Self {
        frame.pin();
        Self { frame }
    }

    pub fn page_no(&self) -> u32 {
        self.frame.key().page_no
    }

    pub fn file(&self) -> &Arc<DBFile> {
        self.frame.file()
    }

    pub fn page_size(&self) -> usize {
        self.frame.file().page_size()
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.inner.lock().dirty
    }

    pub fn page_lsn(&self) -> Option<LogSequenceNumber> {
        self.frame.inner.lock().page_lsn
    }

    /// Records the LSN of the most recent WAL record describing this page.
    pub fn set_page_lsn(&self, lsn: LogSequenceNumber) {
        self.frame.inner.lock().page_lsn = Some(lsn);
    }

    /// Refreshes the diff snapshot to the current contents. Called after the
    /// page's changes have been written to the WAL.
    pub fn sync_old_data(&self) {
        let mut inner = self.frame.inner.lock();
        let data = inner.data.clone();
        inner.old_data = data;
    }

    /// Runs `f` over `(old_data, data)` under the frame lock. Used by the
    /// WAL diff writer.
    pub fn with_contents<R>(&self, f: impl FnOnce(&[u8], &[u8]) -> R) -> R {
        let inner = self.frame.inner.lock();
        f(&inner.old_data, &inner.data)
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        ensure!(
            offset + len <= self.page_size(),
            DbError::InvalidArgument(format!(
                "range [{}, {}) exceeds {}-byte page",
                offset,
                offset + len,
                self.page_size()
            ))
        );
        Ok(())
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        let inner = self.frame.inner.lock();
        buf.copy_from_slice(&inner.data[offset..offset + buf.len()]);
        Ok(())
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        let mut inner = self.frame.inner.lock();
        inner.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        inner.dirty = true;
        Ok(())
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read(offset, &mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read(offset, &mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read(offset, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read(offset, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    pub fn write_u8(&self, offset: usize, value: u8) -> Result<()> {
        self.write(offset, &[value])
    }

    pub fn write_u16(&self, offset: usize, value: u16) -> Result<()> {
        self.write(offset, &value.to_be_bytes())
    }

    pub fn write_u32(&self, offset: usize, value: u32) -> Result<()> {
        self.write(offset, &value.to_be_bytes())
    }

    pub fn write_u64(&self, offset: usize, value: u64) -> Result<()> {
        self.write(offset, &value.to_be_bytes())
    }
}

impl Clone for DBPage {
    fn clone(&self) -> Self {
        Self::from_frame(Arc::clone(&self.frame))
    }
}

impl Drop for DBPage {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}
