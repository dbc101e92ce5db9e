//! # Buffer Pool
//!
//! Keeps page frames resident under a byte budget, hands out pinned
//! [`DBPage`] handles, and writes dirty frames back to disk on eviction and
//! flush. Eviction is approximate LRU: every pin stamps the frame with a
//! monotonically increasing counter and the unpinned frame with the smallest
//! stamp is the victim.
//!
//! ## The WAL rule
//!
//! Before any dirty page reaches its data file, every WAL record up to that
//! page's LSN must be durable. The pool enforces this unconditionally: each
//! write-back of a frame with a page LSN first calls the installed
//! [`WalForce`] hook. The transaction manager installs the hook at startup;
//! when transactions are disabled no hook exists and pages carry no LSN, so
//! write-back is direct.
//!
//! WAL and txn-state pages themselves never carry a page LSN, which is what
//! terminates the recursion: forcing the log flushes WAL pages through this
//! same pool without re-entering the hook.
//!
//! ## Locking
//!
//! One mutex guards the frame table; each frame has its own lock for the
//! byte contents. Disk I/O never happens while the table lock is held.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::DbError;
use crate::storage::file_manager::{DBFile, FileManager};
use crate::storage::page::{DBPage, PageFrame, PageKey};
use crate::wal::LogSequenceNumber;

/// Installed by the transaction manager so dirty write-back can force the
/// log up to a page's LSN first.
pub trait WalForce: Send + Sync {
    fn force_to(&self, lsn: LogSequenceNumber) -> Result<()>;
}

pub struct BufferPool {
    file_manager: Arc<FileManager>,
    budget_bytes: usize,
    frames: Mutex<HashMap<PageKey, Arc<PageFrame>>>,
    used_bytes: AtomicUsize,
    next_stamp: AtomicU64,
    wal_force: RwLock<Option<Arc<dyn WalForce>>>,
}

impl BufferPool {
    pub fn new(file_manager: Arc<FileManager>, budget_bytes: usize) -> Self {
        Self {
            file_manager,
            budget_bytes,
            frames: Mutex::new(HashMap::new()),
            used_bytes: AtomicUsize::new(0),
            next_stamp: AtomicU64::new(1),
            wal_force: RwLock::new(None),
        }
    }

    pub fn set_wal_force(&self, hook: Arc<dyn WalForce>) {
        *self.wal_force.write() = Some(hook);
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Acquire)
    }

    fn stamp(&self) -> u64 {
        self.next_stamp.fetch_add(1, Ordering::Relaxed)
    }

    /// Pins a page, loading it from disk on a miss. With `create` set, a
    /// page past end-of-file materializes zero-filled; the file grows when
    /// the page is first written back.
    pub fn pin(&self, file: &Arc<DBFile>, page_no: u32, create: bool) -> Result<DBPage> {
        let key = PageKey::new(file.file_id(), page_no);

        if let Some(frame) = self.frames.lock().get(&key) {
            frame.touch(self.stamp());
            return Ok(DBPage::from_frame(Arc::clone(frame)));
        }

        let mut buf = vec![0u8; file.page_size()].into_boxed_slice();
        self.file_manager.read_page(file, page_no, &mut buf, create)?;

        self.make_room(file.page_size())?;

        let mut table = self.frames.lock();
        if let Some(frame) = table.get(&key) {
            // Lost the race to another pinner; use the resident frame.
            frame.touch(self.stamp());
            return Ok(DBPage::from_frame(Arc::clone(frame)));
        }

        let frame = Arc::new(PageFrame::new(key, Arc::clone(file), buf));
        frame.touch(self.stamp());
        self.used_bytes.fetch_add(file.page_size(), Ordering::AcqRel);
        table.insert(key, Arc::clone(&frame));
        trace!(file = file.name(), page_no, "page loaded into buffer pool");

        Ok(DBPage::from_frame(frame))
    }

    /// Evicts least-recently-pinned frames until `incoming` more bytes fit.
    fn make_room(&self, incoming: usize) -> Result<()> {
        loop {
            let victim = {
                let mut table = self.frames.lock();
                if self.used_bytes.load(Ordering::Acquire) + incoming <= self.budget_bytes {
                    return Ok(());
                }

                let victim_key = table
                    .values()
                    .filter(|f| !f.is_pinned())
                    .min_by_key(|f| f.stamp())
                    .map(|f| f.key());

                match victim_key {
                    Some(key) => {
                        let frame = table.remove(&key).expect("victim vanished");
                        self.used_bytes
                            .fetch_sub(frame.file().page_size(), Ordering::AcqRel);
                        frame
                    }
                    None => bail!(DbError::Execution(format!(
                        "buffer pool exhausted: {} bytes resident, all pages pinned",
                        self.used_bytes.load(Ordering::Acquire)
                    ))),
                }
            };

            debug!(
                file = victim.file().name(),
                page_no = victim.key().page_no,
                "evicting page"
            );
            self.write_back(&victim)?;
        }
    }

    /// Writes a dirty frame to its file, honoring the WAL rule first.
    fn write_back(&self, frame: &Arc<PageFrame>) -> Result<()> {
        let (lsn, data) = {
            let inner = frame.inner.lock();
            if !inner.dirty {
                return Ok(());
            }
            (inner.page_lsn, inner.data.clone())
        };

        if let Some(lsn) = lsn {
            let hook = self.wal_force.read().clone();
            if let Some(hook) = hook {
                hook.force_to(lsn)?;
            }
        }

        self.file_manager
            .write_page(frame.file(), frame.key().page_no, &data)?;
        frame.inner.lock().dirty = false;
        Ok(())
    }

    fn frames_of(&self, file_id: u32, range: Option<(u32, u32)>) -> Vec<Arc<PageFrame>> {
        let table = self.frames.lock();
        let mut frames: Vec<_> = table
            .values()
            .filter(|f| f.key().file_id == file_id)
            .filter(|f| match range {
                Some((min, max)) => (min..=max).contains(&f.key().page_no),
                None => true,
            })
            .cloned()
            .collect();
        frames.sort_by_key(|f| f.key().page_no);
        frames
    }

    /// Writes the file's dirty pages (optionally a page range) back to disk,
    /// then optionally fsyncs.
    pub fn flush_file(
        &self,
        file: &Arc<DBFile>,
        range: Option<(u32, u32)>,
        sync: bool,
    ) -> Result<()> {
        for frame in self.frames_of(file.file_id(), range) {
            self.write_back(&frame)?;
        }
        if sync {
            self.file_manager.sync_db_file(file)?;
        }
        Ok(())
    }

    /// Writes every dirty page back; with `sync`, fsyncs each touched file.
    pub fn flush_all(&self, sync: bool) -> Result<()> {
        let frames: Vec<_> = self.frames.lock().values().cloned().collect();

        let mut synced: Vec<u32> = Vec::new();
        for frame in frames {
            self.write_back(&frame)?;
            if sync && !synced.contains(&frame.key().file_id) {
                self.file_manager.sync_db_file(frame.file())?;
                synced.push(frame.key().file_id);
            }
        }
        Ok(())
    }

    /// Flushes and drops every unpinned frame of a file (used on close).
    pub fn release_file(&self, file: &Arc<DBFile>) -> Result<()> {
        self.flush_file(file, None, false)?;

        let mut table = self.frames.lock();
        let keys: Vec<_> = table
            .values()
            .filter(|f| f.key().file_id == file.file_id() && !f.is_pinned())
            .map(|f| f.key())
            .collect();
        for key in keys {
            if let Some(frame) = table.remove(&key) {
                self.used_bytes
                    .fetch_sub(frame.file().page_size(), Ordering::AcqRel);
            }
        }
        Ok(())
    }

    pub fn resident_pages(&self) -> usize {
        self.frames.lock().len()
    }
}
