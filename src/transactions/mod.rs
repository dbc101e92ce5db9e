//! # Transaction Management
//!
//! Transaction ids, per-session transaction state, the persistent
//! transaction-state page, and the manager that ties the table managers to
//! the write-ahead log.
//!
//! ## Lifecycle
//!
//! Starting a transaction only assigns an id; nothing reaches the log until
//! the first page update, at which point a START_TXN record is written
//! lazily. Commit appends COMMIT_TXN and forces the log through it — that
//! force is the durability boundary. Read-only transactions commit
//! silently. Rollback walks the transaction's `prevLSN` chain through the
//! WAL, reverting each update.
//!
//! ## Persistent state
//!
//! `txnstate.dat` is a single-page file holding `{nextTxnId, firstLSN,
//! nextLSN}` right after the common file header, big-endian:
//!
//! ```text
//! Offset  Size  Field
//! 2       4     next transaction id
//! 6       2+4   first LSN (file, offset)
//! 12      2+4   next LSN (file, offset)
//! ```
//!
//! `firstLSN` is where recovery starts; `nextLSN` is where the next record
//! will be appended. The stored `nextLSN` is only advanced to points the
//! log has actually been forced through, so a redo scan never runs past
//! durable bytes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, info};
use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{TXNSTATE_FILENAME, WAL_OFFSET_FIRST_RECORD};
use crate::error::DbError;
use crate::storage::{DBFileType, DBPage, StorageService, WalForce, PAGE0_DATA_OFFSET};
use crate::wal::{LogSequenceNumber, RecoveryInfo, WalManager, WalRecordType};

/// Sentinel id meaning "no transaction in progress"; real ids start at 1.
pub const NO_TRANSACTION: u32 = 0;

/// Per-session transaction state.
#[derive(Debug, Clone)]
pub struct TransactionState {
    pub txn_id: u32,
    pub user_started: bool,
    pub performed_writes: bool,
    pub logged_start: bool,
    pub last_lsn: Option<LogSequenceNumber>,
}

impl Default for TransactionState {
    fn default() -> Self {
        Self {
            txn_id: NO_TRANSACTION,
            user_started: false,
            performed_writes: false,
            logged_start: false,
            last_lsn: None,
        }
    }
}

impl TransactionState {
    pub fn is_txn_in_progress(&self) -> bool {
        self.txn_id != NO_TRANSACTION
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// On-disk layout of the txn-state fields (big-endian, unaligned).
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct TxnStateLayout {
    next_txn_id: U32,
    first_lsn_file: U16,
    first_lsn_offset: U32,
    next_lsn_file: U16,
    next_lsn_offset: U32,
}

const TXNSTATE_LAYOUT_SIZE: usize = 16;

/// Wrapper over page 0 of `txnstate.dat`.
pub struct TransactionStatePage {
    page: DBPage,
}

impl TransactionStatePage {
    pub fn new(page: DBPage) -> Self {
        Self { page }
    }

    fn read_layout(&self) -> Result<TxnStateLayout> {
        let mut bytes = [0u8; TXNSTATE_LAYOUT_SIZE];
        self.page.read(PAGE0_DATA_OFFSET, &mut bytes)?;
        TxnStateLayout::read_from_bytes(&bytes)
            .map_err(|e| eyre::eyre!(DbError::Corruption(format!("bad txn-state page: {:?}", e))))
    }

    fn write_layout(&self, layout: &TxnStateLayout) -> Result<()> {
        self.page.write(PAGE0_DATA_OFFSET, layout.as_bytes())
    }

    pub fn next_txn_id(&self) -> Result<u32> {
        Ok(self.read_layout()?.next_txn_id.get())
    }

    pub fn first_lsn(&self) -> Result<LogSequenceNumber> {
        let layout = self.read_layout()?;
        Ok(LogSequenceNumber::new(
            layout.first_lsn_file.get(),
            layout.first_lsn_offset.get(),
        ))
    }

    pub fn next_lsn(&self) -> Result<LogSequenceNumber> {
        let layout = self.read_layout()?;
        Ok(LogSequenceNumber::new(
            layout.next_lsn_file.get(),
            layout.next_lsn_offset.get(),
        ))
    }

    pub fn store(
        &self,
        next_txn_id: u32,
        first_lsn: LogSequenceNumber,
        next_lsn: LogSequenceNumber,
    ) -> Result<()> {
        debug_assert!(first_lsn <= next_lsn, "firstLSN must not pass nextLSN");
        self.write_layout(&TxnStateLayout {
            next_txn_id: U32::new(next_txn_id),
            first_lsn_file: U16::new(first_lsn.file_no),
            first_lsn_offset: U32::new(first_lsn.offset),
            next_lsn_file: U16::new(next_lsn.file_no),
            next_lsn_offset: U32::new(next_lsn.offset),
        })
    }
}

struct LsnState {
    next_lsn: LogSequenceNumber,
}

pub struct TransactionManager {
    service: Arc<StorageService>,
    wal: Arc<WalManager>,
    next_txn_id: AtomicU32,
    /// Recovery start point; fixed after initialization (the engine does
    /// not checkpoint).
    first_lsn: Mutex<LogSequenceNumber>,
    /// In-memory append position, ahead of the stored nextLSN between
    /// forces.
    lsns: Mutex<LsnState>,
    /// The nextLSN currently persisted in the txn-state page. Forces only
    /// ever advance it: a force for an older page LSN must not regress the
    /// recovery horizon past records a later commit already persisted.
    stored_next_lsn: Mutex<LogSequenceNumber>,
    page_size: usize,
}

impl TransactionManager {
    pub fn new(service: Arc<StorageService>, wal: Arc<WalManager>, page_size: usize) -> Self {
        let bootstrap = LogSequenceNumber::new(0, WAL_OFFSET_FIRST_RECORD);
        Self {
            service,
            wal,
            next_txn_id: AtomicU32::new(1),
            first_lsn: Mutex::new(bootstrap),
            lsns: Mutex::new(LsnState {
                next_lsn: bootstrap,
            }),
            stored_next_lsn: Mutex::new(bootstrap),
            page_size,
        }
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    fn create_txn_state_file(&self) -> Result<TransactionStatePage> {
        info!("no transaction-state file found; creating one");
        let file =
            self.service
                .create_db_file(TXNSTATE_FILENAME, DBFileType::TxnStateFile, self.page_size)?;
        let page = self.service.load_db_page(&file, 0, false)?;
        let state_page = TransactionStatePage::new(page);

        let bootstrap = LogSequenceNumber::new(0, WAL_OFFSET_FIRST_RECORD);
        state_page.store(1, bootstrap, bootstrap)?;
        self.service.write_db_file(&file, None, true)?;
        Ok(state_page)
    }

    fn load_txn_state_file(&self) -> Result<TransactionStatePage> {
        let file = self.service.open_db_file(TXNSTATE_FILENAME)?;
        ensure!(
            file.file_type() == DBFileType::TxnStateFile,
            DbError::Corruption(format!("'{}' is not a txn-state file", TXNSTATE_FILENAME))
        );
        let page = self.service.load_db_page(&file, 0, false)?;
        Ok(TransactionStatePage::new(page))
    }

    fn store_txn_state(&self, next_lsn: LogSequenceNumber) -> Result<()> {
        let state_page = self.load_txn_state_file()?;
        state_page.store(
            self.next_txn_id.load(Ordering::Acquire),
            *self.first_lsn.lock(),
            next_lsn,
        )?;
        let file = self.service.open_db_file(TXNSTATE_FILENAME)?;
        self.service.write_db_file(&file, None, true)
    }

    /// Loads (or creates) the txn-state file and performs crash recovery
    /// over the WAL range it names.
    pub fn initialize(&self) -> Result<()> {
        let state_page = if self.service.file_exists(TXNSTATE_FILENAME) {
            self.load_txn_state_file()?
        } else {
            self.create_txn_state_file()?
        };

        self.next_txn_id
            .store(state_page.next_txn_id()?, Ordering::Release);
        let first = state_page.first_lsn()?;
        let stored_next = state_page.next_lsn()?;
        *self.first_lsn.lock() = first;
        debug!(first = %first, next = %stored_next, "transaction state loaded");

        let mut recovery = RecoveryInfo::new(first, stored_next);
        let new_next = self
            .wal
            .do_recovery(stored_next, &mut recovery)
            .wrap_err("crash recovery failed")?;

        self.lsns.lock().next_lsn = new_next;
        self.store_txn_state(new_next)?;
        *self.stored_next_lsn.lock() = new_next;
        Ok(())
    }

    pub fn get_and_increment_next_txn_id(&self) -> u32 {
        self.next_txn_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Assigns a transaction id to the session. No WAL record is written
    /// until the transaction first mutates a page.
    pub fn start_transaction(
        &self,
        state: &mut TransactionState,
        user_started: bool,
    ) -> Result<()> {
        ensure!(
            !state.is_txn_in_progress(),
            DbError::Transaction("a transaction is already in progress".into())
        );

        state.txn_id = self.get_and_increment_next_txn_id();
        state.user_started = user_started;
        debug!(
            txn_id = state.txn_id,
            user_started, "starting transaction"
        );
        Ok(())
    }

    /// Called by table managers after mutating a pinned page: logs the
    /// transaction start lazily, appends the page diff to the WAL and
    /// refreshes the page's diff snapshot.
    pub fn record_page_update(&self, state: &mut TransactionState, page: &DBPage) -> Result<()> {
        if !page.is_dirty() {
            debug!("page reports no changes; skipping WAL record");
            return Ok(());
        }
        ensure!(
            state.is_txn_in_progress(),
            DbError::Transaction("no transaction is in progress".into())
        );

        let mut lsns = self.lsns.lock();

        if !state.logged_start {
            let (written, next) = self.wal.write_txn_record(
                lsns.next_lsn,
                WalRecordType::StartTxn,
                state.txn_id,
                None,
            )?;
            state.last_lsn = Some(written);
            state.logged_start = true;
            lsns.next_lsn = next;
        }

        let prev = state.last_lsn.expect("logged_start set without lastLSN");
        let (written, next) =
            self.wal
                .write_update_page_record(lsns.next_lsn, page, state.txn_id, prev)?;
        state.last_lsn = Some(written);
        state.performed_writes = true;
        lsns.next_lsn = next;
        drop(lsns);

        page.sync_old_data();
        Ok(())
    }

    /// Commits the session's transaction. A transaction that logged
    /// nothing commits silently; otherwise the COMMIT record is appended
    /// and the WAL forced through it before this returns.
    pub fn commit_transaction(&self, state: &mut TransactionState) -> Result<()> {
        if !state.is_txn_in_progress() {
            debug!("commit with no transaction in progress");
            return Ok(());
        }

        if state.logged_start {
            let result = (|| -> Result<LogSequenceNumber> {
                let written;
                {
                    let mut lsns = self.lsns.lock();
                    let prev = state.last_lsn.expect("logged_start set without lastLSN");
                    let (w, next) = self.wal.write_txn_record(
                        lsns.next_lsn,
                        WalRecordType::CommitTxn,
                        state.txn_id,
                        Some(prev),
                    )?;
                    written = w;
                    lsns.next_lsn = next;
                }
                self.force_to_internal(written)?;
                Ok(written)
            })();

            match result {
                Ok(lsn) => debug!(txn_id = state.txn_id, commit_lsn = %lsn, "transaction committed"),
                // Keep the transaction state for inspection / retry.
                Err(e) => {
                    return Err(e.wrap_err(DbError::Transaction(format!(
                        "couldn't commit transaction {}",
                        state.txn_id
                    ))))
                }
            }
        } else {
            debug!(
                txn_id = state.txn_id,
                "transaction made no changes; committing silently"
            );
        }

        state.clear();
        Ok(())
    }

    /// Rolls back the session's transaction through the WAL.
    pub fn rollback_transaction(&self, state: &mut TransactionState) -> Result<()> {
        if !state.is_txn_in_progress() {
            debug!("rollback with no transaction in progress");
            return Ok(());
        }

        if state.logged_start {
            let result = (|| -> Result<()> {
                let mut lsns = self.lsns.lock();
                let next = self.wal.rollback_transaction(lsns.next_lsn, state)?;
                lsns.next_lsn = next;
                Ok(())
            })();
            if let Err(e) = result {
                return Err(e.wrap_err(DbError::Transaction(format!(
                    "couldn't roll back transaction {}",
                    state.txn_id
                ))));
            }
        } else {
            debug!(
                txn_id = state.txn_id,
                "transaction made no changes; nothing to roll back"
            );
        }

        state.clear();
        Ok(())
    }

    /// Forces the WAL through `lsn` and persists the advanced stored
    /// `nextLSN`. The stored value only moves forward, and only to record
    /// boundaries the log has been forced through.
    fn force_to_internal(&self, lsn: LogSequenceNumber) -> Result<()> {
        self.wal.force_wal(lsn)?;
        let durable_end =
            WalManager::compute_next_lsn(lsn.file_no, lsn.offset + lsn.record_size);

        // Not held across the page I/O below: persisting pins the
        // txn-state page, and an eviction there can re-enter this path.
        if durable_end <= *self.stored_next_lsn.lock() {
            return Ok(());
        }
        self.store_txn_state(durable_end)?;

        let mut stored = self.stored_next_lsn.lock();
        if durable_end > *stored {
            *stored = durable_end;
        }
        Ok(())
    }

    /// Flushes the whole log and persists the txn state; used at shutdown.
    pub fn force_all(&self) -> Result<()> {
        let next = self.lsns.lock().next_lsn;
        // Everything before the append position is a complete record.
        self.wal
            .force_wal(LogSequenceNumber::new(next.file_no, next.offset))?;

        if next > *self.stored_next_lsn.lock() {
            self.store_txn_state(next)?;
            let mut stored = self.stored_next_lsn.lock();
            if next > *stored {
                *stored = next;
            }
        }
        Ok(())
    }
}

impl WalForce for TransactionManager {
    fn force_to(&self, lsn: LogSequenceNumber) -> Result<()> {
        self.force_to_internal(lsn)
    }
}
