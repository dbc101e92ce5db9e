//! # Write-Ahead Log
//!
//! Append-only redo/undo log over numbered segment files, giving the engine
//! crash atomicity and durability. All database mutations reach the log as
//! byte-level page diffs before the pages themselves reach disk.
//!
//! ## File layout
//!
//! Segments are named `wal-NNNNN.log` (file numbers 0..=65535, wrapping).
//! Bytes 0-1 carry the standard type/page-size header; bytes 2-5 hold the
//! offset at which the previous segment's records ended (0 in the very
//! first segment); records start at offset 6. A segment rolls once a record
//! ends at or past 10 MiB.
//!
//! ## Record framing
//!
//! Every record begins and ends with the same 1-byte type so the log can be
//! scanned in both directions:
//!
//! ```text
//! START_TXN              | type | txnId:u32 | type |                      6 B
//! COMMIT/ABORT_TXN       | type | txnId:u32 | prevLSN:u16+u32 | type |   12 B
//! UPDATE_PAGE            | type | txnId | prevLSN | file:vstr | pageNo:u16
//!                        | nSegs:u16 | {idx:u16 len:u16 old[len] new[len]}*
//!                        | startOff:u32 | type |
//! UPDATE_PAGE_REDO_ONLY  same, but segments carry only new bytes
//! ```
//!
//! The trailing `startOff` duplicates the record's own start offset; a
//! backward scan reads the terminator byte, then either subtracts the fixed
//! record size or reads `startOff` to find the record start.
//!
//! ## Durability
//!
//! [`WalManager::force_wal`] is the single durability primitive: it flushes
//! every log byte up to a target LSN and fsyncs. It is monotonic — a force
//! behind the watermark is a no-op. The buffer pool calls it (through the
//! transaction manager) before any dirty data page is written, and commit
//! calls it on the COMMIT record's LSN.

pub mod recovery;

use std::sync::Arc;

use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::{
    MAX_WAL_FILE_NUMBER, MAX_WAL_FILE_SIZE, RUN_MERGE_GAP, WAL_OFFSET_FIRST_RECORD,
    WAL_OFFSET_PREV_FILE_END,
};
use crate::error::DbError;
use crate::storage::{DBFile, DBFileType, DBPage, FileReader, FileWriter, StorageService};
use crate::transactions::TransactionState;

pub use recovery::RecoveryInfo;

/// Position of one WAL record: `(file number, byte offset)`. The record
/// size is transient bookkeeping filled in once the record is written; it
/// does not participate in ordering or equality.
#[derive(Debug, Clone, Copy)]
pub struct LogSequenceNumber {
    pub file_no: u16,
    pub offset: u32,
    pub record_size: u32,
}

impl LogSequenceNumber {
    pub fn new(file_no: u16, offset: u32) -> Self {
        Self {
            file_no,
            offset,
            record_size: 0,
        }
    }

    pub fn with_record_size(mut self, record_size: u32) -> Self {
        self.record_size = record_size;
        self
    }
}

impl PartialEq for LogSequenceNumber {
    fn eq(&self, other: &Self) -> bool {
        self.file_no == other.file_no && self.offset == other.offset
    }
}

impl Eq for LogSequenceNumber {}

impl PartialOrd for LogSequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogSequenceNumber {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.file_no, self.offset).cmp(&(other.file_no, other.offset))
    }
}

impl std::fmt::Display for LogSequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:08}", self.file_no, self.offset)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalRecordType {
    StartTxn = 1,
    CommitTxn = 2,
    AbortTxn = 3,
    UpdatePage = 4,
    UpdatePageRedoOnly = 5,
}

impl WalRecordType {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => WalRecordType::StartTxn,
            2 => WalRecordType::CommitTxn,
            3 => WalRecordType::AbortTxn,
            4 => WalRecordType::UpdatePage,
            5 => WalRecordType::UpdatePageRedoOnly,
            other => bail!(DbError::Corruption(format!(
                "unrecognized WAL record type {}",
                other
            ))),
        })
    }
}

/// Size of a START_TXN record.
pub const START_RECORD_SIZE: u32 = 6;
/// Size of a COMMIT_TXN or ABORT_TXN record.
pub const TXN_END_RECORD_SIZE: u32 = 12;

/// One changed byte range of a page diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffSegment {
    pub index: usize,
    pub len: usize,
}

/// Computes the changed segments between a page snapshot and its current
/// contents. Runs of equal bytes no longer than `RUN_MERGE_GAP` are folded
/// into the surrounding segment.
pub fn diff_segments(old: &[u8], new: &[u8]) -> SmallVec<[DiffSegment; 8]> {
    debug_assert_eq!(old.len(), new.len());
    let len = old.len();
    let mut segments = SmallVec::new();

    let identical_run = |from: usize| -> usize {
        (from..len).take_while(|&i| old[i] == new[i]).count()
    };
    let different_run = |from: usize| -> usize {
        (from..len).take_while(|&i| old[i] != new[i]).count()
    };

    let mut index = 0;
    while index < len {
        index += identical_run(index);
        if index == len {
            break;
        }

        let mut size = 0;
        while index + size < len {
            size += different_run(index + size);
            if index + size == len {
                break;
            }
            let same = identical_run(index + size);
            if same > RUN_MERGE_GAP || index + size + same == len {
                break;
            }
            size += same;
        }

        segments.push(DiffSegment { index, len: size });
        index += size;
    }

    segments
}

pub struct WalManager {
    service: Arc<StorageService>,
    page_size: usize,
    /// Exclusive while appending records; also guards segment rollover.
    append_lock: Mutex<()>,
    /// Durability watermark: everything at or below is fsynced.
    forced: Mutex<Option<LogSequenceNumber>>,
}

impl WalManager {
    pub fn new(service: Arc<StorageService>, page_size: usize) -> Self {
        Self {
            service,
            page_size,
            append_lock: Mutex::new(()),
            forced: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<StorageService> {
        &self.service
    }

    pub fn wal_file_name(file_no: u16) -> String {
        format!("wal-{:05}.log", file_no)
    }

    pub fn create_wal_file(&self, file_no: u16, page_size: usize) -> Result<Arc<DBFile>> {
        let name = Self::wal_file_name(file_no);
        debug!(%name, "creating WAL file");
        self.service
            .create_db_file(&name, DBFileType::WriteAheadLogFile, page_size)
    }

    pub fn open_wal_file(&self, file_no: u16) -> Result<Arc<DBFile>> {
        let name = Self::wal_file_name(file_no);
        let file = self.service.open_db_file(&name)?;
        ensure!(
            file.file_type() == DBFileType::WriteAheadLogFile,
            DbError::Corruption(format!("'{}' is not a write-ahead log file", name))
        );
        Ok(file)
    }

    /// Where the record after one ending at `offset` in `file_no` will go,
    /// rolling to the next file number past the size limit.
    pub fn compute_next_lsn(file_no: u16, offset: u32) -> LogSequenceNumber {
        if offset >= MAX_WAL_FILE_SIZE {
            let next_file = if file_no == MAX_WAL_FILE_NUMBER {
                0
            } else {
                file_no + 1
            };
            LogSequenceNumber::new(next_file, WAL_OFFSET_FIRST_RECORD)
        } else {
            LogSequenceNumber::new(file_no, offset)
        }
    }

    /// After writing a record that ended at `end_offset`, prepares the next
    /// append position; on rollover the new segment is created immediately
    /// with the old segment's final offset recorded at bytes 2-5.
    fn advance_after_write(
        &self,
        file: &Arc<DBFile>,
        file_no: u16,
        end_offset: u32,
    ) -> Result<LogSequenceNumber> {
        let next = Self::compute_next_lsn(file_no, end_offset);
        if next.file_no != file_no {
            info!(
                old_file = file_no,
                new_file = next.file_no,
                end_offset,
                "rolling write-ahead log to a new segment"
            );
            let new_file = self.create_wal_file(next.file_no, file.page_size())?;
            let mut writer = FileWriter::new(&self.service, new_file);
            writer.set_position(WAL_OFFSET_PREV_FILE_END);
            writer.write_u32(end_offset)?;
        }
        Ok(next)
    }

    fn writer_at(&self, lsn: LogSequenceNumber) -> Result<FileWriter<'_>> {
        let name = Self::wal_file_name(lsn.file_no);
        let file = if self.service.file_exists(&name) {
            self.open_wal_file(lsn.file_no)?
        } else {
            // Only the very first segment is created lazily; rolled
            // segments are created in advance_after_write.
            self.create_wal_file(lsn.file_no, self.page_size)?
        };
        let mut writer = FileWriter::new(&self.service, file);
        writer.set_position(lsn.offset);
        Ok(writer)
    }

    fn reader_at(&self, lsn: LogSequenceNumber) -> Result<FileReader<'_>> {
        let file = self.open_wal_file(lsn.file_no)?;
        let mut reader = FileReader::new(&self.service, file);
        reader.set_position(lsn.offset);
        Ok(reader)
    }

    /// Appends a START_TXN / COMMIT_TXN / ABORT_TXN record at `lsn`.
    /// Returns the written LSN (record size filled in) and the next append
    /// position.
    pub fn write_txn_record(
        &self,
        lsn: LogSequenceNumber,
        record_type: WalRecordType,
        txn_id: u32,
        prev_lsn: Option<LogSequenceNumber>,
    ) -> Result<(LogSequenceNumber, LogSequenceNumber)> {
        ensure!(
            matches!(
                record_type,
                WalRecordType::StartTxn | WalRecordType::CommitTxn | WalRecordType::AbortTxn
            ),
            DbError::InvalidArgument(format!(
                "{:?} is not a transaction-demarcation record",
                record_type
            ))
        );
        if record_type != WalRecordType::StartTxn {
            ensure!(
                prev_lsn.is_some(),
                DbError::InvalidArgument(format!("prevLSN required for {:?}", record_type))
            );
        }

        let _append = self.append_lock.lock();
        debug!(?record_type, txn_id, %lsn, "writing transaction record");

        let mut writer = self.writer_at(lsn)?;
        writer.write_u8(record_type as u8)?;
        writer.write_u32(txn_id)?;

        let written = if record_type == WalRecordType::StartTxn {
            writer.write_u8(record_type as u8)?;
            lsn.with_record_size(START_RECORD_SIZE)
        } else {
            let prev = prev_lsn.expect("checked above");
            writer.write_u16(prev.file_no)?;
            writer.write_u32(prev.offset)?;
            writer.write_u8(record_type as u8)?;
            lsn.with_record_size(TXN_END_RECORD_SIZE)
        };

        let file = self.open_wal_file(lsn.file_no)?;
        let next = self.advance_after_write(&file, lsn.file_no, writer.position())?;
        Ok((written, next))
    }

    /// Appends an UPDATE_PAGE record holding the byte diff between the
    /// page's snapshot and its current contents, and stamps the page with
    /// the record's LSN. Returns `(written, next)`.
    pub fn write_update_page_record(
        &self,
        lsn: LogSequenceNumber,
        page: &DBPage,
        txn_id: u32,
        prev_lsn: LogSequenceNumber,
    ) -> Result<(LogSequenceNumber, LogSequenceNumber)> {
        ensure!(
            page.is_dirty(),
            DbError::InvalidArgument("page has no updates to log".into())
        );

        let _append = self.append_lock.lock();
        debug!(
            txn_id,
            file = page.file().name(),
            page_no = page.page_no(),
            %lsn,
            "writing page-update record"
        );

        let mut writer = self.writer_at(lsn)?;
        writer.write_u8(WalRecordType::UpdatePage as u8)?;
        writer.write_u32(txn_id)?;
        writer.write_u16(prev_lsn.file_no)?;
        writer.write_u32(prev_lsn.offset)?;
        writer.write_var_string255(page.file().name())?;
        writer.write_u16(page.page_no() as u16)?;

        let (num_segments, payload) = page.with_contents(|old, new| {
            let segments = diff_segments(old, new);
            let mut payload = Vec::new();
            for seg in &segments {
                payload.extend_from_slice(&(seg.index as u16).to_be_bytes());
                payload.extend_from_slice(&(seg.len as u16).to_be_bytes());
                payload.extend_from_slice(&old[seg.index..seg.index + seg.len]);
                payload.extend_from_slice(&new[seg.index..seg.index + seg.len]);
            }
            (segments.len(), payload)
        });

        writer.write_u16(num_segments as u16)?;
        writer.write(&payload)?;
        writer.write_u32(lsn.offset)?;
        writer.write_u8(WalRecordType::UpdatePage as u8)?;

        let written = lsn.with_record_size(writer.position() - lsn.offset);
        page.set_page_lsn(written);

        let file = self.open_wal_file(lsn.file_no)?;
        let next = self.advance_after_write(&file, lsn.file_no, writer.position())?;
        Ok((written, next))
    }

    /// Appends an UPDATE_PAGE_REDO_ONLY record whose segment payload is
    /// `changes` (already in `idx, len, bytes` form). Used by rollback and
    /// the recovery undo pass.
    pub fn write_redo_only_update_record(
        &self,
        lsn: LogSequenceNumber,
        txn_id: u32,
        prev_lsn: LogSequenceNumber,
        page: &DBPage,
        num_segments: u16,
        changes: &[u8],
    ) -> Result<(LogSequenceNumber, LogSequenceNumber)> {
        let _append = self.append_lock.lock();
        debug!(
            txn_id,
            file = page.file().name(),
            page_no = page.page_no(),
            %lsn,
            "writing redo-only update record"
        );

        let mut writer = self.writer_at(lsn)?;
        writer.write_u8(WalRecordType::UpdatePageRedoOnly as u8)?;
        writer.write_u32(txn_id)?;
        writer.write_u16(prev_lsn.file_no)?;
        writer.write_u32(prev_lsn.offset)?;
        writer.write_var_string255(page.file().name())?;
        writer.write_u16(page.page_no() as u16)?;
        writer.write_u16(num_segments)?;
        writer.write(changes)?;
        writer.write_u32(lsn.offset)?;
        writer.write_u8(WalRecordType::UpdatePageRedoOnly as u8)?;

        let written = lsn.with_record_size(writer.position() - lsn.offset);
        page.set_page_lsn(written);

        let file = self.open_wal_file(lsn.file_no)?;
        let next = self.advance_after_write(&file, lsn.file_no, writer.position())?;
        Ok((written, next))
    }

    /// Applies the undo bytes of an UPDATE_PAGE record's segments to the
    /// page, and returns the applied bytes re-encoded as a redo-only
    /// payload. The reader must be positioned at the first segment.
    pub(crate) fn apply_undo_and_gen_redo_only_data(
        reader: &mut FileReader<'_>,
        page: &DBPage,
        num_segments: u16,
    ) -> Result<Vec<u8>> {
        let mut redo_only = Vec::new();

        for _ in 0..num_segments {
            let start = reader.read_u16()? as usize;
            let length = reader.read_u16()? as usize;

            let mut undo_data = vec![0u8; length];
            reader.read_exact(&mut undo_data)?;
            page.write(start, &undo_data)?;

            // The redo bytes follow the undo bytes; skip them.
            reader.move_position(length as i64);

            redo_only.extend_from_slice(&(start as u16).to_be_bytes());
            redo_only.extend_from_slice(&(length as u16).to_be_bytes());
            redo_only.extend_from_slice(&undo_data);
        }

        Ok(redo_only)
    }

    /// Rolls back the session's in-flight transaction by walking its
    /// `prevLSN` chain from `last_lsn` back to START_TXN, applying undo
    /// bytes and appending compensation records from `next` onward.
    /// Returns the new append position.
    pub fn rollback_transaction(
        &self,
        mut next: LogSequenceNumber,
        txn_state: &mut TransactionState,
    ) -> Result<LogSequenceNumber> {
        let txn_id = txn_state.txn_id;
        let mut lsn = match txn_state.last_lsn {
            Some(lsn) => lsn,
            None => return Ok(next),
        };

        info!(txn_id, last_lsn = %lsn, "rolling back transaction");

        loop {
            let mut reader = self.reader_at(lsn)?;
            let record_type = WalRecordType::from_id(reader.read_u8()?)?;
            let record_txn = reader.read_u32()?;
            ensure!(
                record_txn == txn_id,
                DbError::Transaction(format!(
                    "rollback of transaction {} found a record for transaction {} at {}",
                    txn_id, record_txn, lsn
                ))
            );

            if record_type == WalRecordType::StartTxn {
                debug!(txn_id, "reached START_TXN, rollback complete");
                break;
            }

            let prev_file = reader.read_u16()?;
            let prev_offset = reader.read_u32()?;
            let prev_lsn = LogSequenceNumber::new(prev_file, prev_offset);

            if record_type == WalRecordType::UpdatePage {
                let filename = reader.read_var_string255()?;
                let page_no = reader.read_u16()? as u32;
                let file = self.service.open_db_file(&filename)?;
                let page = self.service.load_db_page(&file, page_no, false)?;

                let num_segments = reader.read_u16()?;
                let redo_only =
                    Self::apply_undo_and_gen_redo_only_data(&mut reader, &page, num_segments)?;

                let chain = txn_state.last_lsn.expect("rollback without lastLSN");
                let (written, new_next) = self.write_redo_only_update_record(
                    next,
                    txn_id,
                    chain,
                    &page,
                    num_segments,
                    &redo_only,
                )?;
                txn_state.last_lsn = Some(written);
                next = new_next;
            } else {
                warn!(
                    txn_id,
                    ?record_type,
                    "unexpected record type while rolling back; skipping"
                );
            }

            lsn = prev_lsn;
        }

        let chain = txn_state.last_lsn;
        let (written, new_next) =
            self.write_txn_record(next, WalRecordType::AbortTxn, txn_id, chain)?;
        txn_state.last_lsn = Some(written);
        info!(txn_id, abort_lsn = %written, "transaction rolled back");
        Ok(new_next)
    }

    /// Makes every WAL byte at or below `target` durable. Monotonic: a
    /// target at or behind the watermark is a no-op.
    pub fn force_wal(&self, target: LogSequenceNumber) -> Result<()> {
        let mut forced = self.forced.lock();
        if let Some(done) = *forced {
            if target <= done {
                debug!(%target, %done, "WAL already forced past target");
                return Ok(());
            }
        }

        let start_file = forced.map(|l| l.file_no).unwrap_or(target.file_no);

        // Fully flush the segments before the target's, then the target
        // segment up to the page holding the record's last byte.
        for file_no in start_file..target.file_no {
            if let Some(file) = self.service.file_if_open(&Self::wal_file_name(file_no)) {
                self.service
                    .write_db_file(&file, None, true)
                    .wrap_err_with(|| format!("failed to force WAL file {}", file_no))?;
            }
        }

        if let Some(file) = self
            .service
            .file_if_open(&Self::wal_file_name(target.file_no))
        {
            let last_position = target.offset + target.record_size;
            let page_no = last_position / file.page_size() as u32;
            self.service
                .write_db_file(&file, Some((0, page_no)), true)
                .wrap_err_with(|| format!("failed to force WAL file {}", target.file_no))?;
        }

        debug!(%target, "WAL forced");
        *forced = Some(target);
        Ok(())
    }
}
