//! # Crash Recovery
//!
//! Two-pass ARIES-style restart over the write-ahead log:
//!
//! 1. **Redo** — forward scan from `firstLSN` to `nextLSN`, replaying the
//!    new bytes of every update record unconditionally (replay is
//!    idempotent because writes are byte-exact). Along the way the pass
//!    discovers which transactions never reached COMMIT or ABORT.
//! 2. **Undo** — backward scan from `nextLSN` using the records' trailing
//!    type bytes and `startOff` fields, reverting the losers' updates and
//!    appending compensation records (redo-only updates plus a final
//!    ABORT_TXN per loser) to the log tail.
//!
//! Afterwards every buffered page is flushed and fsynced, and the caller
//! persists the advanced `nextLSN` into the transaction-state file.

use eyre::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::{WAL_OFFSET_FIRST_RECORD, WAL_OFFSET_PREV_FILE_END};
use crate::config::MAX_WAL_FILE_NUMBER;
use crate::error::DbError;
use crate::storage::FileReader;
use crate::wal::{LogSequenceNumber, WalManager, WalRecordType};

/// Bookkeeping shared by the two recovery passes.
#[derive(Debug)]
pub struct RecoveryInfo {
    pub first_lsn: LogSequenceNumber,
    pub next_lsn: LogSequenceNumber,
    /// Transactions seen without a terminating record, with each one's most
    /// recent LSN.
    pub incomplete_txns: HashMap<u32, LogSequenceNumber>,
    pub completed_txns: HashSet<u32>,
}

impl RecoveryInfo {
    pub fn new(first_lsn: LogSequenceNumber, next_lsn: LogSequenceNumber) -> Self {
        Self {
            first_lsn,
            next_lsn,
            incomplete_txns: HashMap::new(),
            completed_txns: HashSet::new(),
        }
    }

    /// Marks the transaction incomplete (unless already completed) and
    /// records `lsn` as its most recent record.
    pub fn update_info(&mut self, txn_id: u32, lsn: LogSequenceNumber) {
        if !self.completed_txns.contains(&txn_id) {
            self.incomplete_txns.insert(txn_id, lsn);
        }
    }

    pub fn record_txn_completed(&mut self, txn_id: u32) {
        self.incomplete_txns.remove(&txn_id);
        self.completed_txns.insert(txn_id);
    }

    pub fn is_txn_complete(&self, txn_id: u32) -> bool {
        self.completed_txns.contains(&txn_id)
    }

    pub fn has_incomplete_txns(&self) -> bool {
        !self.incomplete_txns.is_empty()
    }

    pub fn last_lsn(&self, txn_id: u32) -> Option<LogSequenceNumber> {
        self.incomplete_txns.get(&txn_id).copied()
    }
}

impl WalManager {
    /// Runs redo then undo over `[firstLSN, nextLSN)`, flushes and syncs
    /// all data pages, and returns the advanced append position (past any
    /// compensation records the undo pass wrote).
    pub fn do_recovery(
        &self,
        next: LogSequenceNumber,
        info: &mut RecoveryInfo,
    ) -> Result<LogSequenceNumber> {
        if info.first_lsn == info.next_lsn {
            debug!("write-ahead log is empty; no recovery needed");
            return Ok(next);
        }

        self.perform_redo(info)?;
        let new_next = self.perform_undo(next, info)?;

        // Every replayed page goes to disk before the new txn state does.
        self.service().write_all(true)?;

        Ok(new_next)
    }

    fn perform_redo(&self, info: &mut RecoveryInfo) -> Result<()> {
        let mut curr = info.first_lsn;
        info!(first = %info.first_lsn, next = %info.next_lsn, "starting redo pass");

        let mut reader_file = curr.file_no;
        let mut reader = self.recovery_reader(curr)?;

        while curr < info.next_lsn {
            if curr.file_no != reader_file {
                reader = self.recovery_reader(curr)?;
                reader_file = curr.file_no;
            }
            reader.set_position(curr.offset);

            let record_type = WalRecordType::from_id(reader.read_u8()?)?;
            let txn_id = reader.read_u32()?;
            debug!(%curr, ?record_type, txn_id, "redoing record");

            if record_type != WalRecordType::StartTxn {
                // Skip the prevLSN field.
                reader.move_position(6);
            }

            info.update_info(txn_id, curr);

            match record_type {
                WalRecordType::StartTxn => {
                    reader.move_position(1);
                }
                WalRecordType::CommitTxn | WalRecordType::AbortTxn => {
                    info.record_txn_completed(txn_id);
                    reader.move_position(1);
                }
                WalRecordType::UpdatePage | WalRecordType::UpdatePageRedoOnly => {
                    let filename = reader.read_var_string255()?;
                    let page_no = reader.read_u16()? as u32;
                    let num_segments = reader.read_u16()?;

                    let file = self.service().open_db_file(&filename)?;
                    // The page may never have been flushed before the
                    // crash; materialize it zero-filled in that case.
                    let page = self.service().load_db_page(&file, page_no, true)?;
                    debug!(%filename, page_no, num_segments, "replaying page update");

                    for _ in 0..num_segments {
                        let index = reader.read_u16()? as usize;
                        let len = reader.read_u16()? as usize;
                        if record_type == WalRecordType::UpdatePage {
                            reader.move_position(len as i64);
                        }
                        let mut redo_data = vec![0u8; len];
                        reader.read_exact(&mut redo_data)?;
                        page.write(index, &redo_data)?;
                    }

                    // Skip the trailing startOff and type byte.
                    reader.move_position(5);
                }
            }

            curr = WalManager::compute_next_lsn(curr.file_no, reader.position());
        }

        ensure!(
            curr == info.next_lsn,
            DbError::Corruption(format!(
                "redo pass ended at {} but the transaction state says {}",
                curr, info.next_lsn
            ))
        );

        info!(
            incomplete = info.incomplete_txns.len(),
            "redo pass complete"
        );
        Ok(())
    }

    fn perform_undo(
        &self,
        mut next: LogSequenceNumber,
        info: &mut RecoveryInfo,
    ) -> Result<LogSequenceNumber> {
        let mut curr = info.next_lsn;
        info!(from = %curr, "starting undo pass");

        while info.has_incomplete_txns() {
            let mut file_no = curr.file_no;
            let mut offset = curr.offset;

            if offset < WAL_OFFSET_FIRST_RECORD {
                bail!(DbError::Corruption(format!(
                    "undo pass overshot the records of WAL file {} (position {})",
                    file_no, offset
                )));
            }

            if offset == WAL_OFFSET_FIRST_RECORD {
                // At the top of this file; hop to the previous one via the
                // prev-file-end field.
                let mut header = self.recovery_reader(LogSequenceNumber::new(file_no, 0))?;
                header.set_position(WAL_OFFSET_PREV_FILE_END);
                let prev_end = header.read_u32()?;
                if prev_end == 0 {
                    debug!("reached the very start of the write-ahead log");
                    break;
                }
                file_no = if file_no == 0 {
                    MAX_WAL_FILE_NUMBER
                } else {
                    file_no - 1
                };
                offset = prev_end;
                curr = LogSequenceNumber::new(file_no, offset);
            }

            if curr <= info.first_lsn {
                break;
            }

            // Read the terminator byte, then locate the record start.
            let mut reader = self.recovery_reader(LogSequenceNumber::new(file_no, offset - 1))?;
            let record_type = WalRecordType::from_id(reader.read_u8()?)?;

            let start = match record_type {
                WalRecordType::StartTxn => offset - 6,
                WalRecordType::CommitTxn | WalRecordType::AbortTxn => offset - 12,
                WalRecordType::UpdatePage | WalRecordType::UpdatePageRedoOnly => {
                    reader.set_position(offset - 5);
                    reader.read_u32()?
                }
            };

            let rec_lsn = LogSequenceNumber::new(file_no, start);
            if rec_lsn < info.first_lsn {
                break;
            }

            reader.set_position(start + 1); // past the leading type byte
            let txn_id = reader.read_u32()?;

            if info.is_txn_complete(txn_id) || !info.incomplete_txns.contains_key(&txn_id) {
                curr = rec_lsn;
                continue;
            }

            debug!(lsn = %rec_lsn, ?record_type, txn_id, "undoing record");

            match record_type {
                WalRecordType::StartTxn => {
                    let chain = info
                        .last_lsn(txn_id)
                        .expect("incomplete transaction without a last LSN");
                    let (_, new_next) =
                        self.write_txn_record(next, WalRecordType::AbortTxn, txn_id, Some(chain))?;
                    next = new_next;
                    info.record_txn_completed(txn_id);
                    info!(txn_id, "aborted incomplete transaction");
                }

                WalRecordType::CommitTxn | WalRecordType::AbortTxn => {
                    bail!(DbError::Corruption(format!(
                        "found a {:?} record for supposedly incomplete transaction {}",
                        record_type, txn_id
                    )));
                }

                WalRecordType::UpdatePage => {
                    reader.move_position(6); // prevLSN
                    let filename = reader.read_var_string255()?;
                    let page_no = reader.read_u16()? as u32;
                    let num_segments = reader.read_u16()?;

                    let file = self.service().open_db_file(&filename)?;
                    let page = self.service().load_db_page(&file, page_no, false)?;
                    debug!(%filename, page_no, num_segments, "reverting page update");

                    let redo_only = WalManager::apply_undo_and_gen_redo_only_data(
                        &mut reader,
                        &page,
                        num_segments,
                    )?;

                    let chain = info
                        .last_lsn(txn_id)
                        .expect("incomplete transaction without a last LSN");
                    let (written, new_next) = self.write_redo_only_update_record(
                        next,
                        txn_id,
                        chain,
                        &page,
                        num_segments,
                        &redo_only,
                    )?;
                    info.update_info(txn_id, written);
                    next = new_next;
                }

                WalRecordType::UpdatePageRedoOnly => {
                    // Compensation records are never undone.
                }
            }

            curr = rec_lsn;
        }

        info!("undo pass complete");
        Ok(next)
    }

    fn recovery_reader(&self, lsn: LogSequenceNumber) -> Result<FileReader<'_>> {
        let file = self.open_wal_file(lsn.file_no)?;
        let mut reader = FileReader::new(self.service(), file);
        reader.set_position(lsn.offset);
        Ok(reader)
    }
}
