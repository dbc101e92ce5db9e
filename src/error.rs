//! # Error Taxonomy
//!
//! Every fallible path in the crate returns `eyre::Result`, with context
//! attached at I/O boundaries. When the *kind* of failure matters to a
//! caller — e.g. the command dispatcher deciding whether a failed statement
//! also poisoned the transaction — a [`DbError`] is attached to the report
//! and can be recovered with `report.downcast_ref::<DbError>()`.
//!
//! ## Kinds
//!
//! | Kind | Meaning | Recovery |
//! |------|---------|----------|
//! | `Io` | underlying file I/O failed | fatal for the operation |
//! | `Corruption` | page or WAL record didn't match its layout | engine refuses to open |
//! | `Transaction` | commit couldn't force the WAL, rollback saw bad records | txn state preserved |
//! | `Schema` | duplicate column, unresolved reference, type mismatch | reported to submitter |
//! | `Execution` | runtime evaluation failure | aborts the query, not the txn |
//! | `InvalidArgument` | programmer error (bad page number, bad slot) | never recovered |

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("I/O failure: {0}")]
    Io(String),

    #[error("corrupt data: {0}")]
    Corruption(String),

    #[error("transaction failure: {0}")]
    Transaction(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DbError {
    /// True when the failure should also mark the session's transaction
    /// for rollback.
    pub fn poisons_transaction(&self) -> bool {
        matches!(self, DbError::Io(_) | DbError::Transaction(_))
    }
}

/// Classifies an arbitrary report, defaulting to `Execution` for errors
/// raised without an explicit kind.
pub fn kind_of(report: &eyre::Report) -> DbError {
    report
        .downcast_ref::<DbError>()
        .cloned()
        .unwrap_or_else(|| DbError::Execution(report.to_string()))
}
