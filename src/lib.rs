//! # NanoDB — Educational Relational Database Engine
//!
//! A small relational engine built around four hard subsystems: a
//! page-oriented storage substrate with a buffer pool, a write-ahead log
//! with redo/undo crash recovery, heap and column-store table managers,
//! and a cost-based query pipeline with dynamic-programming join
//! ordering.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        Engine Handle (Database)          │
//! ├──────────────────────────────────────────┤
//! │  Planner (DP join ordering)  │ Commands  │
//! ├──────────────────────────────────────────┤
//! │     Plan Nodes (pull-based iterators)    │
//! ├──────────────────────────────────────────┤
//! │ Heap Tables │ Column Store │ B+-Tree Pgs │
//! ├──────────────────────────────────────────┤
//! │  Transactions  │     Write-Ahead Log     │
//! ├──────────────────────────────────────────┤
//! │  Storage Service / Buffer Pool / Files   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## The WAL rule
//!
//! Every mutation is logged as a byte-level page diff before the mutated
//! page can be written back; commit forces the log through the COMMIT
//! record before returning. On open, recovery replays the log forward and
//! rolls losers back, so a crash at any point leaves only committed data.
//!
//! ## File layout (per data directory)
//!
//! ```text
//! datafiles/
//! ├── Employee/
//! │   ├── Employee.tbl        # heap table (or column-store header)
//! │   └── Employee.id.tbl     # per-column data (column store)
//! ├── wal-00000.log           # write-ahead log segments
//! └── txnstate.dat            # {nextTxnId, firstLSN, nextLSN}
//! ```
//!
//! ## What is deliberately left out
//!
//! SQL text parsing, the interactive shell, networking, result
//! formatting, MVCC, and full index maintenance (only the B+-tree page
//! layouts and split helpers are here). The engine supports one writer at
//! a time under a cooperatively-scheduled evaluator.

pub mod btree;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod expressions;
pub mod plans;
pub mod qeval;
pub mod relations;
pub mod storage;
pub mod tables;
pub mod transactions;
pub mod wal;

pub use commands::{Command, FromClause, JoinType, SelectClause, SelectValue, TableStorageKind};
pub use config::DatabaseConfig;
pub use database::{CommandResult, Database, DatabaseBuilder, Session, TupleStream};
pub use error::DbError;
pub use relations::{ColumnInfo, ColumnName, ColumnType, Schema, SqlType, Tuple, TupleLiteral, Value};
