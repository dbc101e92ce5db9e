//! # Storage Layer
//!
//! Page-oriented storage for the engine, bottom-up:
//!
//! - [`file_manager`]: create/open/truncate files, page-aligned I/O, fsync
//! - [`page`]: pinned page frames with diff snapshots and page LSNs
//! - [`buffer`]: byte-budgeted pool, LRU eviction, WAL-rule write-back
//! - [`service`]: the one storage surface upper layers use
//! - [`file_io`]: big-endian sequential readers/writers over buffered pages
//!
//! Pages default to 8192 bytes (any power of two in 512..=65536). Page 0 of
//! every file carries a two-byte type/page-size header; the rest of page 0
//! belongs to the file's owner.

pub mod buffer;
pub mod file_io;
pub mod file_manager;
pub mod page;
pub mod service;

pub use buffer::{BufferPool, WalForce};
pub use file_io::{FileReader, FileWriter};
pub use file_manager::{DBFile, DBFileType, FileManager};
pub use page::{DBPage, PageKey};
pub use service::StorageService;

/// Byte offset where file-owner data begins on page 0.
pub const PAGE0_DATA_OFFSET: usize = 2;
