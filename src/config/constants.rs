//! # Engine Configuration Constants
//!
//! Interdependent constants are co-located here so that a change to one is
//! made in sight of the values that depend on it.
//!
//! ```text
//! DEFAULT_PAGE_SIZE (8192)
//!       │
//!       ├─> MIN_PAGE_SIZE / MAX_PAGE_SIZE bound the valid range
//!       │     (powers of two; the page-0 header encodes log2(size) - 9
//!       │      in a single byte, so 512..=65536 is exactly representable)
//!       │
//!       └─> DEFAULT_BUFFER_POOL_BYTES must hold several pages at the
//!           largest page size or eviction thrashes
//!
//! MAX_WAL_FILE_SIZE (10 MiB)
//!       │
//!       └─> a WAL record never spans files; the writer rolls to the next
//!           file number (mod MAX_WAL_FILE_NUMBER + 1) before crossing it
//! ```

/// Default size of a database page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest supported page size (encoded header value 0).
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size (encoded header value 7).
pub const MAX_PAGE_SIZE: usize = 65536;

/// Default byte budget for the buffer pool.
pub const DEFAULT_BUFFER_POOL_BYTES: usize = 4 * 1024 * 1024;

/// Largest WAL file number; file numbers wrap to 0 past this.
pub const MAX_WAL_FILE_NUMBER: u16 = 65535;

/// A WAL file is rolled once the next record would cross this size.
pub const MAX_WAL_FILE_SIZE: u32 = 10 * 1024 * 1024;

/// Offset of the previous-file-end field in a WAL file (u32).
pub const WAL_OFFSET_PREV_FILE_END: u32 = 2;

/// Offset of the first record in every WAL file.
pub const WAL_OFFSET_FIRST_RECORD: u32 = 6;

/// When diffing a page against its snapshot, an embedded run of equal bytes
/// no longer than this is folded into the surrounding changed segment; two
/// tiny segments cost more than four redundant bytes.
pub const RUN_MERGE_GAP: usize = 4;

/// Name of the single-page transaction-state file.
pub const TXNSTATE_FILENAME: &str = "txnstate.dat";

const _: () = assert!(
    DEFAULT_PAGE_SIZE.is_power_of_two()
        && DEFAULT_PAGE_SIZE >= MIN_PAGE_SIZE
        && DEFAULT_PAGE_SIZE <= MAX_PAGE_SIZE,
    "DEFAULT_PAGE_SIZE must be a supported power of two"
);

const _: () = assert!(
    DEFAULT_BUFFER_POOL_BYTES >= 8 * MAX_PAGE_SIZE,
    "buffer pool budget must hold several pages at the largest page size"
);
