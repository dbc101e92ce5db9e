//! # B+-Tree Pages
//!
//! Page layouts and split helpers for the B+-tree files backing unique
//! indexes. Only the page-level structure lives here; the tree driver that
//! maintains indexes as tables change is an external collaborator.
//!
//! Both page kinds carry their type in byte 0 and an entry count at
//! byte 1:
//!
//! ```text
//! Inner:  | type:u8 | pointerCount:u16 | ptr0:u16 | key0 | ptr1:u16 | ... |
//! Leaf:   | type:u8 | entryCount:u16 | nextLeaf:u16 | key0 | key1 | ... |
//! ```
//!
//! Keys are tuples serialized with the common tuple codec. In an inner
//! page, `key[i]` separates the key ranges reachable through `ptr[i]` and
//! `ptr[i+1]`, so there is always one more pointer than keys.

pub mod inner;
pub mod leaf;

use eyre::{bail, Result};

use crate::error::DbError;

pub use inner::InnerPage;
pub use leaf::LeafPage;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BTreePageType {
    Inner = 1,
    Leaf = 2,
}

impl BTreePageType {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => BTreePageType::Inner,
            2 => BTreePageType::Leaf,
            other => bail!(DbError::Corruption(format!(
                "unknown B+-tree page type {}",
                other
            ))),
        })
    }
}

/// Offset of the page-type byte.
pub const OFFSET_PAGE_TYPE: usize = 0;
/// Offset of the pointer/entry count.
pub const OFFSET_ENTRY_COUNT: usize = 1;
/// First byte of page payload (inner pages).
pub const OFFSET_FIRST_POINTER: usize = 3;
/// Offset of a leaf's next-leaf pointer.
pub const OFFSET_NEXT_LEAF: usize = 3;
/// First byte of leaf payload.
pub const OFFSET_FIRST_LEAF_ENTRY: usize = 5;
