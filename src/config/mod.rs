//! # Database Configuration
//!
//! A [`DatabaseConfig`] can be built programmatically through
//! [`Database::builder`](crate::database::Database::builder) or decoded from
//! a string-keyed properties map, which recognizes:
//!
//! | Key | Effect |
//! |-----|--------|
//! | `nanodb.transactions` | `"on"` enables WAL + recovery, `"off"` disables durability |
//! | `nanodb.basedir` | root directory for persisted files |
//! | `nanodb.pagesize` | default page size (supported power of two) |
//! | `nanodb.buffersize` | buffer pool byte budget |
//!
//! Unrecognized keys are ignored so callers can share one properties map
//! across components.

pub mod constants;

use std::collections::HashMap;
use std::path::PathBuf;

use eyre::{ensure, Result, WrapErr};

pub use constants::*;

pub const PROP_TXNS: &str = "nanodb.transactions";
pub const PROP_BASEDIR: &str = "nanodb.basedir";
pub const PROP_PAGESIZE: &str = "nanodb.pagesize";
pub const PROP_BUFFERSIZE: &str = "nanodb.buffersize";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub base_dir: PathBuf,
    pub page_size: usize,
    pub buffer_pool_bytes: usize,
    pub transactions: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("datafiles"),
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_bytes: DEFAULT_BUFFER_POOL_BYTES,
            transactions: true,
        }
    }
}

impl DatabaseConfig {
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = props.get(PROP_TXNS) {
            config.transactions = v.eq_ignore_ascii_case("on");
        }
        if let Some(v) = props.get(PROP_BASEDIR) {
            config.base_dir = PathBuf::from(v);
        }
        if let Some(v) = props.get(PROP_PAGESIZE) {
            config.page_size = v
                .parse::<usize>()
                .wrap_err_with(|| format!("invalid {} value '{}'", PROP_PAGESIZE, v))?;
        }
        if let Some(v) = props.get(PROP_BUFFERSIZE) {
            config.buffer_pool_bytes = v
                .parse::<usize>()
                .wrap_err_with(|| format!("invalid {} value '{}'", PROP_BUFFERSIZE, v))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            is_valid_page_size(self.page_size),
            "page size {} is not a supported power of two in [{}, {}]",
            self.page_size,
            MIN_PAGE_SIZE,
            MAX_PAGE_SIZE
        );
        ensure!(
            self.buffer_pool_bytes >= 4 * self.page_size,
            "buffer pool budget {} cannot hold four {}-byte pages",
            self.buffer_pool_bytes,
            self.page_size
        );
        Ok(())
    }
}

/// True for powers of two in the supported range.
pub fn is_valid_page_size(size: usize) -> bool {
    size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size)
}

/// Encodes a valid page size for the page-0 header: `log2(size) - 9`.
pub fn encode_page_size(size: usize) -> u8 {
    debug_assert!(is_valid_page_size(size));
    (size.trailing_zeros() - 9) as u8
}

/// Decodes a page-0 header size byte back to a byte count.
pub fn decode_page_size(encoded: u8) -> Result<usize> {
    let size = 1usize
        .checked_shl(u32::from(encoded) + 9)
        .unwrap_or(usize::MAX);
    ensure!(
        is_valid_page_size(size),
        "encoded page size {} is out of range",
        encoded
    );
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_codec_round_trips_all_supported_sizes() {
        for shift in 9..=16 {
            let size = 1usize << shift;
            assert_eq!(decode_page_size(encode_page_size(size)).unwrap(), size);
        }
        assert_eq!(encode_page_size(8192), 4);
    }

    #[test]
    fn decode_rejects_out_of_range_values() {
        assert!(decode_page_size(8).is_err());
        assert!(decode_page_size(250).is_err());
    }

    #[test]
    fn properties_map_overrides_defaults() {
        let mut props = HashMap::new();
        props.insert(PROP_TXNS.to_string(), "off".to_string());
        props.insert(PROP_PAGESIZE.to_string(), "4096".to_string());
        props.insert(PROP_BASEDIR.to_string(), "/tmp/nano".to_string());

        let config = DatabaseConfig::from_properties(&props).unwrap();
        assert!(!config.transactions);
        assert_eq!(config.page_size, 4096);
        assert_eq!(config.base_dir, PathBuf::from("/tmp/nano"));
        assert_eq!(config.buffer_pool_bytes, DEFAULT_BUFFER_POOL_BYTES);
    }

    #[test]
    fn invalid_page_size_is_rejected() {
        let mut props = HashMap::new();
        props.insert(PROP_PAGESIZE.to_string(), "5000".to_string());
        assert!(DatabaseConfig::from_properties(&props).is_err());
    }
}
