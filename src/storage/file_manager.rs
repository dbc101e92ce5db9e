//! # File Manager
//!
//! Lowest storage layer: creates, opens and removes database files and moves
//! whole pages between disk and caller-supplied buffers. Everything above
//! this layer (buffer pool, storage service) deals in pinned pages; nothing
//! above it performs raw file I/O.
//!
//! ## Page-0 header
//!
//! Every database file starts with a two-byte header on page 0:
//!
//! ```text
//! Offset  Size  Description
//! 0       1     File type id (DBFileType)
//! 1       1     log2(pageSize) - 9   (8192 -> 4)
//! ```
//!
//! The remaining bytes of page 0 belong to the file's owner (table schema,
//! txn-state fields, WAL previous-file offset, ...).
//!
//! ## I/O discipline
//!
//! All reads and writes are page-aligned and page-sized, issued with
//! positional I/O so no seek state is shared between callers. Reading past
//! end-of-file is an error unless the caller asks for the file to be
//! extended, in which case the missing page reads back as zeroes and the
//! file grows when the page is first written.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use eyre::{bail, ensure, Result, WrapErr};
use tracing::debug;

use crate::config::{decode_page_size, encode_page_size, is_valid_page_size};
use crate::error::DbError;

/// On-disk file kinds, with stable single-byte ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DBFileType {
    HeapDataFile = 1,
    ColStoreDataFile = 2,
    BTreeIndexFile = 3,
    TxnStateFile = 4,
    WriteAheadLogFile = 5,
}

impl DBFileType {
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            1 => DBFileType::HeapDataFile,
            2 => DBFileType::ColStoreDataFile,
            3 => DBFileType::BTreeIndexFile,
            4 => DBFileType::TxnStateFile,
            5 => DBFileType::WriteAheadLogFile,
            other => bail!(DbError::Corruption(format!(
                "unrecognized file type id {}",
                other
            ))),
        })
    }
}

/// An open database file: handle plus the metadata decoded from its header.
///
/// `file_id` is a process-local identity used to key buffer-pool frames; it
/// is not persisted.
#[derive(Debug)]
pub struct DBFile {
    file: File,
    file_id: u32,
    file_type: DBFileType,
    page_size: usize,
    name: String,
    path: PathBuf,
}

impl DBFile {
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn file_type(&self) -> DBFileType {
        self.file_type
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Logical name relative to the base directory, e.g. `"wal-00003.log"`
    /// or `"Employee/Employee.tbl"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of whole pages currently in the file.
    pub fn page_count(&self) -> Result<u32> {
        let len = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", self.name))?
            .len();
        Ok((len / self.page_size as u64) as u32)
    }
}

#[derive(Debug)]
pub struct FileManager {
    base_dir: PathBuf,
    next_file_id: AtomicU32,
}

impl FileManager {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).wrap_err_with(|| {
            format!("failed to create data directory '{}'", base_dir.display())
        })?;

        Ok(Self {
            base_dir,
            next_file_id: AtomicU32::new(1),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Creates a new database file and writes its page-0 header. Fails if
    /// the file already exists.
    pub fn create_db_file(
        &self,
        name: &str,
        file_type: DBFileType,
        page_size: usize,
    ) -> Result<DBFile> {
        ensure!(
            is_valid_page_size(page_size),
            DbError::InvalidArgument(format!("unsupported page size {}", page_size))
        );

        let path = self.resolve(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).wrap_err_with(|| {
                format!("failed to create table directory '{}'", parent.display())
            })?;
        }

        debug!(name, ?file_type, page_size, "creating database file");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                eyre::Report::new(DbError::Io(format!(
                    "failed to create '{}': {}",
                    path.display(),
                    e
                )))
            })?;

        let mut page0 = vec![0u8; page_size];
        page0[0] = file_type as u8;
        page0[1] = encode_page_size(page_size);
        file.write_all_at(&page0, 0)
            .wrap_err_with(|| format!("failed to write header page of '{}'", name))?;

        Ok(DBFile {
            file,
            file_id: self.next_file_id.fetch_add(1, Ordering::Relaxed),
            file_type,
            page_size,
            name: name.to_string(),
            path,
        })
    }

    /// Opens an existing file, decoding and validating the page-0 header.
    pub fn open_db_file(&self, name: &str) -> Result<DBFile> {
        let path = self.resolve(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                eyre::Report::new(DbError::Io(format!(
                    "failed to open '{}': {}",
                    path.display(),
                    e
                )))
            })?;

        let mut header = [0u8; 2];
        file.read_exact_at(&mut header, 0)
            .map_err(|_| DbError::Corruption(format!("'{}' is too short for a header", name)))?;

        let file_type = DBFileType::from_id(header[0])
            .wrap_err_with(|| format!("while opening '{}'", name))?;
        let page_size = decode_page_size(header[1])
            .map_err(|_| DbError::Corruption(format!("'{}' has a bad page-size byte", name)))?;

        Ok(DBFile {
            file,
            file_id: self.next_file_id.fetch_add(1, Ordering::Relaxed),
            file_type,
            page_size,
            name: name.to_string(),
            path,
        })
    }

    pub fn file_exists(&self, name: &str) -> bool {
        self.resolve(name).exists()
    }

    /// Reads one page into `buf`. Past end-of-file this fails unless
    /// `extend` is set, in which case the page reads back zero-filled.
    pub fn read_page(&self, file: &DBFile, page_no: u32, buf: &mut [u8], extend: bool) -> Result<()> {
        ensure!(
            buf.len() == file.page_size,
            DbError::InvalidArgument(format!(
                "page buffer is {} bytes but '{}' uses {}-byte pages",
                buf.len(),
                file.name,
                file.page_size
            ))
        );

        let offset = page_no as u64 * file.page_size as u64;
        match file.file.read_exact_at(buf, offset) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if extend {
                    buf.fill(0);
                    Ok(())
                } else {
                    bail!(DbError::Io(format!(
                        "EOF reading page {} of '{}'",
                        page_no, file.name
                    )))
                }
            }
            Err(e) => bail!(DbError::Io(format!(
                "failed to read page {} of '{}': {}",
                page_no, file.name, e
            ))),
        }
    }

    /// Writes one page, extending the file as needed.
    pub fn write_page(&self, file: &DBFile, page_no: u32, buf: &[u8]) -> Result<()> {
        ensure!(
            buf.len() == file.page_size,
            DbError::InvalidArgument(format!(
                "page buffer is {} bytes but '{}' uses {}-byte pages",
                buf.len(),
                file.name,
                file.page_size
            ))
        );

        let offset = page_no as u64 * file.page_size as u64;
        file.file.write_all_at(buf, offset).map_err(|e| {
            eyre::Report::new(DbError::Io(format!(
                "failed to write page {} of '{}': {}",
                page_no, file.name, e
            )))
        })
    }

    pub fn sync_db_file(&self, file: &DBFile) -> Result<()> {
        file.file.sync_all().map_err(|e| {
            eyre::Report::new(DbError::Io(format!(
                "fsync of '{}' failed: {}",
                file.name, e
            )))
        })
    }

    /// Truncates the file to exactly `page_count` pages.
    pub fn truncate(&self, file: &DBFile, page_count: u32) -> Result<()> {
        file.file
            .set_len(page_count as u64 * file.page_size as u64)
            .map_err(|e| {
                eyre::Report::new(DbError::Io(format!(
                    "failed to truncate '{}' to {} pages: {}",
                    file.name, page_count, e
                )))
            })
    }

    pub fn delete_db_file(&self, file: &DBFile) -> Result<()> {
        fs::remove_file(&file.path).map_err(|e| {
            eyre::Report::new(DbError::Io(format!(
                "failed to delete '{}': {}",
                file.name, e
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_writes_decodable_header() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        let created = fm
            .create_db_file("t/t.tbl", DBFileType::HeapDataFile, 8192)
            .unwrap();
        assert_eq!(created.page_count().unwrap(), 1);
        drop(created);

        let opened = fm.open_db_file("t/t.tbl").unwrap();
        assert_eq!(opened.file_type(), DBFileType::HeapDataFile);
        assert_eq!(opened.page_size(), 8192);
    }

    #[test]
    fn create_fails_when_file_exists() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        fm.create_db_file("dup.dat", DBFileType::TxnStateFile, 512)
            .unwrap();
        assert!(fm
            .create_db_file("dup.dat", DBFileType::TxnStateFile, 512)
            .is_err());
    }

    #[test]
    fn read_past_eof_fails_unless_extending() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let file = fm
            .create_db_file("e.tbl", DBFileType::HeapDataFile, 512)
            .unwrap();

        let mut buf = vec![0xAAu8; 512];
        assert!(fm.read_page(&file, 5, &mut buf, false).is_err());

        fm.read_page(&file, 5, &mut buf, true).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn pages_round_trip_and_truncate_shrinks() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        let file = fm
            .create_db_file("r.tbl", DBFileType::HeapDataFile, 512)
            .unwrap();

        let page = vec![0x5Cu8; 512];
        fm.write_page(&file, 3, &page).unwrap();
        assert_eq!(file.page_count().unwrap(), 4);

        let mut back = vec![0u8; 512];
        fm.read_page(&file, 3, &mut back, false).unwrap();
        assert_eq!(back, page);

        fm.truncate(&file, 2).unwrap();
        assert_eq!(file.page_count().unwrap(), 2);
        assert!(fm.read_page(&file, 3, &mut back, false).is_err());
    }
}
