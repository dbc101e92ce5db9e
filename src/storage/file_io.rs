//! # Sequential File I/O
//!
//! Position-tracking readers and writers over a [`DBFile`], moving through
//! the buffer pool one page at a time. Values are big-endian and may span
//! page boundaries; the cursor advances transparently. The WAL and the
//! table-schema codecs are the main users.

use std::sync::Arc;

use eyre::Result;

use crate::storage::file_manager::DBFile;
use crate::storage::service::StorageService;

pub struct FileReader<'a> {
    service: &'a StorageService,
    file: Arc<DBFile>,
    position: u32,
}

impl<'a> FileReader<'a> {
    pub fn new(service: &'a StorageService, file: Arc<DBFile>) -> Self {
        Self {
            service,
            file,
            position: 0,
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn move_position(&mut self, delta: i64) {
        self.position = (self.position as i64 + delta) as u32;
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let page_size = self.file.page_size() as u32;
        let mut filled = 0usize;
        while filled < buf.len() {
            let page_no = self.position / page_size;
            let offset = (self.position % page_size) as usize;
            let n = (buf.len() - filled).min(page_size as usize - offset);

            let page = self.service.load_db_page(&self.file, page_no, false)?;
            page.read(offset, &mut buf[filled..filled + n])?;

            filled += n;
            self.position += n as u32;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Reads a string with a 1-byte length prefix (up to 255 bytes).
    pub fn read_var_string255(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub struct FileWriter<'a> {
    service: &'a StorageService,
    file: Arc<DBFile>,
    position: u32,
}

impl<'a> FileWriter<'a> {
    pub fn new(service: &'a StorageService, file: Arc<DBFile>) -> Self {
        Self {
            service,
            file,
            position: 0,
        }
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let page_size = self.file.page_size() as u32;
        let mut written = 0usize;
        while written < bytes.len() {
            let page_no = self.position / page_size;
            let offset = (self.position % page_size) as usize;
            let n = (bytes.len() - written).min(page_size as usize - offset);

            let page = self.service.load_db_page(&self.file, page_no, true)?;
            page.write(offset, &bytes[written..written + n])?;

            written += n;
            self.position += n as u32;
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write(&value.to_be_bytes())
    }

    /// Writes a string with a 1-byte length prefix; longer than 255 bytes is
    /// a caller bug.
    pub fn write_var_string255(&mut self, s: &str) -> Result<()> {
        debug_assert!(s.len() <= 255, "vstr255 overflow: {} bytes", s.len());
        self.write_u8(s.len() as u8)?;
        self.write(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_POOL_BYTES;
    use crate::storage::buffer::BufferPool;
    use crate::storage::file_manager::{DBFileType, FileManager};
    use tempfile::tempdir;

    fn service() -> (tempfile::TempDir, StorageService) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::new(dir.path()).unwrap());
        let pool = Arc::new(BufferPool::new(Arc::clone(&fm), DEFAULT_BUFFER_POOL_BYTES));
        (dir, StorageService::new(fm, pool))
    }

    #[test]
    fn values_round_trip_across_page_boundaries() {
        let (_dir, service) = service();
        let file = service
            .create_db_file("w.log", DBFileType::WriteAheadLogFile, 512)
            .unwrap();

        let mut writer = FileWriter::new(&service, Arc::clone(&file));
        writer.set_position(508);
        writer.write_u32(0x01020304).unwrap(); // straddles pages 0 and 1
        writer.write_var_string255("Employee/Employee.tbl").unwrap();
        writer.write_u16(0xBEEF).unwrap();

        let mut reader = FileReader::new(&service, file);
        reader.set_position(508);
        assert_eq!(reader.read_u32().unwrap(), 0x01020304);
        assert_eq!(reader.read_var_string255().unwrap(), "Employee/Employee.tbl");
        assert_eq!(reader.read_u16().unwrap(), 0xBEEF);
        assert_eq!(reader.position(), 508 + 4 + 22 + 2);
    }

    #[test]
    fn move_position_steps_backwards() {
        let (_dir, service) = service();
        let file = service
            .create_db_file("w.log", DBFileType::WriteAheadLogFile, 512)
            .unwrap();

        let mut writer = FileWriter::new(&service, Arc::clone(&file));
        writer.set_position(6);
        writer.write_u8(0x11).unwrap();
        writer.write_u8(0x22).unwrap();

        let mut reader = FileReader::new(&service, file);
        reader.set_position(8);
        reader.move_position(-1);
        assert_eq!(reader.read_u8().unwrap(), 0x22);
    }
}
