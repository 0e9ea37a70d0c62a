//! Byte-addressed backing stores.
//!
//! Every block access goes through a `Device`, using pread/pwrite style
//! positional I/O so no shared seek position exists.
use std::fs;
use std::os::unix::fs::FileExt;

use parking_lot::RwLock;

use crate::{Error, Result};

pub trait Device: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf` at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = offset.checked_add(len as u64).ok_or_else(|| {
        Error::InvalidArgument(format!("range overflows: offset={} len={}", offset, len))
    })?;
    if end > device_len {
        return Err(Error::InvalidArgument(format!(
            "access out of bounds: offset={} len={} device_len={}",
            offset, len, device_len
        )));
    }
    Ok(())
}

/// A store backed by a regular file.
#[derive(Debug)]
pub struct FileDevice {
    file: fs::File,
    len: u64,
}

impl FileDevice {
    pub fn new(file: fs::File) -> Result<FileDevice> {
        let len = file.metadata()?.len();
        Ok(FileDevice { file, len })
    }

    pub fn file(&self) -> &fs::File {
        &self.file
    }
}

impl Device for FileDevice {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

/// A store living in memory. Handy for tests and for building images
/// before writing them out.
#[derive(Debug)]
pub struct MemDevice {
    buffer: RwLock<Vec<u8>>,
}

impl MemDevice {
    pub fn new(len: usize) -> MemDevice {
        MemDevice::from_bytes(vec![0u8; len])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> MemDevice {
        MemDevice { buffer: RwLock::new(bytes) }
    }

    /// Copy of the whole buffer.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.read().clone()
    }
}

impl Device for MemDevice {
    fn len(&self) -> u64 {
        self.buffer.read().len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let buffer = self.buffer.read();
        check_range(offset, buf.len(), buffer.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&buffer[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut buffer = self.buffer.write();
        check_range(offset, buf.len(), buffer.len() as u64)?;
        let start = offset as usize;
        buffer[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
