//! Files: a name and a data chain holding the contents.
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::allocator::{DataBlock, Pool};
use crate::store::Store;
use crate::{Error, Result};

/// Handle to a file. The size of a file is the capacity of its chain,
/// which only grows.
#[derive(Clone)]
pub struct File {
    store: Arc<Store>,
    name: String,
    head: u64,
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("head", &self.head)
            .finish()
    }
}

impl File {
    pub(crate) fn new(store: Arc<Store>, name: String, head: u64) -> File {
        File { store, name, head }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset of the first block of the file's chain.
    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn size(&self) -> Result<u64> {
        let _guard = self.store.guard()?;
        self.chain(&self.store.pool())?.data_chain_capacity()
    }

    /// Read `length` bytes starting at `offset`.
    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let _guard = self.store.guard()?;
        self.chain(&self.store.pool())?.read(offset, buf)?;
        trace!(file = %self.name, offset, length = buf.len(), "read");
        Ok(())
    }

    /// The whole contents, trailing zeros included.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let _guard = self.store.guard()?;
        let chain = self.chain(&self.store.pool())?;
        let size = chain.data_chain_capacity()?;
        if size > self.store.config().max_chunk_size as u64 {
            return Err(Error::InvalidArgument(format!(
                "file '{}' has {} bytes, too many to read at once",
                self.name, size
            )));
        }
        let mut buf = vec![0u8; size as usize];
        chain.read(0, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at `offset`, growing the file when the write ends past
    /// its size. Nothing is written if the growth fails.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let _guard = self.store.guard()?;
        self.chain(&self.store.pool())?.write(offset, data)?;
        trace!(file = %self.name, offset, length = data.len(), "wrote");
        Ok(())
    }

    fn chain<'a>(&self, pool: &Pool<'a>) -> Result<DataBlock<'a>> {
        pool.data_block_at(self.head)
    }
}
