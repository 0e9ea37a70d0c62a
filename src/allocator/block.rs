use std::cell::Cell;

use super::*;

/// A block addressed by its start offset.
///
/// Blocks are cheap views built on demand; type and length are cached after
/// the first read. Never keep one across a split or a merge of its
/// neighbourhood, the cached values go stale.
#[derive(Clone)]
pub struct Block<'a> {
    pool: Pool<'a>,
    start: u64,
    kind: Cell<Option<u8>>,
    length: Cell<Option<u64>>,
}

impl<'a> fmt::Debug for Block<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("start", &self.start)
            .field("kind", &self.kind.get())
            .field("length", &self.length.get())
            .finish()
    }
}

/// Public interface
impl<'a> Block<'a> {
    pub fn new(pool: Pool<'a>, start: u64) -> Result<Block<'a>> {
        if start < pool.first_block || start >= pool.end {
            return Err(Error::InvalidArgument(format!(
                "illegal block start {}, must be between {} and {}",
                start, pool.first_block, pool.end
            )));
        }
        Ok(Block {
            pool,
            start,
            kind: Cell::new(None),
            length: Cell::new(None),
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn pool(&self) -> &Pool<'a> {
        &self.pool
    }

    pub fn is_free(&self) -> Result<bool> {
        let kind = match self.kind.get() {
            Some(kind) => kind,
            None => {
                let kind = self.pool.read_u8(self.start)?;
                if kind != FREE_BLOCK && kind != DATA_BLOCK {
                    return Err(Error::Inconsistent(format!(
                        "unknown block type {} at {}",
                        kind, self.start
                    )));
                }
                self.kind.set(Some(kind));
                kind
            }
        };
        Ok(kind == FREE_BLOCK)
    }

    pub fn set_free(&self) -> Result<()> {
        self.set_kind(FREE_BLOCK)
    }

    pub fn set_data(&self) -> Result<()> {
        self.set_kind(DATA_BLOCK)
    }

    pub fn length(&self) -> Result<u64> {
        if let Some(length) = self.length.get() {
            return Ok(length);
        }
        let length = self.pool.read_u64(self.start + LENGTH_OFFSET)?;
        if length < SERVICE_BYTES || length > self.pool.end - self.start {
            return Err(Error::Inconsistent(format!(
                "block at {} has impossible length {}",
                self.start, length
            )));
        }
        self.length.set(Some(length));
        Ok(length)
    }

    /// Write the length into the head and the mirrored footer.
    pub fn set_length(&self, length: u64) -> Result<()> {
        self.pool.write_u64(self.start + LENGTH_OFFSET, length)?;
        self.pool.write_u64(self.start + length - LENGTH_BYTES, length)?;
        self.length.set(Some(length));
        Ok(())
    }

    pub fn data_capacity(&self) -> Result<u64> {
        Ok(self.length()? - SERVICE_BYTES)
    }

    /// The block physically following this one, if any.
    pub fn next_block(&self) -> Result<Option<Block<'a>>> {
        let next = self.start + self.length()?;
        if next < self.pool.end {
            Ok(Some(Block::new(self.pool, next)?))
        } else {
            Ok(None)
        }
    }

    /// The block physically preceding this one, found through its footer.
    pub fn previous_block(&self) -> Result<Option<Block<'a>>> {
        if self.start == self.pool.first_block {
            return Ok(None);
        }
        let length = self.pool.read_u64(self.start - LENGTH_BYTES)?;
        if length < SERVICE_BYTES || length > self.start - self.pool.first_block {
            return Err(Error::Inconsistent(format!(
                "footer before {} holds impossible length {}",
                self.start, length
            )));
        }
        Ok(Some(Block::new(self.pool, self.start - length)?))
    }

    pub fn fill_data_space_as_empty(&self) -> Result<()> {
        self.fill_with_zeros(self.start + DATA_OFFSET, self.data_capacity()?)
    }

    /// Zero `bytes` bytes at `position`, one bounded chunk at a time.
    pub fn fill_with_zeros(&self, position: u64, bytes: u64) -> Result<()> {
        self.pool.fill_zeros(position, bytes)
    }

    pub fn find_first_free_block(&self) -> Result<FreeBlock<'a>> {
        let first = self.pool.first_block()?;
        if first.is_free()? {
            return Ok(FreeBlock::new(first));
        }
        first.find_next_free_block()
    }

    // Linear scan. Caching the first free position would speed this up.
    pub fn find_next_free_block(&self) -> Result<FreeBlock<'a>> {
        let mut block = self.clone();
        loop {
            block = match block.next_block()? {
                Some(next) => next,
                None => {
                    return Err(Error::NotEnoughFreeSpace {
                        requested: self.pool.min_data_capacity,
                        available: 0,
                    })
                }
            };
            if block.is_free()? {
                return Ok(FreeBlock::new(block));
            }
        }
    }
}

/// Internal functions
impl<'a> Block<'a> {
    /// Drop cached fields so the next access rereads them.
    pub(crate) fn forget(&self) {
        self.kind.set(None);
        self.length.set(None);
    }

    fn set_kind(&self, kind: u8) -> Result<()> {
        self.pool.write_u8(self.start, kind)?;
        self.kind.set(Some(kind));
        Ok(())
    }

    /// Free payload capacity from this block (inclusive) to the end,
    /// skipping the block starting at `skip`. Stops counting once `enough`
    /// is reached.
    pub(crate) fn free_capacity_from(&self, skip: Option<u64>, enough: u64) -> Result<u64> {
        let mut total = 0u64;
        let mut current = Some(self.clone());
        while let Some(block) = current {
            if block.is_free()? && Some(block.start) != skip {
                total += block.data_capacity()?;
                if total >= enough {
                    break;
                }
            }
            current = block.next_block()?;
        }
        Ok(total)
    }
}
