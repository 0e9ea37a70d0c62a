use std::ops::Deref;

use tracing::debug;

use super::*;

/// A block known to be unused. Owns allocation.
#[derive(Debug, Clone)]
pub struct FreeBlock<'a> {
    block: Block<'a>,
}

impl<'a> Deref for FreeBlock<'a> {
    type Target = Block<'a>;

    fn deref(&self) -> &Block<'a> {
        &self.block
    }
}

/// Public interface
impl<'a> FreeBlock<'a> {
    pub fn new(block: Block<'a>) -> FreeBlock<'a> {
        FreeBlock { block }
    }

    /// Write the type and length fields. The payload is left as is.
    pub fn initialize(self, length: u64) -> Result<FreeBlock<'a>> {
        check_bounds(&self.block, length)?;
        self.set_free()?;
        self.set_length(length)?;
        Ok(self)
    }

    /// Allocate a chain with at least `data_capacity` payload bytes, starting
    /// from this block. Fails without touching the store when the free blocks
    /// from here to the end cannot hold that much.
    pub fn allocate(self, data_capacity: u64) -> Result<DataBlock<'a>> {
        let available = self.free_capacity_from(None, data_capacity)?;
        if available < data_capacity {
            return Err(Error::NotEnoughFreeSpace {
                requested: data_capacity,
                available,
            });
        }
        if self.data_capacity()? >= data_capacity {
            return self.cut_data_block(data_capacity);
        }

        // Not big enough alone, build a chain
        let first = self.transform_to_data()?;
        let mut current = first.clone();
        let mut remaining = data_capacity - first.data_capacity()?;
        while remaining > 0 {
            let free = current.find_next_free_block()?;
            let next = if free.data_capacity()? >= remaining {
                free.cut_data_block(remaining)?
            } else {
                free.transform_to_data()?
            };
            current.set_next_in_chain(&next)?;
            remaining = remaining.saturating_sub(next.data_capacity()?);
            current = next;
        }
        debug!(head = first.start(), data_capacity, "allocated chain");
        Ok(first)
    }
}

/// Internal functions
impl<'a> FreeBlock<'a> {
    /// Split off a data block for `data_size` bytes, leaving the rest free,
    /// unless the rest would be too small to be a block of its own.
    fn cut_data_block(self, data_size: u64) -> Result<DataBlock<'a>> {
        let length = self.length()?;
        if self.data_capacity()? < data_size {
            return Err(Error::InvalidArgument(format!(
                "cannot cut {} data bytes from the block at {}",
                data_size,
                self.start()
            )));
        }
        let data_length = (SERVICE_BYTES + data_size).max(self.pool().min_block_length());
        if length - data_length < self.pool().min_block_length() {
            return self.transform_to_data();
        }
        let pool = *self.pool();
        let start = self.start();
        let data = DataBlock::new(self.block).initialize(data_length)?;
        FreeBlock::new(pool.block_at(start + data_length)?).initialize(length - data_length)?;
        debug!(start, data_length, rest = length - data_length, "split free block");
        Ok(data)
    }

    fn transform_to_data(self) -> Result<DataBlock<'a>> {
        let length = self.length()?;
        DataBlock::new(self.block).initialize(length)
    }
}

pub(super) fn check_bounds(block: &Block, length: u64) -> Result<()> {
    let min = block.pool().min_block_length();
    if length < min {
        return Err(Error::InvalidArgument(format!(
            "min block length is {}, but the length is {}",
            min, length
        )));
    }
    if block.start() + length > block.pool().end() {
        return Err(Error::NotEnoughFreeSpace {
            requested: length,
            available: block.pool().end() - block.start(),
        });
    }
    Ok(())
}
