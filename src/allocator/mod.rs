//! Block allocator carved out of a single device.
//!
//! A block is a contiguous byte range interpreted as follows:
//! - [0..1]          block_type: u8 (`FREE_BLOCK` or `DATA_BLOCK`)
//! - [1..9]          length: u64, full block length including service bytes
//! - [9..17]         next: u64, next block of a data chain or `NO_NEXT`
//! - [17..length-8]  payload
//! - [length-8..]    length again, so the following block can find this one
//!
//! All integers are big-endian. Blocks tile the device from the first block
//! position to the end without gaps; there is no free list, every block is
//! reached by offset arithmetic.
use std::fmt;

use crate::config::Config;
use crate::device::Device;
use crate::{Error, Result};

mod block;
mod data;
mod free;

pub use self::block::Block;
pub use self::data::DataBlock;
pub use self::free::FreeBlock;

pub const TYPE_BYTES: u64 = 1;
pub const LENGTH_BYTES: u64 = 8;
pub const POINTER_BYTES: u64 = 8;
pub const SERVICE_BYTES: u64 = TYPE_BYTES + LENGTH_BYTES + POINTER_BYTES + LENGTH_BYTES;

pub const LENGTH_OFFSET: u64 = TYPE_BYTES;
pub const NEXT_OFFSET: u64 = LENGTH_OFFSET + LENGTH_BYTES;
pub const DATA_OFFSET: u64 = NEXT_OFFSET + POINTER_BYTES;

pub const FREE_BLOCK: u8 = 0;
pub const DATA_BLOCK: u8 = 1;

/// Tail marker of a data chain, -2 as a signed 64-bit value.
pub const NO_NEXT: u64 = 0xFFFF_FFFF_FFFF_FFFE;

/// A view over the block-tiled part of a device.
#[derive(Clone, Copy)]
pub struct Pool<'a> {
    device: &'a dyn Device,
    first_block: u64,
    end: u64,
    min_data_capacity: u64,
    max_chunk_size: usize,
}

/// Summary of one block, as produced by `Pool::blocks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub start: u64,
    pub length: u64,
    pub capacity: u64,
    pub free: bool,
    pub next: Option<u64>,
}

impl<'a> fmt::Debug for Pool<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("Pool");
        s.field("first_block", &self.first_block).field("end", &self.end);
        match self.blocks() {
            Ok(blocks) => s.field("blocks", &blocks),
            Err(e) => s.field("error", &e.to_string()),
        };
        s.finish()
    }
}

/// Public interface
impl<'a> Pool<'a> {
    pub fn new(device: &'a dyn Device, first_block: u64, config: &Config) -> Pool<'a> {
        Pool {
            device,
            first_block,
            end: device.len(),
            min_data_capacity: config.min_data_capacity,
            max_chunk_size: config.max_chunk_size.max(1),
        }
    }

    pub fn first_block_position(&self) -> u64 {
        self.first_block
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn min_data_capacity(&self) -> u64 {
        self.min_data_capacity
    }

    /// No block may be shorter than this.
    pub fn min_block_length(&self) -> u64 {
        SERVICE_BYTES + self.min_data_capacity
    }

    /// Turn the whole pool into a single free block.
    pub fn format(&self) -> Result<FreeBlock<'a>> {
        if self.first_block >= self.end {
            return Err(Error::InvalidArgument(format!(
                "first block position {} is past the device end {}",
                self.first_block, self.end
            )));
        }
        FreeBlock::new(self.block_at(self.first_block)?).initialize(self.end - self.first_block)
    }

    pub fn block_at(&self, start: u64) -> Result<Block<'a>> {
        Block::new(*self, start)
    }

    pub fn first_block(&self) -> Result<Block<'a>> {
        self.block_at(self.first_block)
    }

    /// Head of the chain starting at `start`, which must be a data block.
    pub fn data_block_at(&self, start: u64) -> Result<DataBlock<'a>> {
        let block = self.block_at(start)?;
        if block.is_free()? {
            return Err(Error::Inconsistent(format!(
                "expected a data block at {}, found a free one",
                start
            )));
        }
        Ok(DataBlock::new(block))
    }

    /// Sum of payload capacity over all free blocks.
    pub fn free_capacity(&self) -> Result<u64> {
        self.first_block()?.free_capacity_from(None, u64::MAX)
    }

    /// Walk the whole tiling, checking every block's footer against its head.
    pub fn blocks(&self) -> Result<Vec<BlockInfo>> {
        let mut blocks = Vec::new();
        let mut current = Some(self.first_block()?);
        while let Some(block) = current {
            let length = block.length()?;
            let footer = self.read_u64(block.start() + length - LENGTH_BYTES)?;
            if footer != length {
                return Err(Error::Inconsistent(format!(
                    "block at {} has length {} but footer {}",
                    block.start(),
                    length,
                    footer
                )));
            }
            let free = block.is_free()?;
            let next = if free {
                None
            } else {
                DataBlock::new(block.clone()).next_position()?
            };
            blocks.push(BlockInfo {
                start: block.start(),
                length,
                capacity: length - SERVICE_BYTES,
                free,
                next,
            });
            current = block.next_block()?;
        }
        Ok(blocks)
    }
}

/// Raw device access
impl<'a> Pool<'a> {
    fn read_u8(&self, position: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.device.read_at(position, &mut buf)?;
        Ok(buf[0])
    }

    fn write_u8(&self, position: u64, value: u8) -> Result<()> {
        self.device.write_at(position, &[value])
    }

    fn read_u64(&self, position: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.device.read_at(position, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn write_u64(&self, position: u64, value: u64) -> Result<()> {
        self.device.write_at(position, &value.to_be_bytes())
    }

    fn read(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        self.device.read_at(position, buf)
    }

    fn write(&self, position: u64, buf: &[u8]) -> Result<()> {
        self.device.write_at(position, buf)
    }

    fn fill_zeros(&self, position: u64, bytes: u64) -> Result<()> {
        let chunk = (self.max_chunk_size as u64).min(bytes) as usize;
        let zeros = vec![0u8; chunk];
        let mut written = 0u64;
        while written < bytes {
            let n = (bytes - written).min(chunk as u64) as usize;
            self.device.write_at(position + written, &zeros[..n])?;
            written += n as u64;
        }
        Ok(())
    }

    /// Upper bound for the number of blocks, used to stop runaway chain walks.
    fn max_blocks(&self) -> u64 {
        (self.end - self.first_block) / self.min_block_length() + 1
    }
}

#[cfg(test)]
mod tests;
