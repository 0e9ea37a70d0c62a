use std::cell::Cell;
use std::ops::Deref;

use tracing::debug;

use super::free::check_bounds;
use super::*;

/// A block holding data, usually the head of a chain.
///
/// A chain is a singly linked list of data blocks through their `next`
/// field. Its capacity is the sum of the members' payload sizes; growth
/// always happens at the tail.
#[derive(Debug, Clone)]
pub struct DataBlock<'a> {
    block: Block<'a>,
    next: Cell<Option<u64>>,
}

impl<'a> Deref for DataBlock<'a> {
    type Target = Block<'a>;

    fn deref(&self) -> &Block<'a> {
        &self.block
    }
}

/// Public interface
impl<'a> DataBlock<'a> {
    pub fn new(block: Block<'a>) -> DataBlock<'a> {
        DataBlock {
            block,
            next: Cell::new(None),
        }
    }

    /// Write all service fields and zero the payload.
    pub fn initialize(self, length: u64) -> Result<DataBlock<'a>> {
        check_bounds(&self.block, length)?;
        self.set_data()?;
        self.set_length(length)?;
        self.set_last_in_chain()?;
        self.fill_data_space_as_empty()?;
        Ok(self)
    }

    /// Offset of the next member, `None` for the tail.
    pub fn next_position(&self) -> Result<Option<u64>> {
        let next = match self.next.get() {
            Some(next) => next,
            None => {
                let next = self.pool().read_u64(self.start() + NEXT_OFFSET)?;
                self.next.set(Some(next));
                next
            }
        };
        Ok(if next == NO_NEXT { None } else { Some(next) })
    }

    pub fn next_in_chain(&self) -> Result<Option<DataBlock<'a>>> {
        match self.next_position()? {
            None => Ok(None),
            Some(position) => {
                let block = Block::new(*self.pool(), position).map_err(|_| {
                    Error::Inconsistent(format!(
                        "block at {} links to {} which is outside the store",
                        self.start(),
                        position
                    ))
                })?;
                Ok(Some(DataBlock::new(block)))
            }
        }
    }

    pub fn set_next_in_chain(&self, next: &DataBlock<'a>) -> Result<()> {
        self.write_next(next.start())
    }

    pub fn data_chain_capacity(&self) -> Result<u64> {
        let mut capacity = 0;
        self.walk(|block| {
            capacity += block.data_capacity()?;
            Ok(())
        })?;
        Ok(capacity)
    }

    /// Fill `destination` from the chain, starting `offset` bytes in.
    pub fn read(&self, offset: u64, destination: &mut [u8]) -> Result<()> {
        if destination.is_empty() {
            return Ok(());
        }
        let capacity = self.data_chain_capacity()?;
        let end = offset.checked_add(destination.len() as u64);
        if end.map_or(true, |end| end > capacity) {
            return Err(Error::InvalidArgument(format!(
                "cannot read {} bytes starting from {}: the chain capacity is {} bytes",
                destination.len(),
                offset,
                capacity
            )));
        }
        let pool = *self.pool();
        self.copy_range(offset, destination.len(), |position, from, to| {
            pool.read(position, &mut destination[from..to])
        })
    }

    /// Write `source` into the chain at `offset`, enlarging it first if the
    /// chain is too short.
    pub fn write(&self, offset: u64, source: &[u8]) -> Result<()> {
        if source.is_empty() {
            return Ok(());
        }
        let end = offset.checked_add(source.len() as u64).ok_or_else(|| {
            Error::InvalidArgument(format!("write range overflows: offset={}", offset))
        })?;
        self.enlarge(end)?;
        let pool = *self.pool();
        self.copy_range(offset, source.len(), |position, from, to| {
            pool.write(position, &source[from..to])
        })
    }

    /// Grow the chain to hold at least `new_data_size` bytes. Existing
    /// payload is untouched, added space reads as zeros.
    pub fn enlarge(&self, new_data_size: u64) -> Result<()> {
        let result = self.grow(new_data_size);
        // this block may have been the tail that grew
        self.forget();
        result
    }

    fn grow(&self, new_data_size: u64) -> Result<()> {
        let capacity = self.data_chain_capacity()?;
        if new_data_size <= capacity {
            return Ok(());
        }
        let mut bytes_to_add = new_data_size - capacity;
        let last = self.last_in_chain()?;
        let neighbour = match last.next_block()? {
            Some(block) if block.is_free()? => Some(block),
            _ => None,
        };

        let neighbour_length = match neighbour {
            Some(ref block) => block.length()?,
            None => 0,
        };
        if neighbour_length < bytes_to_add {
            let skip = neighbour.as_ref().map(|block| block.start());
            let elsewhere = self
                .pool()
                .first_block()?
                .free_capacity_from(skip, bytes_to_add - neighbour_length)?;
            if neighbour_length + elsewhere < bytes_to_add {
                return Err(Error::NotEnoughFreeSpace {
                    requested: bytes_to_add,
                    available: neighbour_length + elsewhere,
                });
            }
        }

        if let Some(free) = neighbour {
            // Grow into the free neighbour first, it keeps the chain short
            if neighbour_length >= bytes_to_add {
                if neighbour_length - bytes_to_add < self.pool().min_block_length() {
                    last.extend_into_next(neighbour_length)?;
                } else {
                    last.extend_into_next(bytes_to_add)?;
                    FreeBlock::new(self.pool().block_at(free.start() + bytes_to_add)?)
                        .initialize(neighbour_length - bytes_to_add)?;
                }
                debug!(head = self.start(), tail = last.start(), new_data_size, "enlarged in place");
                return Ok(());
            }
            last.extend_into_next(neighbour_length)?;
            bytes_to_add -= neighbour_length;
        }

        let tail = self.find_first_free_block()?.allocate(bytes_to_add)?;
        last.set_next_in_chain(&tail)?;
        debug!(head = self.start(), new_tail = tail.start(), new_data_size, "enlarged with new blocks");
        Ok(())
    }

    /// Release every block of the chain, merging each with free physical
    /// neighbours. The caller gives up every handle to the chain.
    pub fn remove_chain(self) -> Result<()> {
        if self.start() == self.pool().first_block_position() {
            return Err(Error::InvalidArgument(
                "cannot remove the first block of the store".to_owned(),
            ));
        }
        let limit = self.pool().max_blocks();
        let mut steps = 0u64;
        let mut current = Some(self);
        while let Some(block) = current {
            steps += 1;
            if steps > limit {
                return Err(Error::Inconsistent("data chain loops".to_owned()));
            }
            let chain_next = block.next_in_chain()?;
            let previous = match block.previous_block()? {
                Some(previous) => previous,
                None => {
                    return Err(Error::Inconsistent(format!(
                        "chain member at {} is the first block of the store",
                        block.start()
                    )))
                }
            };
            let following = match block.next_block()? {
                Some(following) if following.is_free()? => Some(following),
                _ => None,
            };
            let length = block.length()?;
            let following_length = match following {
                Some(ref following) => following.length()?,
                None => 0,
            };
            if previous.is_free()? {
                let merged = previous.length()? + length + following_length;
                FreeBlock::new(previous).initialize(merged)?;
            } else {
                FreeBlock::new(block.block).initialize(length + following_length)?;
            }
            current = chain_next;
        }
        Ok(())
    }
}

/// Internal functions
impl<'a> DataBlock<'a> {
    fn write_next(&self, position: u64) -> Result<()> {
        self.pool().write_u64(self.start() + NEXT_OFFSET, position)?;
        self.next.set(Some(position));
        Ok(())
    }

    fn set_last_in_chain(&self) -> Result<()> {
        self.write_next(NO_NEXT)
    }

    fn forget(&self) {
        self.block.forget();
        self.next.set(None);
    }

    /// Visit every member of the chain, starting with this block.
    fn walk<F>(&self, mut visit: F) -> Result<DataBlock<'a>>
    where
        F: FnMut(&DataBlock<'a>) -> Result<()>,
    {
        let limit = self.pool().max_blocks();
        let mut steps = 1u64;
        let mut current = self.clone();
        visit(&current)?;
        while let Some(next) = current.next_in_chain()? {
            steps += 1;
            if steps > limit {
                return Err(Error::Inconsistent(format!(
                    "data chain starting at {} loops",
                    self.start()
                )));
            }
            visit(&next)?;
            current = next;
        }
        Ok(current)
    }

    fn last_in_chain(&self) -> Result<DataBlock<'a>> {
        self.walk(|_| Ok(()))
    }

    /// Map the logical range `[offset, offset + length)` onto block payloads
    /// and hand each piece to `io` as (device position, range start, range end).
    fn copy_range<F>(&self, offset: u64, length: usize, mut io: F) -> Result<()>
    where
        F: FnMut(u64, usize, usize) -> Result<()>,
    {
        let mut offset_in_block = offset;
        let mut block = self.clone();
        while offset_in_block >= block.data_capacity()? {
            offset_in_block -= block.data_capacity()?;
            block = self.expect_next(&block)?;
        }
        let mut done = 0usize;
        loop {
            let available = block.data_capacity()? - offset_in_block;
            let n = ((length - done) as u64).min(available) as usize;
            io(block.start() + DATA_OFFSET + offset_in_block, done, done + n)?;
            done += n;
            if done == length {
                return Ok(());
            }
            // only the first block is entered at an offset
            offset_in_block = 0;
            block = self.expect_next(&block)?;
        }
    }

    fn expect_next(&self, block: &DataBlock<'a>) -> Result<DataBlock<'a>> {
        block.next_in_chain()?.ok_or_else(|| {
            Error::Inconsistent(format!(
                "data chain starting at {} ends before the requested range",
                self.start()
            ))
        })
    }

    fn extend_into_next(&self, additional: u64) -> Result<()> {
        if self.next_position()?.is_some() {
            return Err(Error::Inconsistent(
                "only the last block of a chain can be extended".to_owned(),
            ));
        }
        let old_length = self.length()?;
        self.set_length(old_length + additional)?;
        // zero the old footer and the absorbed span, the new footer stays
        self.fill_with_zeros(self.start() + old_length - LENGTH_BYTES, additional)
    }
}
