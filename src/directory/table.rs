use crate::allocator::{DataBlock, POINTER_BYTES};
use crate::config::Config;
use crate::{Error, Result};

/// One slot of a directory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index: usize,
    pub pointer: u64,
    pub name: String,
}

/// The record table of a directory, loaded from its chain in one read.
///
/// Each slot is an 8-byte big-endian pointer to the child's head block
/// followed by the NUL-padded name. A zero pointer marks an empty slot.
pub struct RecordTable<'a> {
    chain: DataBlock<'a>,
    record_size: usize,
    name_bytes: usize,
    max_slots: usize,
    bytes: Vec<u8>,
}

impl<'a> RecordTable<'a> {
    pub fn load(chain: DataBlock<'a>, config: &Config) -> Result<RecordTable<'a>> {
        let record_size = config.record_size();
        let slots = (chain.data_chain_capacity()? / record_size as u64) as usize;
        let mut bytes = vec![0u8; slots * record_size];
        chain.read(0, &mut bytes)?;
        Ok(RecordTable {
            chain,
            record_size,
            name_bytes: config.name_bytes,
            max_slots: config.entry_limit(),
            bytes,
        })
    }

    /// Number of slots, used or not.
    pub fn capacity(&self) -> usize {
        self.bytes.len() / self.record_size
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.capacity()).filter_map(move |index| self.record(index))
    }

    pub fn len(&self) -> usize {
        self.records().count()
    }

    pub fn find(&self, name: &str) -> Option<Record> {
        self.records().find(|record| record.name == name)
    }

    /// Put a record into the first empty slot, doubling the table when
    /// every slot is taken.
    pub fn insert(&mut self, name: &str, pointer: u64) -> Result<usize> {
        self.reserve()?;
        let index = (0..self.capacity())
            .find(|&index| self.record(index).is_none())
            .ok_or_else(|| Error::Inconsistent("directory table has no empty slot".to_owned()))?;
        let mut slot = vec![0u8; self.record_size];
        slot[..POINTER_BYTES as usize].copy_from_slice(&pointer.to_be_bytes());
        slot[POINTER_BYTES as usize..POINTER_BYTES as usize + name.len()]
            .copy_from_slice(name.as_bytes());
        self.write_slot(index, slot)?;
        Ok(index)
    }

    /// Make sure at least one slot is empty. Doubling stops at the entry
    /// limit so a full table still loads in one chunk.
    pub fn reserve(&mut self) -> Result<()> {
        let capacity = self.capacity();
        if self.len() < capacity {
            return Ok(());
        }
        let slots = (capacity * 2).min(self.max_slots).max(capacity + 1);
        self.chain.enlarge((slots * self.record_size) as u64)?;
        self.bytes.resize(slots * self.record_size, 0);
        Ok(())
    }

    /// Zero the pointer of slot `index`. The stale name stays behind.
    pub fn clear(&mut self, index: usize) -> Result<()> {
        let start = index * self.record_size;
        let zeros = [0u8; POINTER_BYTES as usize];
        self.chain.write(start as u64, &zeros)?;
        self.bytes[start..start + zeros.len()].copy_from_slice(&zeros);
        Ok(())
    }

    fn record(&self, index: usize) -> Option<Record> {
        let start = index * self.record_size;
        let slot = &self.bytes[start..start + self.record_size];
        let (pointer, name) = slot.split_at(POINTER_BYTES as usize);
        let mut raw = [0u8; POINTER_BYTES as usize];
        raw.copy_from_slice(pointer);
        let pointer = u64::from_be_bytes(raw);
        if pointer == 0 {
            return None;
        }
        let name = &name[..self.name_bytes.min(name.len())];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        Some(Record {
            index,
            pointer,
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
        })
    }

    fn write_slot(&mut self, index: usize, slot: Vec<u8>) -> Result<()> {
        let start = index * self.record_size;
        self.chain.write(start as u64, &slot)?;
        self.bytes[start..start + slot.len()].copy_from_slice(&slot);
        Ok(())
    }
}
