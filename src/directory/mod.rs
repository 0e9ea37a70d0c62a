//! Directories: named tables of records pointing at child chains.
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::allocator::{DataBlock, Pool};
use crate::file::File;
use crate::store::Store;
use crate::{Error, Result};

mod name;
mod table;

pub use self::name::{validate, EntryKind, DIRECTORY_MARKER};
use self::table::{Record, RecordTable};

/// Handle to a directory. Cheap to clone; every clone refers to the same
/// table in the store.
#[derive(Clone)]
pub struct Directory {
    store: Arc<Store>,
    name: String,
    head: u64,
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Directory")
            .field("name", &self.name)
            .field("head", &self.head)
            .finish()
    }
}

/// Public interface
impl Directory {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create an empty file able to hold `size` bytes without growing.
    pub fn create_file(&self, name: &str, size: u64) -> Result<File> {
        let _guard = self.store.guard()?;
        validate(name, EntryKind::File, self.store.config().name_bytes)?;
        let capacity = size.max(self.store.config().min_data_capacity);
        let head = self.create_entry(name, capacity)?;
        debug!(directory = %self.name, file = name, size, head, "created file");
        Ok(File::new(self.store.clone(), name.to_owned(), head))
    }

    /// Create an empty subdirectory. Its name must start with '/'.
    pub fn create_directory(&self, name: &str) -> Result<Directory> {
        let _guard = self.store.guard()?;
        let config = self.store.config();
        validate(name, EntryKind::Directory, config.name_bytes)?;
        let capacity = config.table_size().max(config.min_data_capacity);
        let head = self.create_entry(name, capacity)?;
        debug!(directory = %self.name, child = name, head, "created directory");
        Ok(Directory::new(self.store.clone(), name.to_owned(), head))
    }

    /// Names of all entries, files and directories, in slot order.
    pub fn file_names(&self) -> Result<Vec<String>> {
        let _guard = self.store.guard()?;
        let pool = self.store.pool();
        let table = self.table(&pool)?;
        let names = table.records().map(|record| record.name).collect();
        Ok(names)
    }

    /// The file called `name`, if there is one.
    pub fn file(&self, name: &str) -> Result<Option<File>> {
        if EntryKind::of(name) != EntryKind::File {
            return Ok(None);
        }
        Ok(self
            .lookup(name)?
            .map(|record| File::new(self.store.clone(), record.name, record.pointer)))
    }

    /// The subdirectory called `name`, if there is one.
    pub fn directory(&self, name: &str) -> Result<Option<Directory>> {
        if EntryKind::of(name) != EntryKind::Directory {
            return Ok(None);
        }
        Ok(self
            .lookup(name)?
            .map(|record| Directory::new(self.store.clone(), record.name, record.pointer)))
    }

    /// Remove the entry called `name` and release its space. Removing a
    /// missing entry does nothing; a directory has to be empty first.
    pub fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.store.guard()?;
        let pool = self.store.pool();
        let mut table = self.table(&pool)?;
        let record = match table.find(name) {
            Some(record) => record,
            None => {
                debug!(directory = %self.name, name, "nothing to remove");
                return Ok(());
            }
        };
        let chain = pool.data_block_at(record.pointer)?;
        if EntryKind::of(name) == EntryKind::Directory {
            let children = RecordTable::load(chain.clone(), self.store.config())?.len();
            if children > 0 {
                return Err(Error::NotEmptyDirectory(name.to_owned()));
            }
        }
        // unlink before releasing the blocks
        table.clear(record.index)?;
        chain.remove_chain()?;
        info!(directory = %self.name, name, "removed entry");
        Ok(())
    }

    /// Number of live entries.
    pub fn files_count(&self) -> Result<usize> {
        let _guard = self.store.guard()?;
        let pool = self.store.pool();
        Ok(self.table(&pool)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.files_count()? == 0)
    }

    /// Number of record slots, used or not.
    pub fn capacity(&self) -> Result<usize> {
        let _guard = self.store.guard()?;
        let pool = self.store.pool();
        Ok(self.table(&pool)?.capacity())
    }
}

/// Internal functions
impl Directory {
    pub(crate) fn new(store: Arc<Store>, name: String, head: u64) -> Directory {
        Directory { store, name, head }
    }

    fn table<'a>(&self, pool: &Pool<'a>) -> Result<RecordTable<'a>> {
        RecordTable::load(self.chain(pool)?, self.store.config())
    }

    fn chain<'a>(&self, pool: &Pool<'a>) -> Result<DataBlock<'a>> {
        pool.data_block_at(self.head)
    }

    fn lookup(&self, name: &str) -> Result<Option<Record>> {
        let _guard = self.store.guard()?;
        let pool = self.store.pool();
        Ok(self.table(&pool)?.find(name))
    }

    /// Add a record for a new chain of `capacity` bytes. Called with the
    /// store guard held and `name` validated.
    fn create_entry(&self, name: &str, capacity: u64) -> Result<u64> {
        let pool = self.store.pool();
        let mut table = self.table(&pool)?;
        if table.find(name).is_some() {
            return Err(Error::IllegalName(format!(
                "'{}' already exists in '{}'",
                name, self.name
            )));
        }
        let limit = self.store.config().entry_limit();
        if table.len() >= limit {
            return Err(Error::TooManyEntries {
                directory: self.name.clone(),
                limit,
            });
        }
        let child = pool
            .first_block()?
            .find_first_free_block()?
            .allocate(capacity)?;
        let head = child.start();
        if let Err(e) = table.reserve() {
            // hand the child's blocks back, the store is left as it was
            debug!(directory = %self.name, name, error = %e, "table growth failed");
            child.remove_chain()?;
            return Err(e);
        }
        table.insert(name, head)?;
        Ok(head)
    }
}
