use std::env;
use std::str::FromStr;

use tracing::warn;

use crate::allocator::POINTER_BYTES;

lazy_static! {
    /// Defaults overlaid with `BLOCKFS_*` environment variables, resolved once.
    pub static ref DEFAULT_CONFIG: Config = Config::from_env();
}

/// Tunables of a store.
///
/// `name_bytes` is part of the on-disk record layout: a store has to be
/// opened with the same value it was formatted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Smallest payload a block may carry.
    pub min_data_capacity: u64,
    /// Upper bound for a single zero-fill write and for a bulk record load.
    pub max_chunk_size: usize,
    /// Width of the name part of a directory record.
    pub name_bytes: usize,
    /// Record slots of a freshly created directory table.
    pub initial_table_capacity: usize,
    /// Live records allowed per directory.
    pub max_entries_per_directory: usize,
    /// Data space a new store must offer on top of the root table.
    pub min_file_data_size: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            min_data_capacity: 20,
            max_chunk_size: 1_000_000,
            name_bytes: 42,
            initial_table_capacity: 16,
            max_entries_per_directory: 2048,
            min_file_data_size: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Config {
        let mut config = Config::default();
        overlay(&mut config.min_data_capacity, "BLOCKFS_MIN_DATA_CAPACITY");
        overlay(&mut config.max_chunk_size, "BLOCKFS_MAX_CHUNK_SIZE");
        overlay(&mut config.name_bytes, "BLOCKFS_NAME_BYTES");
        overlay(&mut config.initial_table_capacity, "BLOCKFS_INITIAL_TABLE_CAPACITY");
        overlay(&mut config.max_entries_per_directory, "BLOCKFS_MAX_ENTRIES");
        overlay(&mut config.min_file_data_size, "BLOCKFS_MIN_FILE_DATA_SIZE");
        config
    }

    pub fn record_size(&self) -> usize {
        POINTER_BYTES as usize + self.name_bytes
    }

    /// Payload bytes of a new directory table.
    pub fn table_size(&self) -> u64 {
        (self.initial_table_capacity * self.record_size()) as u64
    }

    /// Entry limit, clamped so a full table still loads in one chunk.
    pub fn entry_limit(&self) -> usize {
        self.max_entries_per_directory
            .min(self.max_chunk_size / self.record_size())
    }

    /// Smallest store `create` accepts.
    pub fn min_store_size(&self) -> u64 {
        self.table_size() + self.min_file_data_size
    }
}

fn overlay<T: FromStr>(field: &mut T, var: &str) {
    let raw = match env::var(var) {
        Ok(raw) => raw,
        Err(_) => return,
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *field = value,
        Err(_) => warn!(var, value = %raw, "ignoring unparsable override"),
    }
}
