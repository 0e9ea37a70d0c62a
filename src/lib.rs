//! A filesystem that lives inside one fixed-size file.
//!
//! The store is tiled by variable-length blocks. Free blocks are split on
//! allocation and merged with their neighbours on release; data blocks are
//! linked into chains that back both file contents and directory record
//! tables.
#[macro_use] extern crate lazy_static;

pub mod allocator;
pub mod config;
pub mod device;
pub mod directory;
pub mod file;
pub mod store;

use std::io;
use std::path::PathBuf;

pub use config::Config;
pub use directory::Directory;
pub use file::File;
pub use store::{create, is_formatted, open, open_with, Root};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not enough free space: requested {requested} bytes, {available} available")]
    NotEnoughFreeSpace { requested: u64, available: u64 },

    #[error("directory '{directory}' reached its maximum capacity of {limit} entries")]
    TooManyEntries { directory: String, limit: usize },

    #[error("illegal name: {0}")]
    IllegalName(String),

    #[error("cannot remove not empty directory '{0}'")]
    NotEmptyDirectory(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store {0:?} is already opened")]
    AlreadyLocked(PathBuf),

    #[error("{0:?} is not a formatted store")]
    NotFormatted(PathBuf),

    /// On-disk structures disagree with each other.
    #[error("inconsistent store: {0}")]
    Inconsistent(String),
}
