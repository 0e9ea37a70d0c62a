//! Formatting, opening and locking stores.
//!
//! A store starts with a fixed identification marker; the blocks follow it.
//! The first block is always the root directory table.
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::allocator::{BlockInfo, Pool};
use crate::config::{Config, DEFAULT_CONFIG};
use crate::device::{Device, FileDevice};
use crate::directory::Directory;
use crate::{Error, Result};

pub const MARKER: &[u8] = b"SingleFileFileSystem_v0.01";

/// Name of the root directory.
pub const ROOT_NAME: &str = "/";

lazy_static! {
    // Canonical paths of stores opened by this process
    static ref OPEN_STORES: Mutex<HashSet<PathBuf>> = Mutex::new(HashSet::new());
}

/// An opened store shared by every handle into it.
///
/// The mutex is the single mutation domain of the store: every public
/// directory and file operation holds it from start to finish.
pub struct Store {
    device: Box<dyn Device>,
    config: Config,
    mutex: Mutex<()>,
    closed: AtomicBool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Store")
            .field("size", &self.device.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("pool", &self.pool())
            .finish()
    }
}

/// Public interface
impl Store {
    /// Write the marker, a single free block and an empty root table.
    pub fn format(device: Box<dyn Device>, config: Config) -> Result<Arc<Store>> {
        let size = device.len();
        if size < config.min_store_size() {
            return Err(Error::InvalidArgument(format!(
                "store cannot be less than {} bytes, but its size is {}",
                config.min_store_size(),
                size
            )));
        }
        device.write_at(0, MARKER)?;
        let store = Store::new(device, config);
        {
            let pool = store.pool();
            let table_size = store.config.table_size().max(pool.min_data_capacity());
            let root = pool.format()?.allocate(table_size)?;
            if root.start() != pool.first_block_position() {
                return Err(Error::Inconsistent(format!(
                    "root table landed at {} instead of the first block",
                    root.start()
                )));
            }
        }
        store.device.sync()?;
        info!(size, "formatted store");
        Ok(Arc::new(store))
    }

    /// Wrap an already formatted device.
    pub fn load(device: Box<dyn Device>, config: Config) -> Result<Arc<Store>> {
        if !has_marker(&*device, &config)? {
            return Err(Error::NotFormatted(PathBuf::new()));
        }
        let store = Store::new(device, config);
        store.pool().data_block_at(MARKER.len() as u64)?;
        Ok(Arc::new(store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn size(&self) -> u64 {
        self.device.len()
    }

    pub fn pool(&self) -> Pool<'_> {
        Pool::new(&*self.device, MARKER.len() as u64, &self.config)
    }

    /// Take the store mutex. Fails once the store has been closed.
    pub fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        let guard = self.mutex.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidArgument("the store is closed".to_owned()));
        }
        Ok(guard)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Internal functions
impl Store {
    fn new(device: Box<dyn Device>, config: Config) -> Store {
        Store {
            device,
            config,
            mutex: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    fn close(&self) -> Result<()> {
        let _guard = self.mutex.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.device.sync()
    }
}

fn has_marker(device: &dyn Device, config: &Config) -> Result<bool> {
    if device.len() < config.min_store_size() {
        return Ok(false);
    }
    let mut marker = vec![0u8; MARKER.len()];
    device.read_at(0, &mut marker)?;
    if marker != MARKER {
        debug!(found = %String::from_utf8_lossy(&marker), "identification marker mismatch");
        return Ok(false);
    }
    Ok(true)
}

/// Exclusive claim on a store file, for this process and for others.
struct StoreLock {
    path: PathBuf,
    file: fs::File,
}

impl StoreLock {
    fn acquire(path: &Path, file: &fs::File) -> Result<StoreLock> {
        let path = path.canonicalize()?;
        if !OPEN_STORES.lock().insert(path.clone()) {
            warn!(path = %path.display(), "store is already opened by this process");
            return Err(Error::AlreadyLocked(path));
        }
        let file = match file.try_clone() {
            Ok(file) => file,
            Err(e) => {
                OPEN_STORES.lock().remove(&path);
                return Err(e.into());
            }
        };
        if let Err(e) = fs2::FileExt::try_lock_exclusive(&file) {
            OPEN_STORES.lock().remove(&path);
            let contended = e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            if contended {
                warn!(path = %path.display(), "store is locked by another process");
                return Err(Error::AlreadyLocked(path));
            }
            return Err(e.into());
        }
        Ok(StoreLock { path, file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to unlock store");
        }
        OPEN_STORES.lock().remove(&self.path);
    }
}

/// The entry point into an opened store: the root directory plus ownership
/// of the store's lifetime.
pub struct Root {
    directory: Directory,
    store: Arc<Store>,
    lock: Option<StoreLock>,
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Root").field("store", &self.store).finish()
    }
}

impl Deref for Root {
    type Target = Directory;

    fn deref(&self) -> &Directory {
        &self.directory
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        if let Err(e) = self.store.close() {
            warn!(error = %e, "failed to sync store on drop");
        }
    }
}

impl Root {
    /// Root over a store that is not file backed, e.g. a `MemDevice`.
    pub fn new(store: Arc<Store>) -> Root {
        let directory = Directory::new(store.clone(), ROOT_NAME.to_owned(), MARKER.len() as u64);
        Root {
            directory,
            store,
            lock: None,
        }
    }

    pub fn as_directory(&self) -> &Directory {
        &self.directory
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Payload bytes still available for allocation.
    pub fn free_space(&self) -> Result<u64> {
        let _guard = self.store.guard()?;
        self.store.pool().free_capacity()
    }

    /// Every block of the store in offset order.
    pub fn blocks(&self) -> Result<Vec<BlockInfo>> {
        let _guard = self.store.guard()?;
        self.store.pool().blocks()
    }

    /// Sync and release the store. Handles still alive afterwards fail.
    pub fn close(mut self) -> Result<()> {
        let result = self.store.close();
        self.lock.take();
        if let Some(e) = result.as_ref().err() {
            warn!(error = %e, "store closed with an error");
        } else {
            info!("store closed");
        }
        result
    }
}

/// Create and format a store of `size` bytes at `path` with the default
/// configuration.
pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<()> {
    create_with(path, size, &DEFAULT_CONFIG)
}

pub fn create_with<P: AsRef<Path>>(path: P, size: u64, config: &Config) -> Result<()> {
    let path = path.as_ref();
    if path.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "{} is a directory",
            path.display()
        )));
    }
    if size < config.min_store_size() {
        return Err(Error::InvalidArgument(format!(
            "store cannot be less than {} bytes, but the size is {}",
            config.min_store_size(),
            size
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let _lock = StoreLock::acquire(path, &file)?;
    // truncate only once the lock is held
    file.set_len(0)?;
    file.set_len(size)?;
    let device = FileDevice::new(file)?;
    Store::format(Box::new(device), config.clone())?;
    info!(path = %path.display(), size, "created store");
    Ok(())
}

/// Whether `path` holds a formatted store.
pub fn is_formatted<P: AsRef<Path>>(path: P) -> Result<bool> {
    is_formatted_with(path, &DEFAULT_CONFIG)
}

pub fn is_formatted_with<P: AsRef<Path>>(path: P, config: &Config) -> Result<bool> {
    let path = path.as_ref();
    if !path.is_file() {
        return Ok(false);
    }
    let file = fs::File::open(path)?;
    has_marker(&FileDevice::new(file)?, config)
}

/// Open the store at `path` with the default configuration.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Root> {
    open_with(path, &DEFAULT_CONFIG)
}

pub fn open_with<P: AsRef<Path>>(path: P, config: &Config) -> Result<Root> {
    let path = path.as_ref();
    if !is_formatted_with(path, config)? {
        return Err(Error::NotFormatted(path.to_owned()));
    }
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let lock = StoreLock::acquire(path, &file)?;
    let store = Store::load(Box::new(FileDevice::new(file)?), config.clone())?;
    info!(path = %path.display(), size = store.size(), "opened store");
    let mut root = Root::new(store);
    root.lock = Some(lock);
    Ok(root)
}
