//! Index configuration.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default LMDB map size (4 GiB).
pub const DEFAULT_MAP_SIZE: usize = 4 * 1024 * 1024 * 1024;

/// Default number of concurrent reader slots.
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Default number of lines between progress reports.
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

const STORE_DIR_NAME: &str = "rirdex.db";
const METADATA_FILE_NAME: &str = "rirdex.meta";

/// Configuration for building and opening the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Directory holding the store, the metadata file and the source files.
    pub data_dir: PathBuf,
    /// Maximum size of the memory map in bytes.
    pub map_size: usize,
    /// Maximum number of concurrent read transactions.
    pub max_readers: u32,
    /// Report load progress every this many lines (0 disables periodic reports).
    pub progress_every: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            map_size: DEFAULT_MAP_SIZE,
            max_readers: DEFAULT_MAX_READERS,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl IndexConfig {
    /// Create a configuration rooted at the given data directory.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the data directory.
    pub fn with_data_dir(mut self, data_dir: impl AsRef<Path>) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    /// Set the memory map size in bytes.
    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    /// Set the number of reader slots.
    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    /// Set the progress report interval in lines.
    pub fn with_progress_every(mut self, lines: u64) -> Self {
        self.progress_every = lines;
        self
    }

    /// Directory of the LMDB environment.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_DIR_NAME)
    }

    /// Path of the rebuild metadata file.
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join(METADATA_FILE_NAME)
    }

    /// Check the values before opening a store.
    pub fn validate(&self) -> Result<()> {
        if self.map_size == 0 {
            return Err(Error::Config("map size must be non-zero".to_string()));
        }
        if self.max_readers == 0 {
            return Err(Error::Config("max readers must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// `$HOME/.cache/rirdex`, or `./.rirdex` when no home directory is set.
pub fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("rirdex"),
        None => PathBuf::from(".rirdex"),
    }
}
