//! Filesystem surface used by the crusher
//!
//! Every component issues path-level operations through [`Storage`] so the
//! planner, merge engine and installer never depend on a concrete
//! filesystem. Directory listing order is unspecified.

pub mod local;

pub use local::LocalStorage;

use bytes::Bytes;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Length in bytes (0 for directories)
    pub len: u64,
}

/// Path-level storage operations
pub trait Storage: Send + Sync {
    /// List the immediate children of a directory
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;

    /// Whether the path is an existing directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Whether the path exists
    fn exists(&self, path: &Path) -> bool;

    /// Open a file for sequential reading
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create (or truncate) a file for writing
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Move a file; fails if the destination already exists
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create a directory and any missing parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Delete a file
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Delete a directory tree
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Read a whole file into memory
    fn read_all(&self, path: &Path) -> io::Result<Bytes> {
        let mut reader = self.open_read(path)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}
