//! Installation of crushed output
//!
//! Two strategies consume the mapping stream:
//!
//! - [`mover::MoveInstaller`]: staged outputs (and skipped originals) are
//!   moved under a destination root that mirrors the source tree.
//! - [`swap::SwapInstaller`]: originals are moved into a holding area, then
//!   each output takes their place in the source directory.
//!
//! Neither strategy rolls back. A failed swap reports what has to be moved
//! by hand.

pub mod mover;
pub mod swap;

pub use mover::{MoveInstaller, MoveSummary};
pub use swap::{SwapInstaller, SwapSummary};

use crate::error::InstallError;
use crate::format::Codec;
use crate::storage::Storage;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Re-root `path` from `from_root` onto `to_root`
pub fn relocate(path: &Path, from_root: &Path, to_root: &Path) -> Result<PathBuf, InstallError> {
    let rel = path
        .strip_prefix(from_root)
        .map_err(|_| InstallError::OutsideRoot {
            path: path.to_path_buf(),
            root: from_root.to_path_buf(),
        })?;
    Ok(to_root.join(rel))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Rename primitives shared by both strategies
pub struct Installer<'a> {
    storage: &'a dyn Storage,
    codec: Codec,
}

impl<'a> Installer<'a> {
    pub fn new(storage: &'a dyn Storage, codec: Codec) -> Self {
        Self { storage, codec }
    }

    pub fn storage(&self) -> &'a dyn Storage {
        self.storage
    }

    /// Move a file, creating the destination's parent directories
    pub fn move_file(&self, from: &Path, to: &Path) -> Result<(), InstallError> {
        if let Some(parent) = to.parent() {
            if !self.storage.is_dir(parent) {
                self.storage
                    .create_dir_all(parent)
                    .map_err(|source| InstallError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        debug!(from = %from.display(), to = %to.display(), "Moving");
        self.storage
            .rename(from, to)
            .map_err(|source| InstallError::Rename {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source,
            })
    }

    /// Move a staged output, falling back to its codec-suffixed name
    ///
    /// Returns the path the output ended up at.
    pub fn move_output(&self, staged: &Path, to: &Path) -> Result<PathBuf, InstallError> {
        if !self.storage.exists(staged) {
            if let Some(suffix) = self.codec.extension() {
                let mangled = with_suffix(staged, suffix);
                if self.storage.exists(&mangled) {
                    let target = with_suffix(to, suffix);
                    self.move_file(&mangled, &target)?;
                    return Ok(target);
                }
            }
        }

        self.move_file(staged, to)?;
        Ok(to.to_path_buf())
    }
}
