//! Breadth-first directory scan and file classification
//!
//! ```text
//! level 0:  root
//! level 1:  root/a        root/b
//! level 2:  root/a/x      root/b/y      root/b/z
//! ```
//!
//! Every directory is listed once; its immediate files are classified and
//! its sub-directories are queued for the next level.

use super::ScanCounters;
use regex::Regex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::storage::Storage;

/// How a file participates in the crush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// Small enough to merge
    Crushable,
    /// Matched the skip pattern
    Skipped,
    /// Zero-length with empty-file removal enabled
    Removable,
    /// Larger than the eligibility threshold
    Ineligible,
}

/// A file found during the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub len: u64,
    pub dir: PathBuf,
}

/// Classification rules applied to every file
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    /// Files matching this are invisible to the run
    pub ignore: Option<Regex>,
    /// Files matching this are left in place and counted as skipped
    pub skip: Option<Regex>,
    pub remove_empty: bool,
    /// floor(block size × threshold)
    pub max_eligible_size: u64,
}

impl ScanPolicy {
    pub fn new(block_size: u64, threshold: f64) -> Self {
        Self {
            ignore: None,
            skip: None,
            remove_empty: false,
            max_eligible_size: (block_size as f64 * threshold).floor() as u64,
        }
    }

    /// Whether the ignore pattern hides this file
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore
            .as_ref()
            .is_some_and(|re| re.is_match(&path.to_string_lossy()))
    }

    /// Classify a file; `None` means ignored
    pub fn classify(&self, path: &Path, len: u64) -> Option<FileClass> {
        if self.is_ignored(path) {
            return None;
        }

        let class = if self
            .skip
            .as_ref()
            .is_some_and(|re| re.is_match(&path.to_string_lossy()))
        {
            FileClass::Skipped
        } else if len == 0 && self.remove_empty {
            FileClass::Removable
        } else if len <= self.max_eligible_size {
            FileClass::Crushable
        } else {
            FileClass::Ineligible
        };
        Some(class)
    }
}

/// Classified contents of one directory
#[derive(Debug, Clone, Default)]
pub struct DirectoryScan {
    pub dir: PathBuf,
    pub crushable: Vec<SourceFile>,
    /// Skipped and ineligible files
    pub skipped: Vec<SourceFile>,
    pub removable: Vec<SourceFile>,
}

impl DirectoryScan {
    pub fn crushable_bytes(&self) -> u64 {
        self.crushable.iter().map(|f| f.len).sum()
    }
}

/// Walk `root` breadth first, classifying every non-ignored file
///
/// Listings are sorted by path so the result is reproducible for a given
/// tree. Updates the found/skipped/removed counters.
pub fn scan(
    storage: &dyn Storage,
    root: &Path,
    policy: &ScanPolicy,
    counters: &mut ScanCounters,
) -> io::Result<Vec<DirectoryScan>> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    let mut scans = Vec::new();

    while let Some(dir) = queue.pop_front() {
        counters.dirs_found += 1;

        let mut entries = storage.list_dir(&dir)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut scan = DirectoryScan {
            dir: dir.clone(),
            ..Default::default()
        };

        for entry in entries {
            if entry.is_dir {
                queue.push_back(entry.path);
                continue;
            }

            let Some(class) = policy.classify(&entry.path, entry.len) else {
                trace!(path = %entry.path.display(), "Ignored");
                continue;
            };
            counters.files_found += 1;

            let file = SourceFile {
                path: entry.path,
                len: entry.len,
                dir: dir.clone(),
            };
            match class {
                FileClass::Crushable => scan.crushable.push(file),
                FileClass::Skipped | FileClass::Ineligible => {
                    debug!(path = %file.path.display(), len = file.len, class = ?class, "Skipping file");
                    counters.files_skipped += 1;
                    scan.skipped.push(file);
                }
                FileClass::Removable => {
                    debug!(path = %file.path.display(), "Empty file marked for removal");
                    counters.files_removed += 1;
                    scan.removable.push(file);
                }
            }
        }

        scans.push(scan);
    }

    Ok(scans)
}

/// Non-ignored immediate files of one directory, sorted by path
///
/// Used by stand-alone crushing, which merges a whole directory without
/// size limits or recursion.
pub fn list_files(
    storage: &dyn Storage,
    dir: &Path,
    policy: &ScanPolicy,
) -> io::Result<Vec<SourceFile>> {
    let mut entries = storage.list_dir(dir)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(entries
        .into_iter()
        .filter(|e| !e.is_dir && !policy.is_ignored(&e.path))
        .map(|e| SourceFile {
            path: e.path,
            len: e.len,
            dir: dir.to_path_buf(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::full_match_regex;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::tempdir;

    fn policy() -> ScanPolicy {
        ScanPolicy::new(100, 0.5)
    }

    #[test]
    fn test_threshold_is_floored() {
        assert_eq!(ScanPolicy::new(100, 0.755).max_eligible_size, 75);
        assert_eq!(ScanPolicy::new(128, 1.0).max_eligible_size, 128);
    }

    #[test]
    fn test_classification_order() {
        let mut p = policy();
        p.ignore = Some(full_match_regex(r".*\.crc").unwrap());
        p.skip = Some(full_match_regex(r".*/_SUCCESS").unwrap());
        p.remove_empty = true;

        assert_eq!(p.classify(Path::new("/d/a.crc"), 1), None);
        assert_eq!(p.classify(Path::new("/d/_SUCCESS"), 0), Some(FileClass::Skipped));
        assert_eq!(p.classify(Path::new("/d/empty"), 0), Some(FileClass::Removable));
        assert_eq!(p.classify(Path::new("/d/small"), 50), Some(FileClass::Crushable));
        assert_eq!(p.classify(Path::new("/d/big"), 51), Some(FileClass::Ineligible));
    }

    #[test]
    fn test_empty_file_crushable_without_removal() {
        assert_eq!(
            policy().classify(Path::new("/d/empty"), 0),
            Some(FileClass::Crushable)
        );
    }

    #[test]
    fn test_patterns_match_whole_path() {
        let mut p = policy();
        p.skip = Some(full_match_regex("skip").unwrap());
        assert_eq!(p.classify(Path::new("/d/skip"), 1), Some(FileClass::Crushable));
    }

    #[test]
    fn test_breadth_first_order() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("a/deep")).unwrap();
        fs::create_dir_all(root.path().join("b")).unwrap();
        fs::write(root.path().join("a/deep/f"), b"x").unwrap();
        fs::write(root.path().join("b/f"), b"x").unwrap();
        fs::write(root.path().join("top"), b"x").unwrap();

        let mut counters = ScanCounters::default();
        let scans = scan(&LocalStorage, root.path(), &policy(), &mut counters).unwrap();
        let dirs: Vec<PathBuf> = scans.iter().map(|s| s.dir.clone()).collect();

        assert_eq!(
            dirs,
            vec![
                root.path().to_path_buf(),
                root.path().join("a"),
                root.path().join("b"),
                root.path().join("a/deep"),
            ]
        );
        assert_eq!(counters.dirs_found, 4);
        assert_eq!(counters.files_found, 3);
    }

    #[test]
    fn test_ignored_files_are_not_counted() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("keep"), b"abc").unwrap();
        fs::write(root.path().join("drop.tmp"), b"abc").unwrap();
        fs::write(root.path().join("huge"), vec![0u8; 80]).unwrap();

        let mut p = policy();
        p.ignore = Some(full_match_regex(r".*\.tmp").unwrap());

        let mut counters = ScanCounters::default();
        let scans = scan(&LocalStorage, root.path(), &p, &mut counters).unwrap();

        assert_eq!(counters.files_found, 2);
        assert_eq!(counters.files_skipped, 1);
        assert_eq!(scans[0].crushable.len(), 1);
        assert_eq!(scans[0].crushable_bytes(), 3);
        assert_eq!(scans[0].skipped[0].path, root.path().join("huge"));
    }
}
