//! Swap (clone) installation
//!
//! Per bucket output:
//!
//! ```text
//! 1. src/d/a  ──► hold/d/a        every original, in mapping order
//!    src/d/b  ──► hold/d/b
//! 2. out/crush/d/crushed ──► src/d/crushed   only after step 1 completed
//! ```
//!
//! There is no rollback. If a rename fails the error carries a
//! [`Remediation`] naming what moved where and the command that restores
//! a consistent directory.

use super::{relocate, Installer};
use crate::error::{InstallError, Remediation};
use crate::merge::MappingRecord;
use crate::plan::SourceFile;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapSummary {
    pub outputs_installed: u64,
    pub originals_moved: u64,
    pub removed_moved: u64,
}

/// Output path and its sources, in first-seen order
fn group_by_output(mappings: &[MappingRecord]) -> Vec<(PathBuf, Vec<PathBuf>)> {
    let mut groups: Vec<(PathBuf, Vec<PathBuf>)> = Vec::new();
    for mapping in mappings {
        match groups.iter_mut().find(|(output, _)| *output == mapping.output) {
            Some((_, sources)) => sources.push(mapping.source.clone()),
            None => groups.push((mapping.output.clone(), vec![mapping.source.clone()])),
        }
    }
    groups
}

/// Replaces originals in the source tree with their crushed output
pub struct SwapInstaller<'a> {
    installer: Installer<'a>,
    source_root: PathBuf,
    holding_root: PathBuf,
}

impl<'a> SwapInstaller<'a> {
    pub fn new(installer: Installer<'a>, source_root: &Path, holding_root: &Path) -> Self {
        Self {
            installer,
            source_root: source_root.to_path_buf(),
            holding_root: holding_root.to_path_buf(),
        }
    }

    pub fn install(
        &self,
        mappings: &[MappingRecord],
        removable: &[SourceFile],
    ) -> Result<SwapSummary, InstallError> {
        let mut summary = SwapSummary::default();

        for (output, sources) in group_by_output(mappings) {
            if let Err(e) = self.swap(&output, &sources, &mut summary) {
                if let InstallError::SwapInterrupted { remediation, .. } = &e {
                    error!(
                        output = %output.display(),
                        moved = remediation.moved.len(),
                        remaining = remediation.remaining.len(),
                        "Swap interrupted. Execute: {}",
                        remediation.command()
                    );
                    for (original, held) in &remediation.moved {
                        error!("Moved {} to {}", original.display(), held.display());
                    }
                }
                return Err(e);
            }
        }

        for file in removable {
            let held = relocate(&file.path, &self.source_root, &self.holding_root)?;
            self.installer.move_file(&file.path, &held)?;
            summary.removed_moved += 1;
        }

        Ok(summary)
    }

    fn swap(
        &self,
        output: &Path,
        sources: &[PathBuf],
        summary: &mut SwapSummary,
    ) -> Result<(), InstallError> {
        let Some(crushed_dir) = sources.first().and_then(|s| s.parent()) else {
            return Ok(());
        };
        let crushed_dir = crushed_dir.to_path_buf();

        let mut moved = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            let result = relocate(source, &self.source_root, &self.holding_root)
                .and_then(|held| self.installer.move_file(source, &held).map(|_| held));

            match result {
                Ok(held) => {
                    moved.push((source.clone(), held));
                    summary.originals_moved += 1;
                }
                Err(e) => {
                    return Err(InstallError::SwapInterrupted {
                        remediation: Remediation {
                            output: output.to_path_buf(),
                            crushed_dir,
                            moved,
                            remaining: sources[i..].to_vec(),
                        },
                        source: Box::new(e),
                    });
                }
            }
        }

        let name = output.file_name().unwrap_or_default();
        let target = crushed_dir.join(name);
        match self.installer.move_output(output, &target) {
            Ok(landed) => {
                info!(output = %landed.display(), originals = moved.len(), "Swapped crush output into place");
                summary.outputs_installed += 1;
                Ok(())
            }
            Err(e) => Err(InstallError::SwapInterrupted {
                remediation: Remediation {
                    output: output.to_path_buf(),
                    crushed_dir,
                    moved,
                    remaining: Vec::new(),
                },
                source: Box::new(e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Codec;
    use crate::storage::{DirEntry, LocalStorage, Storage};
    use std::fs;
    use std::io::{self, Read, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Local storage whose Nth rename fails
    struct FailingRename {
        fail_at: usize,
        renames: AtomicUsize,
        log: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl FailingRename {
        fn new(fail_at: usize) -> Self {
            Self {
                fail_at,
                renames: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
            }
        }
    }

    impl Storage for FailingRename {
        fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
            LocalStorage.list_dir(dir)
        }
        fn is_dir(&self, path: &Path) -> bool {
            LocalStorage.is_dir(path)
        }
        fn exists(&self, path: &Path) -> bool {
            LocalStorage.exists(path)
        }
        fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            LocalStorage.open_read(path)
        }
        fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
            LocalStorage.create(path)
        }
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let n = self.renames.fetch_add(1, Ordering::SeqCst);
            if n == self.fail_at {
                return Err(io::Error::new(io::ErrorKind::Other, "injected rename failure"));
            }
            self.log.lock().unwrap().push((from.to_path_buf(), to.to_path_buf()));
            LocalStorage.rename(from, to)
        }
        fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            LocalStorage.create_dir_all(path)
        }
        fn remove_file(&self, path: &Path) -> io::Result<()> {
            LocalStorage.remove_file(path)
        }
        fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            LocalStorage.remove_dir_all(path)
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        src: PathBuf,
        hold: PathBuf,
        output: PathBuf,
        mappings: Vec<MappingRecord>,
    }

    fn fixture() -> Fixture {
        let root = tempdir().unwrap();
        let src = root.path().join("src");
        let hold = root.path().join("hold");
        let output = root.path().join("tmp/out/crush/d/m");

        fs::create_dir_all(src.join("d")).unwrap();
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(src.join("d/a"), b"a").unwrap();
        fs::write(src.join("d/b"), b"b").unwrap();
        fs::write(&output, b"ab").unwrap();

        let mappings = ["a", "b"]
            .iter()
            .map(|n| MappingRecord {
                source: src.join("d").join(n),
                output: output.clone(),
            })
            .collect();

        Fixture {
            _root: root,
            src,
            hold,
            output,
            mappings,
        }
    }

    #[test]
    fn test_originals_move_before_output() {
        let fx = fixture();
        let storage = FailingRename::new(usize::MAX);
        let swapper = SwapInstaller::new(Installer::new(&storage, Codec::None), &fx.src, &fx.hold);

        let summary = swapper.install(&fx.mappings, &[]).unwrap();
        assert_eq!(summary.outputs_installed, 1);
        assert_eq!(summary.originals_moved, 2);

        let log = storage.log.lock().unwrap();
        let order: Vec<PathBuf> = log.iter().map(|(from, _)| from.clone()).collect();
        assert_eq!(
            order,
            vec![fx.src.join("d/a"), fx.src.join("d/b"), fx.output.clone()]
        );
        assert_eq!(fs::read(fx.src.join("d/m")).unwrap(), b"ab");
        assert_eq!(fs::read(fx.hold.join("d/a")).unwrap(), b"a");
        assert!(!fx.src.join("d/a").exists());
    }

    #[test]
    fn test_failure_after_first_original() {
        let fx = fixture();
        let storage = FailingRename::new(1);
        let swapper = SwapInstaller::new(Installer::new(&storage, Codec::None), &fx.src, &fx.hold);

        let err = swapper.install(&fx.mappings, &[]).unwrap_err();
        let InstallError::SwapInterrupted { remediation, .. } = err else {
            panic!("expected a swap interruption");
        };

        assert_eq!(
            remediation.moved,
            vec![(fx.src.join("d/a"), fx.hold.join("d/a"))]
        );
        assert_eq!(remediation.remaining, vec![fx.src.join("d/b")]);
        assert!(!remediation.install_pending());
        assert!(fx.src.join("d/b").exists());
        assert!(fx.output.exists());
        assert!(!fx.src.join("d/m").exists());
    }

    #[test]
    fn test_failure_installing_output() {
        let fx = fixture();
        let storage = FailingRename::new(2);
        let swapper = SwapInstaller::new(Installer::new(&storage, Codec::None), &fx.src, &fx.hold);

        let err = swapper.install(&fx.mappings, &[]).unwrap_err();
        let InstallError::SwapInterrupted { remediation, .. } = err else {
            panic!("expected a swap interruption");
        };
        assert!(remediation.install_pending());
        assert_eq!(
            remediation.command(),
            format!("mv {} {}/", fx.output.display(), fx.src.join("d").display())
        );
    }

    #[test]
    fn test_group_by_output_keeps_first_seen_order() {
        let rec = |s: &str, o: &str| MappingRecord {
            source: PathBuf::from(s),
            output: PathBuf::from(o),
        };
        let groups = group_by_output(&[rec("/a", "/x"), rec("/b", "/y"), rec("/c", "/x")]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1, vec![PathBuf::from("/a"), PathBuf::from("/c")]);
        assert_eq!(groups[1].0, PathBuf::from("/y"));
    }
}
