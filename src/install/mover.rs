//! Move installation: outputs and skipped originals into the destination

use super::{relocate, Installer};
use crate::error::InstallError;
use crate::merge::MappingRecord;
use crate::plan::SourceFile;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveSummary {
    pub outputs_moved: u64,
    pub skipped_moved: u64,
}

/// Installs into a destination tree mirroring the source tree
pub struct MoveInstaller<'a> {
    installer: Installer<'a>,
    staging_root: PathBuf,
    source_root: PathBuf,
    dest_root: PathBuf,
}

impl<'a> MoveInstaller<'a> {
    pub fn new(
        installer: Installer<'a>,
        staging_root: &Path,
        source_root: &Path,
        dest_root: &Path,
    ) -> Self {
        Self {
            installer,
            staging_root: staging_root.to_path_buf(),
            source_root: source_root.to_path_buf(),
            dest_root: dest_root.to_path_buf(),
        }
    }

    /// Move every distinct output, then every skipped original
    pub fn install(
        &self,
        mappings: &[MappingRecord],
        skipped: &[SourceFile],
    ) -> Result<MoveSummary, InstallError> {
        let mut summary = MoveSummary::default();
        let mut seen = HashSet::new();

        for mapping in mappings {
            if !seen.insert(&mapping.output) {
                continue;
            }
            let target = relocate(&mapping.output, &self.staging_root, &self.dest_root)?;
            let landed = self.installer.move_output(&mapping.output, &target)?;
            info!(output = %landed.display(), "Installed crush output");
            summary.outputs_moved += 1;
        }

        for file in skipped {
            let target = relocate(&file.path, &self.source_root, &self.dest_root)?;
            self.installer.move_file(&file.path, &target)?;
            summary.skipped_moved += 1;
        }

        Ok(summary)
    }
}
