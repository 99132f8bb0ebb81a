//! Planning pass
//!
//! A single sequential pass that turns a source tree into buckets and
//! partitions:
//!
//! ```text
//! scan (BFS) ──► per-directory buckets ──► partitions (≤ max tasks)
//!      │                  │                        │
//!      └── counters       └── bucket manifest      └── partition map
//! ```
//!
//! The plan is fully computed in memory, and every configuration error is
//! raised, before anything is written to disk.

pub mod bucketer;
pub mod manifest;
pub mod scanner;

pub use manifest::{BucketWork, PartitionWork, TmpLayout};
pub use scanner::{DirectoryScan, FileClass, ScanPolicy, SourceFile};

use crate::error::{ConfigError, Result};
use crate::spec::CrushSpecs;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Scan counters, persisted alongside the manifests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounters {
    /// Directories visited
    pub dirs_found: u64,
    /// Directories that produced no buckets
    pub dirs_skipped: u64,
    /// Directories that produced at least one bucket
    pub dirs_eligible: u64,
    /// Non-ignored files seen
    pub files_found: u64,
    /// Files assigned to a bucket
    pub files_eligible: u64,
    /// Files left in place (skip pattern, too large, or in an unbucketed directory)
    pub files_skipped: u64,
    /// Empty files marked for removal
    pub files_removed: u64,
    /// Bytes assigned to buckets
    pub bytes_eligible: u64,
}

/// A size-bounded group of files from one directory, merged into one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// `<dir>-<seq>`
    pub id: String,
    pub dir: PathBuf,
    pub files: Vec<SourceFile>,
    pub bytes: u64,
}

/// A set of buckets processed by one worker task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: usize,
    pub buckets: Vec<String>,
}

/// Result of the planning pass
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub buckets: Vec<Bucket>,
    pub partitions: Vec<Partition>,
    pub counters: ScanCounters,
    /// Files left untouched in the source tree
    pub skipped: Vec<SourceFile>,
    /// Empty files to be removed from the source tree
    pub removable: Vec<SourceFile>,
}

/// Sizing knobs for bucket and partition grouping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanOptions {
    pub block_size: u64,
    pub max_file_blocks: u64,
    pub include_single_file_dirs: bool,
    pub max_tasks: usize,
}

/// Spread buckets over at most `max_tasks` partitions, balancing bytes
///
/// Empty partitions are dropped and the rest numbered 0..P-1.
pub fn partition(buckets: &[Bucket], max_tasks: usize) -> Vec<Partition> {
    let sizes: Vec<u64> = buckets.iter().map(|b| b.bytes).collect();
    bucketer::balance(&sizes, max_tasks)
        .into_iter()
        .filter(|bin| !bin.is_empty())
        .enumerate()
        .map(|(id, bin)| Partition {
            id,
            buckets: bin.into_iter().map(|i| buckets[i].id.clone()).collect(),
        })
        .collect()
}

/// Runs the scan and grouping for one source tree
pub struct Planner<'a> {
    specs: &'a CrushSpecs,
    policy: &'a ScanPolicy,
    options: PlanOptions,
}

impl<'a> Planner<'a> {
    pub fn new(specs: &'a CrushSpecs, policy: &'a ScanPolicy, options: PlanOptions) -> Self {
        Self {
            specs,
            policy,
            options,
        }
    }

    pub fn plan(&self, storage: &dyn Storage, root: &Path) -> Result<Plan> {
        let mut plan = Plan::default();
        let scans = scanner::scan(storage, root, self.policy, &mut plan.counters)?;

        for scan in scans {
            plan.skipped.extend(scan.skipped.iter().cloned());
            plan.removable.extend(scan.removable.iter().cloned());

            let bytes = scan.crushable_bytes();
            if bytes == 0 {
                debug!(dir = %scan.dir.display(), "No crushable bytes");
                self.leave_in_place(&mut plan, scan);
                continue;
            }

            if self.specs.find(&scan.dir).is_none() {
                return Err(ConfigError::NoMatchingSpec { dir: scan.dir }.into());
            }

            let groups = bucketer::plan_directory(
                &scan,
                self.options.block_size,
                self.options.max_file_blocks,
                self.options.include_single_file_dirs,
            );
            if groups.is_empty() {
                info!(dir = %scan.dir.display(), "Skipping single-file directory");
                self.leave_in_place(&mut plan, scan);
                continue;
            }

            info!(
                dir = %scan.dir.display(),
                files = scan.crushable.len(),
                bytes = bytes,
                buckets = groups.len(),
                "Directory eligible"
            );
            plan.counters.dirs_eligible += 1;
            plan.counters.bytes_eligible += bytes;

            for (seq, files) in groups.into_iter().enumerate() {
                plan.counters.files_eligible += files.len() as u64;
                plan.buckets.push(Bucket {
                    id: format!("{}-{}", scan.dir.display(), seq),
                    dir: scan.dir.clone(),
                    bytes: files.iter().map(|f| f.len).sum(),
                    files,
                });
            }
        }

        plan.partitions = partition(&plan.buckets, self.options.max_tasks);
        info!(
            buckets = plan.buckets.len(),
            partitions = plan.partitions.len(),
            "Plan complete"
        );
        Ok(plan)
    }

    fn leave_in_place(&self, plan: &mut Plan, scan: DirectoryScan) {
        plan.counters.dirs_skipped += 1;
        plan.counters.files_skipped += scan.crushable.len() as u64;
        plan.skipped.extend(scan.crushable);
    }
}
