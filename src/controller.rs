//! Run controller - sequences a crush run
//!
//! The controller is responsible for:
//! - Planning the source tree and recording the plan durably
//! - Handing partitions to the worker pool
//! - Reconciling planned and crushed file counts
//! - Installing the output with the strategy the run mode selects
//! - Removing the run's temporary directory after success

use crate::config::{CrushConfig, Mode};
use crate::error::{ConfigError, CrushError, Result};
use crate::install::{Installer, MoveInstaller, SwapInstaller};
use crate::merge::{read_mappings, run_partitions, MergeContext, MergeEngine, MergeTotals};
use crate::plan::manifest::{load_partitions, read_counters, write_counters, write_plan};
use crate::plan::scanner::list_files;
use crate::plan::{Planner, ScanCounters, TmpLayout};
use crate::spec::Placeholders;
use crate::storage::{LocalStorage, Storage};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of a completed run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Scan counters from the planning pass
    pub counters: ScanCounters,

    /// Merge totals aggregated from the workers
    pub totals: MergeTotals,

    /// Crushed outputs installed
    pub outputs_installed: u64,

    /// Original files relocated (skipped files in move mode, originals and
    /// empty files in clone mode)
    pub files_relocated: u64,

    /// Time taken for the run
    pub duration: Duration,
}

/// Progress information for display
#[derive(Debug, Clone, Default)]
pub struct CrushProgress {
    /// Buckets in the plan
    pub planned_buckets: u64,

    /// Files in the plan
    pub planned_files: u64,

    /// Bytes in the plan
    pub planned_bytes: u64,

    /// Work completed so far
    pub totals: MergeTotals,

    pub elapsed: Duration,
}

impl CrushProgress {
    /// Calculate records per second rate
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.totals.records as f64 / secs
        } else {
            0.0
        }
    }
}

/// Fail unless every eligible file was crushed
pub fn reconcile(counters: &ScanCounters, totals: &MergeTotals) -> Result<()> {
    if counters.files_eligible != totals.files {
        return Err(CrushError::InvariantViolation {
            eligible: counters.files_eligible,
            crushed: totals.files,
        });
    }
    Ok(())
}

/// Runs one crush from configuration to installed output
pub struct Crusher {
    config: Arc<CrushConfig>,
    storage: Arc<dyn Storage>,
    shutdown: Arc<AtomicBool>,
}

impl Crusher {
    /// Crusher over the local filesystem
    pub fn new(config: CrushConfig) -> Self {
        Self::with_storage(config, Arc::new(LocalStorage))
    }

    pub fn with_storage(config: CrushConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the crush
    ///
    /// `on_progress` is called periodically while buckets are being merged.
    pub fn run(&self, on_progress: &dyn Fn(&CrushProgress)) -> Result<RunSummary> {
        let start = Instant::now();
        let source = &self.config.source;

        if !self.storage.is_dir(source) {
            return Err(ConfigError::NotADirectory(source.clone()).into());
        }

        info!(
            source = %source.display(),
            mode = ?self.config.mode,
            timestamp = %self.config.timestamp,
            "Crush started"
        );

        let mut summary = match &self.config.mode {
            Mode::StandAlone { dest_file } => self.run_stand_alone(dest_file, start, on_progress)?,
            Mode::Move { .. } | Mode::Clone { .. } => self.run_tree(start, on_progress)?,
        };
        summary.duration = start.elapsed();

        info!(
            files = summary.totals.files,
            records = summary.totals.records,
            outputs = summary.outputs_installed,
            duration_ms = summary.duration.as_millis() as u64,
            "Crush complete"
        );
        Ok(summary)
    }

    fn run_tree(&self, start: Instant, on_progress: &dyn Fn(&CrushProgress)) -> Result<RunSummary> {
        let config = &self.config;
        let storage = self.storage.as_ref();

        // Every configuration error surfaces here, before anything is written
        let plan = Planner::new(&config.specs, &config.policy, config.plan)
            .plan(storage, &config.source)?;

        let layout = TmpLayout::new(&config.tmp_dir);
        layout.create(storage)?;
        write_plan(storage, &layout, &plan)?;
        info!(tmp = %layout.root().display(), "Plan recorded");

        let partitions = load_partitions(storage, &layout)?;
        let ctx = Arc::new(MergeContext {
            storage: Arc::clone(&self.storage),
            specs: config.specs.clone(),
            codec: config.codec,
            timestamp: config.timestamp.clone(),
            source_root: config.source.clone(),
            layout: layout.clone(),
        });

        let planned = CrushProgress {
            planned_buckets: plan.buckets.len() as u64,
            planned_files: plan.counters.files_eligible,
            planned_bytes: plan.counters.bytes_eligible,
            ..Default::default()
        };
        let totals = run_partitions(
            ctx,
            partitions,
            config.worker_count,
            Arc::clone(&self.shutdown),
            &|totals| {
                on_progress(&CrushProgress {
                    totals: *totals,
                    elapsed: start.elapsed(),
                    ..planned.clone()
                })
            },
        )
        .inspect_err(|_| warn!(tmp = %layout.root().display(), "Run failed; temporary files kept"))?;

        let counters = read_counters(storage, &layout.counters())?;
        reconcile(&counters, &totals)?;

        let mappings = read_mappings(storage, &layout.out_dir())?;
        let installer = Installer::new(storage, config.codec);

        let (outputs_installed, files_relocated) = match &config.mode {
            Mode::Clone { holding_dir } => {
                let swapped = SwapInstaller::new(installer, &config.source, holding_dir)
                    .install(&mappings, &plan.removable)?;
                (
                    swapped.outputs_installed,
                    swapped.originals_moved + swapped.removed_moved,
                )
            }
            Mode::Move { dest_dir } => {
                let moved = MoveInstaller::new(
                    installer,
                    &layout.staging_root(),
                    &config.source,
                    dest_dir,
                )
                .install(&mappings, &plan.skipped)?;
                (moved.outputs_moved, moved.skipped_moved)
            }
            Mode::StandAlone { .. } => (0, 0),
        };

        self.remove_tmp(&layout);

        Ok(RunSummary {
            counters,
            totals,
            outputs_installed,
            files_relocated,
            duration: start.elapsed(),
        })
    }

    /// Crush the immediate files of the source directory into `dest_file`
    fn run_stand_alone(
        &self,
        dest_file: &Path,
        start: Instant,
        on_progress: &dyn Fn(&CrushProgress),
    ) -> Result<RunSummary> {
        let config = &self.config;
        let storage = self.storage.as_ref();
        let source = &config.source;

        let files = list_files(storage, source, &config.policy)?;
        let mut counters = ScanCounters {
            dirs_found: 1,
            files_found: files.len() as u64,
            ..Default::default()
        };
        if files.is_empty() {
            info!(dir = %source.display(), "Nothing to crush");
            counters.dirs_skipped = 1;
            return Ok(RunSummary {
                counters,
                ..Default::default()
            });
        }

        let no_spec = || CrushError::from(ConfigError::NoMatchingSpec { dir: source.clone() });
        let spec = config.specs.get(0).ok_or_else(no_spec)?;
        let values = Placeholders {
            task_num: 0,
            timestamp: config.timestamp.clone(),
            file_num: 0,
        };
        let name = spec.output_name(source, &values).ok_or_else(no_spec)?;

        counters.dirs_eligible = 1;
        counters.files_eligible = files.len() as u64;
        counters.bytes_eligible = files.iter().map(|f| f.len).sum();

        let layout = TmpLayout::new(&config.tmp_dir);
        layout.create(storage)?;
        write_counters(storage, &layout.counters(), &counters)?;

        let planned = CrushProgress {
            planned_buckets: 1,
            planned_files: counters.files_eligible,
            planned_bytes: counters.bytes_eligible,
            ..Default::default()
        };
        let paths: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();
        let output = layout.staging_root().join(name);

        info!(
            dir = %source.display(),
            bucket = %format!("{}-0", source.display()),
            files = paths.len(),
            "Crushing directory"
        );
        let outcome = MergeEngine::new(storage, config.codec).merge(spec, &paths, &output, &|_| {})?;

        let totals = MergeTotals {
            buckets: 1,
            files: outcome.mappings.len() as u64,
            records: outcome.records,
        };
        on_progress(&CrushProgress {
            totals,
            elapsed: start.elapsed(),
            ..planned
        });
        reconcile(&counters, &totals)?;

        let landed = Installer::new(storage, config.codec).move_output(&outcome.output, dest_file)?;
        info!(output = %landed.display(), records = outcome.records, "Installed crush output");

        self.remove_tmp(&layout);

        Ok(RunSummary {
            counters,
            totals,
            outputs_installed: 1,
            files_relocated: 0,
            duration: start.elapsed(),
        })
    }

    fn remove_tmp(&self, layout: &TmpLayout) {
        if let Err(e) = self.storage.remove_dir_all(layout.root()) {
            warn!(tmp = %layout.root().display(), error = %e, "Failed to remove temporary directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile() {
        let counters = ScanCounters {
            files_eligible: 3,
            ..Default::default()
        };
        let crushed = |files| MergeTotals {
            buckets: 1,
            files,
            records: 10,
        };

        assert!(reconcile(&counters, &crushed(3)).is_ok());
        assert!(matches!(
            reconcile(&counters, &crushed(2)),
            Err(CrushError::InvariantViolation {
                eligible: 3,
                crushed: 2
            })
        ));
    }

    #[test]
    fn test_progress_rate() {
        let progress = CrushProgress {
            totals: MergeTotals {
                buckets: 1,
                files: 2,
                records: 500,
            },
            elapsed: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(progress.records_per_second(), 100.0);
        assert_eq!(CrushProgress::default().records_per_second(), 0.0);
    }
}
