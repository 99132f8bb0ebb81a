//! Worker threads that merge partitions
//!
//! Each worker:
//! - Pulls whole partitions from a shared channel
//! - Merges the partition's buckets one at a time
//! - Writes the partition's mapping records to `out/part-NNNNN`
//! - Stops taking partitions once the shutdown flag is raised

use super::engine::MergeEngine;
use super::mapping::MappingWriter;
use crate::error::{ConfigError, CrushError, Result, WorkerError};
use crate::format::Codec;
use crate::install::relocate;
use crate::plan::{PartitionWork, TmpLayout};
use crate::spec::{CrushSpecs, Placeholders};
use crate::storage::Storage;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Read-only state shared by every worker
pub struct MergeContext {
    pub storage: Arc<dyn Storage>,
    pub specs: CrushSpecs,
    pub codec: Codec,
    /// Value of `${crush.timestamp}`
    pub timestamp: String,
    /// Root the bucket directories are relative to
    pub source_root: PathBuf,
    pub layout: TmpLayout,
}

/// Statistics collected by a worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Buckets merged
    pub buckets_crushed: AtomicU64,

    /// Source files consumed
    pub files_crushed: AtomicU64,

    /// Records written
    pub records_crushed: AtomicU64,
}

impl WorkerStats {
    fn record_bucket(&self, files: u64) {
        self.buckets_crushed.fetch_add(1, Ordering::Relaxed);
        self.files_crushed.fetch_add(files, Ordering::Relaxed);
    }

    fn record_records(&self, count: u64) {
        self.records_crushed.fetch_add(count, Ordering::Relaxed);
    }
}

/// Totals across all workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeTotals {
    pub buckets: u64,
    pub files: u64,
    pub records: u64,
}

/// A worker thread that processes partitions
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Thread handle
    handle: Option<JoinHandle<Result<()>>>,

    /// Worker statistics
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Spawn a new worker thread
    pub fn spawn(
        id: usize,
        ctx: Arc<MergeContext>,
        queue: Receiver<PartitionWork>,
        shutdown: Arc<AtomicBool>,
    ) -> std::result::Result<Self, WorkerError> {
        let stats = Arc::new(WorkerStats::default());
        let stats_clone = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(format!("crush-{}", id))
            .spawn(move || worker_loop(id, ctx, queue, shutdown, stats_clone))
            .map_err(|e| WorkerError::InitFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
            stats,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the worker to finish
    pub fn join(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Panicked {
                    id: self.id,
                    message: "Worker thread panicked".into(),
                }
                .into()),
            }
        } else {
            Ok(())
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    ctx: Arc<MergeContext>,
    queue: Receiver<PartitionWork>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
) -> Result<()> {
    debug!(worker = id, "Worker starting");

    while !shutdown.load(Ordering::Relaxed) {
        let partition = match queue.recv_timeout(Duration::from_millis(100)) {
            Ok(partition) => partition,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let id_of = partition.id;
        if let Err(e) = process_partition(&ctx, partition, &stats) {
            error!(worker = id, partition = id_of, error = %e, "Partition failed");
            shutdown.store(true, Ordering::SeqCst);
            return Err(e);
        }
    }

    debug!(worker = id, "Worker exiting");
    Ok(())
}

/// Merge every bucket of one partition and record its mappings
pub fn process_partition(
    ctx: &MergeContext,
    partition: PartitionWork,
    stats: &WorkerStats,
) -> Result<()> {
    let storage = ctx.storage.as_ref();
    let engine = MergeEngine::new(storage, ctx.codec);
    let staging_root = ctx.layout.staging_root();
    let mut mappings = MappingWriter::create(storage, &ctx.layout.mapping_file(partition.id))?;

    // File numbers restart with every partition
    for (file_num, bucket) in (0u64..).zip(&partition.buckets) {
        let no_spec = || CrushError::from(ConfigError::NoMatchingSpec {
            dir: bucket.dir.clone(),
        });
        let (_, spec) = ctx.specs.find(&bucket.dir).ok_or_else(no_spec)?;

        let values = Placeholders {
            task_num: partition.id,
            timestamp: ctx.timestamp.clone(),
            file_num,
        };
        let name = spec.output_name(&bucket.dir, &values).ok_or_else(no_spec)?;
        let output = relocate(&bucket.dir, &ctx.source_root, &staging_root)?.join(name);

        let outcome = engine.merge(spec, &bucket.files, &output, &|n| stats.record_records(n))?;
        mappings.append(&outcome.mappings)?;
        stats.record_bucket(outcome.mappings.len() as u64);

        info!(
            bucket = %bucket.id,
            files = bucket.files.len(),
            records = outcome.records,
            output = %outcome.written.display(),
            "Bucket crushed"
        );
    }

    let written = mappings.finish()?;
    debug!(partition = partition.id, mappings = written, "Mapping stream closed");
    Ok(())
}

/// Aggregate statistics from all workers
pub fn aggregate_stats(workers: &[Worker]) -> MergeTotals {
    workers.iter().fold(MergeTotals::default(), |acc, w| {
        let s = w.stats();
        MergeTotals {
            buckets: acc.buckets + s.buckets_crushed.load(Ordering::Relaxed),
            files: acc.files + s.files_crushed.load(Ordering::Relaxed),
            records: acc.records + s.records_crushed.load(Ordering::Relaxed),
        }
    })
}

/// Run all partitions on up to `worker_count` threads
///
/// `on_tick` is called periodically with the running totals while the
/// workers are busy. Returns the first worker failure, if any.
pub fn run_partitions(
    ctx: Arc<MergeContext>,
    partitions: Vec<PartitionWork>,
    worker_count: usize,
    shutdown: Arc<AtomicBool>,
    on_tick: &dyn Fn(&MergeTotals),
) -> Result<MergeTotals> {
    if partitions.is_empty() {
        return Ok(MergeTotals::default());
    }

    let (tx, rx) = bounded(partitions.len());
    for partition in partitions {
        tx.send(partition).map_err(|_| WorkerError::QueueSendFailed)?;
    }
    drop(tx);

    let count = worker_count.clamp(1, rx.len());
    let mut workers = Vec::with_capacity(count);
    for id in 0..count {
        match Worker::spawn(id, Arc::clone(&ctx), rx.clone(), Arc::clone(&shutdown)) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                shutdown.store(true, Ordering::SeqCst);
                for worker in workers {
                    let _ = worker.join();
                }
                return Err(e.into());
            }
        }
    }
    info!(count = workers.len(), "Workers spawned");

    while !workers.iter().all(Worker::is_finished) {
        on_tick(&aggregate_stats(&workers));
        thread::sleep(Duration::from_millis(100));
    }

    let totals = aggregate_stats(&workers);
    on_tick(&totals);

    let mut first_error = None;
    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.join() {
            if first_error.is_none() {
                first_error = Some(e);
            } else {
                warn!(worker = id, error = %e, "Additional worker failure");
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if !rx.is_empty() {
        return Err(CrushError::Interrupted);
    }
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatAdapter;
    use crate::merge::mapping::read_mappings;
    use crate::plan::BucketWork;
    use crate::spec::CrushSpec;
    use crate::storage::LocalStorage;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn context(root: &Path, template: &str) -> MergeContext {
        let layout = TmpLayout::new(&root.join("tmp"));
        layout.create(&LocalStorage).unwrap();
        MergeContext {
            storage: Arc::new(LocalStorage),
            specs: CrushSpecs::new(vec![CrushSpec::new(
                ".+",
                template,
                FormatAdapter::Text,
                FormatAdapter::Text,
            )
            .unwrap()]),
            codec: Codec::None,
            timestamp: "20240101000000".to_string(),
            source_root: root.join("src"),
            layout,
        }
    }

    fn bucket(root: &Path, dir: &str, seq: usize, names: &[&str]) -> BucketWork {
        let dir = root.join("src").join(dir);
        fs::create_dir_all(&dir).unwrap();
        let files = names
            .iter()
            .map(|n| {
                let p = dir.join(n);
                fs::write(&p, format!("{}\n", n)).unwrap();
                p
            })
            .collect();
        BucketWork {
            id: format!("{}-{}", dir.display(), seq),
            dir,
            files,
        }
    }

    #[test]
    fn test_file_num_advances_per_bucket() {
        let root = tempdir().unwrap();
        let ctx = context(root.path(), "c-${crush.task.num}-${crush.file.num}");
        let partition = PartitionWork {
            id: 4,
            buckets: vec![
                bucket(root.path(), "a", 0, &["1", "2"]),
                bucket(root.path(), "b/c", 0, &["3"]),
            ],
        };

        let stats = WorkerStats::default();
        process_partition(&ctx, partition, &stats).unwrap();

        let staging = ctx.layout.staging_root();
        assert_eq!(fs::read_to_string(staging.join("a/c-4-0")).unwrap(), "1\n2\n");
        assert_eq!(fs::read_to_string(staging.join("b/c/c-4-1")).unwrap(), "3\n");
        assert_eq!(stats.files_crushed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.records_crushed.load(Ordering::Relaxed), 3);

        let mappings = read_mappings(&LocalStorage, &ctx.layout.out_dir()).unwrap();
        assert_eq!(mappings.len(), 3);
        assert_eq!(mappings[2].output, staging.join("b/c/c-4-1"));
    }

    #[test]
    fn test_pool_runs_every_partition() {
        let root = tempdir().unwrap();
        let ctx = Arc::new(context(
            root.path(),
            "c-${crush.task.num}-${crush.file.num}",
        ));
        let partitions: Vec<PartitionWork> = (0..5)
            .map(|i| PartitionWork {
                id: i,
                buckets: vec![bucket(root.path(), &format!("d{}", i), 0, &["x", "y"])],
            })
            .collect();

        let totals = run_partitions(
            Arc::clone(&ctx),
            partitions,
            3,
            Arc::new(AtomicBool::new(false)),
            &|_| {},
        )
        .unwrap();

        assert_eq!(
            totals,
            MergeTotals {
                buckets: 5,
                files: 10,
                records: 10
            }
        );
        let mappings = read_mappings(&LocalStorage, &ctx.layout.out_dir()).unwrap();
        assert_eq!(mappings.len(), 10);
    }

    #[test]
    fn test_file_num_restarts_per_partition() {
        for workers in [1, 2] {
            let root = tempdir().unwrap();
            let ctx = Arc::new(context(
                root.path(),
                "c-${crush.task.num}-${crush.file.num}",
            ));
            let partitions: Vec<PartitionWork> = (0..2)
                .map(|i| PartitionWork {
                    id: i,
                    buckets: vec![bucket(root.path(), &format!("p{}", i), 0, &["x"])],
                })
                .collect();

            run_partitions(
                Arc::clone(&ctx),
                partitions,
                workers,
                Arc::new(AtomicBool::new(false)),
                &|_| {},
            )
            .unwrap();

            let staging = ctx.layout.staging_root();
            let mut outputs: Vec<PathBuf> = read_mappings(&LocalStorage, &ctx.layout.out_dir())
                .unwrap()
                .into_iter()
                .map(|m| m.output)
                .collect();
            outputs.sort();
            assert_eq!(
                outputs,
                vec![staging.join("p0/c-0-0"), staging.join("p1/c-1-0")],
                "workers = {}",
                workers
            );
        }
    }

    #[test]
    fn test_failed_partition_fails_the_pool() {
        let root = tempdir().unwrap();
        let ctx = Arc::new(context(root.path(), "out"));
        let mut broken = bucket(root.path(), "a", 0, &["1"]);
        broken.files.push(root.path().join("src/a/missing"));

        let err = run_partitions(
            ctx,
            vec![PartitionWork {
                id: 0,
                buckets: vec![broken],
            }],
            2,
            Arc::new(AtomicBool::new(false)),
            &|_| {},
        )
        .unwrap_err();

        assert!(matches!(err, CrushError::Merge(_)));
    }
}
