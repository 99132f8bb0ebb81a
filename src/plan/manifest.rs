//! Durable record of a plan in the run's temporary directory
//!
//! ```text
//! <tmp>/crush-<uuid>/
//! ├── in/
//! │   ├── dirs            {"bucket": "...", "file": "..."}       one line per file
//! │   ├── partition-map   {"bucket": "...", "partition": N}      one line per bucket
//! │   └── counters        scan counters (JSON)
//! └── out/
//!     ├── part-00000      {"source": "...", "output": "..."}     mapping records
//!     └── crush/...       staged bucket outputs
//! ```
//!
//! Workers never see the in-memory plan; they load their partitions back
//! from these files.

use super::{Plan, ScanCounters};
use crate::error::{CrushError, Result};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Paths inside one run's temporary directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpLayout {
    root: PathBuf,
}

impl TmpLayout {
    /// A fresh, uniquely named layout under `tmp_root`
    pub fn new(tmp_root: &Path) -> Self {
        Self {
            root: tmp_root.join(format!("crush-{}", Uuid::new_v4())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn in_dir(&self) -> PathBuf {
        self.root.join("in")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn bucket_manifest(&self) -> PathBuf {
        self.in_dir().join("dirs")
    }

    pub fn partition_manifest(&self) -> PathBuf {
        self.in_dir().join("partition-map")
    }

    pub fn counters(&self) -> PathBuf {
        self.in_dir().join("counters")
    }

    /// Root under which bucket outputs mirror the source tree
    pub fn staging_root(&self) -> PathBuf {
        self.out_dir().join("crush")
    }

    /// Mapping stream written by the worker handling `partition`
    pub fn mapping_file(&self, partition: usize) -> PathBuf {
        self.out_dir().join(format!("part-{:05}", partition))
    }

    /// Create the `in` and `out` directories
    pub fn create(&self, storage: &dyn Storage) -> Result<()> {
        storage.create_dir_all(&self.in_dir())?;
        storage.create_dir_all(&self.staging_root())?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketEntry {
    bucket: String,
    file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionEntry {
    bucket: String,
    partition: usize,
}

/// One bucket as seen by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketWork {
    pub id: String,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// All buckets assigned to one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionWork {
    pub id: usize,
    pub buckets: Vec<BucketWork>,
}

fn manifest_error(path: &Path, reason: impl ToString) -> CrushError {
    CrushError::Manifest {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn write_json_lines<T: Serialize>(
    storage: &dyn Storage,
    path: &Path,
    entries: impl IntoIterator<Item = T>,
) -> Result<()> {
    let mut out = BufWriter::new(storage.create(path)?);
    for entry in entries {
        serde_json::to_writer(&mut out, &entry).map_err(|e| manifest_error(path, e))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn read_json_lines<T: for<'de> Deserialize<'de>>(storage: &dyn Storage, path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(storage.open_read(path)?);
    let mut entries = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .map_err(|e| manifest_error(path, format!("line {}: {}", n + 1, e)))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Record the bucket manifest, partition map and scan counters
pub fn write_plan(storage: &dyn Storage, layout: &TmpLayout, plan: &Plan) -> Result<()> {
    write_json_lines(
        storage,
        &layout.bucket_manifest(),
        plan.buckets.iter().flat_map(|bucket| {
            bucket.files.iter().map(|file| BucketEntry {
                bucket: bucket.id.clone(),
                file: file.path.clone(),
            })
        }),
    )?;

    write_json_lines(
        storage,
        &layout.partition_manifest(),
        plan.partitions.iter().flat_map(|partition| {
            partition.buckets.iter().map(|bucket| PartitionEntry {
                bucket: bucket.clone(),
                partition: partition.id,
            })
        }),
    )?;

    write_counters(storage, &layout.counters(), &plan.counters)
}

pub fn write_counters(storage: &dyn Storage, path: &Path, counters: &ScanCounters) -> Result<()> {
    let mut out = BufWriter::new(storage.create(path)?);
    serde_json::to_writer_pretty(&mut out, counters).map_err(|e| manifest_error(path, e))?;
    out.flush()?;
    Ok(())
}

pub fn read_counters(storage: &dyn Storage, path: &Path) -> Result<ScanCounters> {
    let bytes = storage.read_all(path)?;
    serde_json::from_slice(&bytes).map_err(|e| manifest_error(path, e))
}

/// Directory owning a bucket, recovered from its `<dir>-<seq>` identity
fn bucket_dir(id: &str) -> Option<PathBuf> {
    let (dir, seq) = id.rsplit_once('-')?;
    seq.parse::<u64>().ok()?;
    Some(PathBuf::from(dir))
}

/// Rebuild every partition's work list from the manifests
pub fn load_partitions(storage: &dyn Storage, layout: &TmpLayout) -> Result<Vec<PartitionWork>> {
    let dirs_path = layout.bucket_manifest();
    let map_path = layout.partition_manifest();

    let mut files: HashMap<String, Vec<PathBuf>> = HashMap::new();
    for entry in read_json_lines::<BucketEntry>(storage, &dirs_path)? {
        files.entry(entry.bucket).or_default().push(entry.file);
    }

    let mut partitions: BTreeMap<usize, Vec<BucketWork>> = BTreeMap::new();
    let mut assigned = 0;
    for entry in read_json_lines::<PartitionEntry>(storage, &map_path)? {
        let bucket_files = files
            .remove(&entry.bucket)
            .ok_or_else(|| manifest_error(&map_path, format!("unknown bucket {}", entry.bucket)))?;
        let dir = bucket_dir(&entry.bucket).ok_or_else(|| {
            manifest_error(&map_path, format!("malformed bucket id {}", entry.bucket))
        })?;

        partitions.entry(entry.partition).or_default().push(BucketWork {
            id: entry.bucket,
            dir,
            files: bucket_files,
        });
        assigned += 1;
    }

    if let Some(orphan) = files.keys().next() {
        return Err(manifest_error(
            &dirs_path,
            format!("bucket {} has no partition ({} assigned)", orphan, assigned),
        ));
    }

    Ok(partitions
        .into_iter()
        .map(|(id, buckets)| PartitionWork { id, buckets })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Bucket, Partition, SourceFile};
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    fn bucket(dir: &str, seq: usize, names: &[&str]) -> Bucket {
        let dir = PathBuf::from(dir);
        let files: Vec<SourceFile> = names
            .iter()
            .map(|n| SourceFile {
                path: dir.join(n),
                len: 10,
                dir: dir.clone(),
            })
            .collect();
        Bucket {
            id: format!("{}-{}", dir.display(), seq),
            dir,
            bytes: 10 * files.len() as u64,
            files,
        }
    }

    #[test]
    fn test_layout_paths() {
        let layout = TmpLayout::new(Path::new("/tmp"));
        let name = layout.root().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("crush-"));
        assert_eq!(layout.mapping_file(3), layout.root().join("out/part-00003"));
        assert_eq!(layout.staging_root(), layout.root().join("out/crush"));
        assert_eq!(layout.partition_manifest(), layout.root().join("in/partition-map"));
    }

    #[test]
    fn test_bucket_dir_from_id() {
        assert_eq!(bucket_dir("/data/a-b-3"), Some(PathBuf::from("/data/a-b")));
        assert_eq!(bucket_dir("/data/a-x"), None);
        assert_eq!(bucket_dir("nodash"), None);
    }

    #[test]
    fn test_partitions_load_back_from_manifests() {
        let tmp = tempdir().unwrap();
        let layout = TmpLayout::new(tmp.path());
        layout.create(&LocalStorage).unwrap();

        let plan = Plan {
            buckets: vec![
                bucket("/src/a", 0, &["1", "2"]),
                bucket("/src/a", 1, &["3"]),
                bucket("/src/b", 0, &["4", "5"]),
            ],
            partitions: vec![
                Partition {
                    id: 0,
                    buckets: vec!["/src/a-0".into(), "/src/b-0".into()],
                },
                Partition {
                    id: 1,
                    buckets: vec!["/src/a-1".into()],
                },
            ],
            counters: ScanCounters {
                files_eligible: 5,
                ..Default::default()
            },
            skipped: vec![],
            removable: vec![],
        };

        write_plan(&LocalStorage, &layout, &plan).unwrap();
        let loaded = load_partitions(&LocalStorage, &layout).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, 0);
        assert_eq!(loaded[0].buckets[0].id, "/src/a-0");
        assert_eq!(loaded[0].buckets[0].dir, PathBuf::from("/src/a"));
        assert_eq!(
            loaded[0].buckets[0].files,
            vec![PathBuf::from("/src/a/1"), PathBuf::from("/src/a/2")]
        );
        assert_eq!(loaded[0].buckets[1].id, "/src/b-0");
        assert_eq!(loaded[1].buckets[0].files, vec![PathBuf::from("/src/a/3")]);

        let counters = read_counters(&LocalStorage, &layout.counters()).unwrap();
        assert_eq!(counters.files_eligible, 5);
    }

    #[test]
    fn test_unpartitioned_bucket_is_an_error() {
        let tmp = tempdir().unwrap();
        let layout = TmpLayout::new(tmp.path());
        layout.create(&LocalStorage).unwrap();

        let plan = Plan {
            buckets: vec![bucket("/src/a", 0, &["1"])],
            partitions: vec![],
            counters: ScanCounters::default(),
            skipped: vec![],
            removable: vec![],
        };
        write_plan(&LocalStorage, &layout, &plan).unwrap();

        let err = load_partitions(&LocalStorage, &layout).unwrap_err();
        assert!(matches!(err, CrushError::Manifest { .. }));
    }
}
