//! Merge of one bucket into one output file
//!
//! ```text
//! file 0 ──► signature S ──► open sink(S) ──► records ─┐
//! file 1 ──► signature == S? ───────────────► records ─┼──► .<name>.inprogress
//! file N ──► signature == S? ───────────────► records ─┘            │
//!                                                    close, rename ─┴──► <name>
//! ```
//!
//! The output only appears under its final name after the sink closed
//! cleanly. Any failure removes the in-progress file and no mapping
//! records are produced for the bucket.

use crate::error::MergeError;
use crate::format::{Codec, RecordSink, SchemaSignature};
use crate::spec::CrushSpec;
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// First progress report after this many records
const FIRST_REPORT: u64 = 100;

/// One source file consumed into one bucket output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub source: PathBuf,
    /// Output path before any codec suffix is appended
    pub output: PathBuf,
}

/// Progress reporting points that double after every report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSchedule {
    next: u64,
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self { next: FIRST_REPORT }
    }
}

impl ReportSchedule {
    /// Whether `count` reached the current threshold; advances it if so
    pub fn due(&mut self, count: u64) -> bool {
        if count < self.next {
            return false;
        }
        while self.next <= count {
            self.next = self.next.saturating_mul(2);
        }
        true
    }
}

/// Result of a completed bucket merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Path recorded in the mapping records
    pub output: PathBuf,
    /// Path the output was actually written to (with any codec suffix)
    pub written: PathBuf,
    pub records: u64,
    pub mappings: Vec<MappingRecord>,
}

/// Streams bucket members into a single sink
pub struct MergeEngine<'a> {
    storage: &'a dyn Storage,
    codec: Codec,
}

impl<'a> MergeEngine<'a> {
    pub fn new(storage: &'a dyn Storage, codec: Codec) -> Self {
        Self { storage, codec }
    }

    /// Path the output of `output` is written under for this spec
    pub fn written_path(&self, spec: &CrushSpec, output: &Path) -> PathBuf {
        match spec.output.output_suffix(self.codec) {
            Some(suffix) => {
                let mut name = output.as_os_str().to_os_string();
                name.push(suffix);
                PathBuf::from(name)
            }
            None => output.to_path_buf(),
        }
    }

    /// Merge `files` in order into `output`
    ///
    /// `on_records` is called with the row count of every record written.
    pub fn merge(
        &self,
        spec: &CrushSpec,
        files: &[PathBuf],
        output: &Path,
        on_records: &dyn Fn(u64),
    ) -> Result<MergeOutcome, MergeError> {
        let written = self.written_path(spec, output);
        let staging = in_progress_path(&written);

        if let Some(parent) = written.parent() {
            self.storage
                .create_dir_all(parent)
                .map_err(|source| MergeError::Stage {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut sink = None;
        let streamed = self.stream(spec, files, &staging, &mut sink, on_records);

        let records = match streamed {
            Ok(records) => records,
            Err(e) => {
                if let Some(sink) = sink.take() {
                    if let Err(close_err) = sink.close() {
                        warn!(path = %staging.display(), error = %close_err, "Failed to close output after merge failure");
                    }
                }
                self.discard(&staging);
                return Err(e);
            }
        };

        if let Some(sink) = sink.take() {
            if let Err(source) = sink.close() {
                self.discard(&staging);
                return Err(MergeError::Write {
                    path: written,
                    source,
                });
            }
        }

        if let Err(source) = self.storage.rename(&staging, &written) {
            self.discard(&staging);
            return Err(MergeError::Stage {
                path: written,
                source,
            });
        }

        debug!(output = %written.display(), files = files.len(), records = records, "Bucket merged");

        Ok(MergeOutcome {
            output: output.to_path_buf(),
            written,
            records,
            mappings: files
                .iter()
                .map(|source| MappingRecord {
                    source: source.clone(),
                    output: output.to_path_buf(),
                })
                .collect(),
        })
    }

    fn stream(
        &self,
        spec: &CrushSpec,
        files: &[PathBuf],
        staging: &Path,
        sink: &mut Option<RecordSink>,
        on_records: &dyn Fn(u64),
    ) -> Result<u64, MergeError> {
        let mut reference: Option<SchemaSignature> = None;
        let mut records = 0u64;
        let mut schedule = ReportSchedule::default();

        for path in files {
            let mut reader = spec
                .input
                .open_reader(self.storage, path)
                .map_err(|source| MergeError::Read {
                    path: path.clone(),
                    source,
                })?;
            let signature = reader.signature();

            let out = match sink {
                Some(out) => {
                    if reference.as_ref() != Some(&signature) {
                        return Err(MergeError::SchemaMismatch {
                            path: path.clone(),
                            expected: reference.as_ref().map(|s| s.to_string()).unwrap_or_default(),
                            found: signature.to_string(),
                        });
                    }
                    out
                }
                None => {
                    let write_err = |source| MergeError::Write {
                        path: staging.to_path_buf(),
                        source,
                    };
                    let schema = spec
                        .output
                        .prepare_output_schema(reader.schema())
                        .map_err(write_err)?;
                    let opened = spec
                        .output
                        .open_writer(self.storage, staging, &schema, self.codec)
                        .map_err(write_err)?;
                    reference = Some(signature);
                    sink.insert(opened)
                }
            };

            debug!(file = %path.display(), "Crushing file");

            loop {
                let next = reader.next_record().map_err(|source| MergeError::Read {
                    path: path.clone(),
                    source,
                })?;
                let Some(record) = next else { break };

                let rows = record.row_count();
                out.write(record).map_err(|source| MergeError::Write {
                    path: staging.to_path_buf(),
                    source,
                })?;

                records += rows;
                on_records(rows);
                if schedule.due(records) {
                    info!(records = records, file = %path.display(), "Records crushed");
                }
            }
        }

        Ok(records)
    }

    fn discard(&self, staging: &Path) {
        if self.storage.exists(staging) {
            if let Err(e) = self.storage.remove_file(staging) {
                warn!(path = %staging.display(), error = %e, "Failed to remove partial output");
            }
        }
    }
}

/// Hidden sibling used while the output is being written
pub fn in_progress_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{}.inprogress", name))
}
