//! Mapping stream files (`out/part-NNNNN`)

use super::engine::MappingRecord;
use crate::error::{CrushError, Result};
use crate::storage::Storage;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends mapping records for one partition
pub struct MappingWriter {
    path: PathBuf,
    out: BufWriter<Box<dyn Write + Send>>,
    written: u64,
}

impl MappingWriter {
    pub fn create(storage: &dyn Storage, path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(storage.create(path)?),
            written: 0,
        })
    }

    pub fn append(&mut self, records: &[MappingRecord]) -> Result<()> {
        for record in records {
            serde_json::to_writer(&mut self.out, record).map_err(|e| CrushError::Manifest {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
            self.out.write_all(b"\n")?;
            self.written += 1;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64> {
        self.out.flush()?;
        Ok(self.written)
    }
}

/// Read every mapping record under `out_dir`, in partition order
pub fn read_mappings(storage: &dyn Storage, out_dir: &Path) -> Result<Vec<MappingRecord>> {
    let mut parts: Vec<PathBuf> = storage
        .list_dir(out_dir)?
        .into_iter()
        .filter(|e| {
            !e.is_dir
                && e.path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with("part-"))
        })
        .map(|e| e.path)
        .collect();
    parts.sort();

    let mut records = Vec::new();
    for part in parts {
        let reader = BufReader::new(storage.open_read(&part)?);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| CrushError::Manifest {
                path: part.clone(),
                reason: e.to_string(),
            })?;
            records.push(record);
        }
    }
    Ok(records)
}
