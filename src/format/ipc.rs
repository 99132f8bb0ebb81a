//! Arrow IPC file container
//!
//! The schema is embedded in the file, so the reader needs no extra
//! metadata. The file footer sits at the end; the whole file is read into
//! memory before decoding.

use super::codec::Codec;
use super::{Record, RecordSchema, SchemaSignature};
use crate::error::{FormatError, FormatResult};
use crate::storage::Storage;
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::{FileWriter, IpcWriteOptions};
use arrow::ipc::CompressionType;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

pub struct IpcReader {
    inner: FileReader<Cursor<Bytes>>,
    schema: RecordSchema,
}

impl IpcReader {
    pub fn open(storage: &dyn Storage, path: &Path) -> FormatResult<Self> {
        let bytes = storage.read_all(path)?;
        let inner = FileReader::try_new(Cursor::new(bytes), None)?;
        let schema = RecordSchema::Table {
            arrow: inner.schema(),
            columns: None,
        };
        Ok(Self { inner, schema })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn signature(&self) -> SchemaSignature {
        self.schema.signature()
    }

    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        match self.inner.next() {
            Some(batch) => Ok(Some(Record::Batch(batch?))),
            None => Ok(None),
        }
    }
}

pub struct IpcWriter {
    inner: FileWriter<BufWriter<Box<dyn Write + Send>>>,
    schema: SchemaRef,
}

impl IpcWriter {
    pub fn create(
        storage: &dyn Storage,
        path: &Path,
        schema: &RecordSchema,
        codec: Codec,
    ) -> FormatResult<Self> {
        let RecordSchema::Table { arrow, .. } = schema else {
            return Err(FormatError::IncompatibleRecord {
                sink: "ipc",
                record: "row",
            });
        };

        let mut options = IpcWriteOptions::default();
        if codec == Codec::Zstd {
            options = options.try_with_compression(Some(CompressionType::ZSTD))?;
        }

        let out = BufWriter::new(storage.create(path)?);
        let inner = FileWriter::try_new_with_options(out, arrow, options)?;
        Ok(Self {
            inner,
            schema: arrow.clone(),
        })
    }

    pub fn write(&mut self, record: Record) -> FormatResult<()> {
        match record {
            Record::Batch(batch) => {
                let batch = RecordBatch::try_new(self.schema.clone(), batch.columns().to_vec())?;
                self.inner.write(&batch)?;
                Ok(())
            }
            Record::Line(_) | Record::Pair(_) => Err(FormatError::IncompatibleRecord {
                sink: "ipc",
                record: "row",
            }),
        }
    }

    pub fn close(mut self) -> FormatResult<()> {
        self.inner.finish()?;
        let mut out = self.inner.into_inner()?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_batches_survive_zstd_output() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.arrow");
        let batch = sample_batch();
        let schema = RecordSchema::Table {
            arrow: batch.schema(),
            columns: None,
        };

        let mut writer = IpcWriter::create(&LocalStorage, &path, &schema, Codec::Zstd).unwrap();
        writer.write(Record::Batch(batch.clone())).unwrap();
        writer.write(Record::Batch(batch.clone())).unwrap();
        writer.close().unwrap();

        let mut reader = IpcReader::open(&LocalStorage, &path).unwrap();
        assert_eq!(reader.signature(), schema.signature());

        let mut rows = 0;
        while let Some(record) = reader.next_record().unwrap() {
            rows += record.row_count();
        }
        assert_eq!(rows, 6);
    }

    #[test]
    fn test_rejects_row_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.arrow");
        let schema = RecordSchema::Table {
            arrow: sample_batch().schema(),
            columns: None,
        };

        let mut writer = IpcWriter::create(&LocalStorage, &path, &schema, Codec::None).unwrap();
        let err = writer.write(Record::Line(b"x".to_vec())).unwrap_err();
        assert!(matches!(err, FormatError::IncompatibleRecord { .. }));
    }
}
