//! Binary key/value row container
//!
//! File layout:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic "CRSQ"                 │
//! ├──────────────────────────────┤
//! │ header (bincode, plain)      │  version, key type, value type, codec
//! ├──────────────────────────────┤
//! │ body (codec-compressed)      │  Some(record) ... Some(record) None
//! └──────────────────────────────┘
//! ```
//!
//! The header is never compressed so the schema signature can be read
//! without touching the body.

use super::codec::{Codec, CodecWriter};
use super::{KeyValue, Record, RecordSchema, SchemaSignature};
use crate::error::{FormatError, FormatResult};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Read, Write};
use std::path::Path;

const MAGIC: [u8; 4] = *b"CRSQ";
const VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SequenceHeader {
    version: u8,
    key_type: String,
    value_type: String,
    codec: Codec,
}

pub struct SequenceReader {
    body: BufReader<Box<dyn Read + Send>>,
    schema: RecordSchema,
    done: bool,
}

impl SequenceReader {
    pub fn open(storage: &dyn Storage, path: &Path) -> FormatResult<Self> {
        let mut raw = storage.open_read(path)?;

        let mut magic = [0u8; 4];
        raw.read_exact(&mut magic)
            .map_err(|e| FormatError::BadHeader(format!("{}: {}", path.display(), e)))?;
        if magic != MAGIC {
            return Err(FormatError::BadHeader(format!(
                "{}: not a sequence file",
                path.display()
            )));
        }

        let header: SequenceHeader = bincode::deserialize_from(&mut raw)
            .map_err(|e| FormatError::BadHeader(format!("{}: {}", path.display(), e)))?;
        if header.version != VERSION {
            return Err(FormatError::BadHeader(format!(
                "{}: unsupported version {}",
                path.display(),
                header.version
            )));
        }

        let body = header.codec.decoder(raw)?;
        Ok(Self {
            body: BufReader::new(body),
            schema: RecordSchema::Rows {
                key_type: header.key_type,
                value_type: header.value_type,
            },
            done: false,
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn signature(&self) -> SchemaSignature {
        self.schema.signature()
    }

    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        let next: Option<KeyValue> = bincode::deserialize_from(&mut self.body)?;
        match next {
            Some(kv) => Ok(Some(Record::Pair(kv))),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

pub struct SequenceWriter {
    body: CodecWriter,
}

impl SequenceWriter {
    /// Create a sequence file whose header carries the row types of `schema`
    pub fn create(
        storage: &dyn Storage,
        path: &Path,
        schema: &RecordSchema,
        codec: Codec,
    ) -> FormatResult<Self> {
        let (key_type, value_type) = match schema {
            RecordSchema::Rows {
                key_type,
                value_type,
            } => (key_type.clone(), value_type.clone()),
            RecordSchema::Table { .. } => {
                return Err(FormatError::IncompatibleRecord {
                    sink: "sequence",
                    record: "table",
                })
            }
        };

        let mut raw = storage.create(path)?;
        raw.write_all(&MAGIC)?;
        let header = SequenceHeader {
            version: VERSION,
            key_type,
            value_type,
            codec,
        };
        bincode::serialize_into(&mut raw, &header)?;

        Ok(Self {
            body: codec.encoder(raw)?,
        })
    }

    pub fn write(&mut self, record: Record) -> FormatResult<()> {
        let kv = match record {
            Record::Pair(kv) => kv,
            // Lines become values under an empty key
            Record::Line(line) => KeyValue::new(Vec::new(), line),
            Record::Batch(_) => {
                return Err(FormatError::IncompatibleRecord {
                    sink: "sequence",
                    record: "table",
                })
            }
        };
        bincode::serialize_into(&mut self.body, &Some(&kv))?;
        Ok(())
    }

    pub fn close(mut self) -> FormatResult<()> {
        bincode::serialize_into(&mut self.body, &None::<&KeyValue>)?;
        self.body.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::tempdir;

    fn rows(key_type: &str, value_type: &str) -> RecordSchema {
        RecordSchema::Rows {
            key_type: key_type.to_string(),
            value_type: value_type.to_string(),
        }
    }

    fn collect(path: &Path) -> Vec<KeyValue> {
        let mut reader = SequenceReader::open(&LocalStorage, path).unwrap();
        let mut out = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            if let Record::Pair(kv) = record {
                out.push(kv);
            }
        }
        out
    }

    #[test]
    fn test_signature_from_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part");

        let writer =
            SequenceWriter::create(&LocalStorage, &path, &rows("Text", "LongWritable"), Codec::Zstd)
                .unwrap();
        writer.close().unwrap();

        let reader = SequenceReader::open(&LocalStorage, &path).unwrap();
        assert_eq!(reader.signature().as_str(), "Text:LongWritable");
    }

    #[test]
    fn test_records_in_write_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("part");

        let mut writer =
            SequenceWriter::create(&LocalStorage, &path, &rows("k", "v"), Codec::Deflate).unwrap();
        writer
            .write(Record::Pair(KeyValue::new(b"1".to_vec(), b"one".to_vec())))
            .unwrap();
        writer.write(Record::Line(b"two".to_vec())).unwrap();
        writer.close().unwrap();

        let records = collect(&path);
        assert_eq!(
            records,
            vec![
                KeyValue::new(b"1".to_vec(), b"one".to_vec()),
                KeyValue::new(Vec::new(), b"two".to_vec()),
            ]
        );
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, b"just some text that is long enough").unwrap();

        let err = SequenceReader::open(&LocalStorage, &path).err().unwrap();
        assert!(matches!(err, FormatError::BadHeader(_)));
    }
}
