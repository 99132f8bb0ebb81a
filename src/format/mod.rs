//! Format adapters
//!
//! Every serialization format is reached through three capabilities:
//! open a record stream, open a sink, derive a schema signature.
//!
//! ```text
//!            row family                     table family
//!     ┌──────────┬──────────────┐    ┌─────────────┬──────────────┐
//!     │  text    │  sequence    │    │  ipc        │  parquet     │
//!     │  Line    │  Pair        │    │  Batch      │  Batch       │
//!     └──────────┴──────────────┘    └─────────────┴──────────────┘
//! ```
//!
//! Input and output formats may differ within a family. The adapter for a
//! crush spec is chosen once from its format identifier, so the merge loop
//! never inspects record types to decide where to send them.

pub mod codec;
pub mod ipc;
pub mod parquet;
pub mod sequence;
pub mod text;

pub use codec::Codec;

use crate::error::{ConfigError, FormatResult};
use crate::storage::Storage;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// One key/value row of a sequence container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }
}

/// A unit read from a source file and handed to a sink
#[derive(Debug, Clone)]
pub enum Record {
    /// A text line without its terminator
    Line(Vec<u8>),
    /// A key/value row
    Pair(KeyValue),
    /// A batch of columnar rows
    Batch(RecordBatch),
}

impl Record {
    /// Number of logical rows carried by this record
    pub fn row_count(&self) -> u64 {
        match self {
            Record::Line(_) | Record::Pair(_) => 1,
            Record::Batch(batch) => batch.num_rows() as u64,
        }
    }
}

/// A column of a table schema with its logical type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// Dotted column path
    pub name: String,
    /// Logical type (bigint, string, decimal(p,s), ...)
    pub type_name: String,
}

impl ColumnType {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Structural metadata of a source file
#[derive(Debug, Clone)]
pub enum RecordSchema {
    /// Key/value rows with named key and value types
    Rows { key_type: String, value_type: String },
    /// Columnar rows; `columns` is the footer-derived list when known
    Table {
        arrow: SchemaRef,
        columns: Option<Vec<ColumnType>>,
    },
}

impl RecordSchema {
    /// Opaque comparable value describing this structure
    pub fn signature(&self) -> SchemaSignature {
        match self {
            RecordSchema::Rows {
                key_type,
                value_type,
            } => SchemaSignature(format!("{}:{}", key_type, value_type)),
            RecordSchema::Table {
                columns: Some(columns),
                ..
            } => SchemaSignature(
                columns
                    .iter()
                    .map(|c| format!("{}:{}", c.name, c.type_name))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            RecordSchema::Table { arrow, .. } => SchemaSignature(
                arrow
                    .fields()
                    .iter()
                    .map(|f| {
                        let null = if f.is_nullable() { "" } else { " not null" };
                        format!("{}:{}{}", f.name(), f.data_type(), null)
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }
}

/// Opaque schema identity; files merge only when theirs are equal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaSignature(String);

impl SchemaSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record families; formats convert freely only within one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Row,
    Table,
}

/// Configuration-time selected serialization format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatAdapter {
    Text,
    Sequence,
    Ipc,
    Parquet,
}

impl FormatAdapter {
    /// Parse a format identifier
    pub fn parse(id: &str) -> Result<Self, ConfigError> {
        match id.to_ascii_lowercase().as_str() {
            "text" => Ok(FormatAdapter::Text),
            "sequence" => Ok(FormatAdapter::Sequence),
            "ipc" | "arrow" => Ok(FormatAdapter::Ipc),
            "parquet" => Ok(FormatAdapter::Parquet),
            _ => Err(ConfigError::UnknownFormat(id.to_string())),
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            FormatAdapter::Text => "text",
            FormatAdapter::Sequence => "sequence",
            FormatAdapter::Ipc => "ipc",
            FormatAdapter::Parquet => "parquet",
        }
    }

    pub fn family(self) -> Family {
        match self {
            FormatAdapter::Text | FormatAdapter::Sequence => Family::Row,
            FormatAdapter::Ipc | FormatAdapter::Parquet => Family::Table,
        }
    }

    /// Fail unless records of `input` can be written by `output`
    pub fn check_pair(input: Self, output: Self) -> Result<(), ConfigError> {
        if input.family() != output.family() {
            return Err(ConfigError::IncompatibleFormats {
                input: input.id().to_string(),
                output: output.id().to_string(),
            });
        }
        Ok(())
    }

    /// Suffix this format appends to its output file name under `codec`
    pub fn output_suffix(self, codec: Codec) -> Option<&'static str> {
        match self {
            FormatAdapter::Text => codec.extension(),
            _ => None,
        }
    }

    pub fn open_reader(self, storage: &dyn Storage, path: &Path) -> FormatResult<RecordReader> {
        Ok(match self {
            FormatAdapter::Text => RecordReader::Text(text::TextReader::open(storage, path)?),
            FormatAdapter::Sequence => {
                RecordReader::Sequence(sequence::SequenceReader::open(storage, path)?)
            }
            FormatAdapter::Ipc => RecordReader::Ipc(ipc::IpcReader::open(storage, path)?),
            FormatAdapter::Parquet => {
                RecordReader::Parquet(parquet::ParquetReader::open(storage, path)?)
            }
        })
    }

    /// Schema signature of a file without reading its records
    pub fn schema_signature(
        self,
        storage: &dyn Storage,
        path: &Path,
    ) -> FormatResult<SchemaSignature> {
        Ok(self.open_reader(storage, path)?.signature())
    }

    /// Turn an input file's schema into what this output format needs
    ///
    /// Parquet output needs the column list; an IPC input does not carry
    /// one, so it is derived from the Arrow schema.
    pub fn prepare_output_schema(self, input: &RecordSchema) -> FormatResult<RecordSchema> {
        match (self, input) {
            (
                FormatAdapter::Parquet,
                RecordSchema::Table {
                    arrow,
                    columns: None,
                },
            ) => Ok(RecordSchema::Table {
                arrow: arrow.clone(),
                columns: Some(parquet::columns_from_arrow(arrow)?),
            }),
            _ => Ok(input.clone()),
        }
    }

    /// Open a sink; `path` is the exact file to create
    pub fn open_writer(
        self,
        storage: &dyn Storage,
        path: &Path,
        schema: &RecordSchema,
        codec: Codec,
    ) -> FormatResult<RecordSink> {
        Ok(match self {
            FormatAdapter::Text => RecordSink::Text(text::TextWriter::create(storage, path, codec)?),
            FormatAdapter::Sequence => RecordSink::Sequence(sequence::SequenceWriter::create(
                storage, path, schema, codec,
            )?),
            FormatAdapter::Ipc => {
                RecordSink::Ipc(ipc::IpcWriter::create(storage, path, schema, codec)?)
            }
            FormatAdapter::Parquet => {
                RecordSink::Parquet(parquet::ParquetWriter::create(storage, path, schema, codec)?)
            }
        })
    }
}

impl fmt::Display for FormatAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// An open record stream over one source file
pub enum RecordReader {
    Text(text::TextReader),
    Sequence(sequence::SequenceReader),
    Ipc(ipc::IpcReader),
    Parquet(parquet::ParquetReader),
}

impl RecordReader {
    pub fn schema(&self) -> &RecordSchema {
        match self {
            RecordReader::Text(r) => r.schema(),
            RecordReader::Sequence(r) => r.schema(),
            RecordReader::Ipc(r) => r.schema(),
            RecordReader::Parquet(r) => r.schema(),
        }
    }

    pub fn signature(&self) -> SchemaSignature {
        match self {
            RecordReader::Text(r) => r.signature(),
            RecordReader::Sequence(r) => r.signature(),
            RecordReader::Ipc(r) => r.signature(),
            RecordReader::Parquet(r) => r.signature(),
        }
    }

    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        match self {
            RecordReader::Text(r) => r.next_record(),
            RecordReader::Sequence(r) => r.next_record(),
            RecordReader::Ipc(r) => r.next_record(),
            RecordReader::Parquet(r) => r.next_record(),
        }
    }
}

/// An open output sink for one bucket
pub enum RecordSink {
    Text(text::TextWriter),
    Sequence(sequence::SequenceWriter),
    Ipc(ipc::IpcWriter),
    Parquet(parquet::ParquetWriter),
}

impl RecordSink {
    pub fn write(&mut self, record: Record) -> FormatResult<()> {
        match self {
            RecordSink::Text(w) => w.write(record),
            RecordSink::Sequence(w) => w.write(record),
            RecordSink::Ipc(w) => w.write(record),
            RecordSink::Parquet(w) => w.write(record),
        }
    }

    /// Flush and finalize the output; the sink is unusable afterwards
    pub fn close(self) -> FormatResult<()> {
        match self {
            RecordSink::Text(w) => w.close(),
            RecordSink::Sequence(w) => w.close(),
            RecordSink::Ipc(w) => w.close(),
            RecordSink::Parquet(w) => w.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_format_ids() {
        assert_eq!(FormatAdapter::parse("text").unwrap(), FormatAdapter::Text);
        assert_eq!(FormatAdapter::parse("SEQUENCE").unwrap(), FormatAdapter::Sequence);
        assert_eq!(FormatAdapter::parse("ipc").unwrap(), FormatAdapter::Ipc);
        assert_eq!(FormatAdapter::parse("parquet").unwrap(), FormatAdapter::Parquet);
        assert!(matches!(
            FormatAdapter::parse("avro"),
            Err(ConfigError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_cross_family_pairs_rejected() {
        assert!(FormatAdapter::check_pair(FormatAdapter::Text, FormatAdapter::Sequence).is_ok());
        assert!(FormatAdapter::check_pair(FormatAdapter::Ipc, FormatAdapter::Parquet).is_ok());
        assert!(matches!(
            FormatAdapter::check_pair(FormatAdapter::Text, FormatAdapter::Parquet),
            Err(ConfigError::IncompatibleFormats { .. })
        ));
    }

    #[test]
    fn test_only_text_output_is_mangled() {
        assert_eq!(FormatAdapter::Text.output_suffix(Codec::Gzip), Some(".gz"));
        assert_eq!(FormatAdapter::Text.output_suffix(Codec::None), None);
        assert_eq!(FormatAdapter::Sequence.output_suffix(Codec::Gzip), None);
        assert_eq!(FormatAdapter::Parquet.output_suffix(Codec::Zstd), None);
    }

    #[test]
    fn test_text_signature_is_constant() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"x\n").unwrap();
        fs::write(&b, b"").unwrap();

        let sa = FormatAdapter::Text.schema_signature(&LocalStorage, &a).unwrap();
        let sb = FormatAdapter::Text.schema_signature(&LocalStorage, &b).unwrap();
        assert_eq!(sa, sb);
        assert_eq!(sa.as_str(), "none:line");
    }

    #[test]
    fn test_text_into_sequence() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("in.txt");
        let out = dir.path().join("out.seq");
        fs::write(&src, b"a\nb\n").unwrap();

        let mut reader = FormatAdapter::Text.open_reader(&LocalStorage, &src).unwrap();
        let schema = FormatAdapter::Sequence
            .prepare_output_schema(reader.schema())
            .unwrap();
        let mut sink = FormatAdapter::Sequence
            .open_writer(&LocalStorage, &out, &schema, Codec::None)
            .unwrap();
        while let Some(record) = reader.next_record().unwrap() {
            sink.write(record).unwrap();
        }
        sink.close().unwrap();

        let mut back = FormatAdapter::Sequence.open_reader(&LocalStorage, &out).unwrap();
        assert_eq!(back.signature().as_str(), "none:line");
        let mut values = Vec::new();
        while let Some(Record::Pair(kv)) = back.next_record().unwrap() {
            assert!(kv.key.is_empty());
            values.push(kv.value);
        }
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
