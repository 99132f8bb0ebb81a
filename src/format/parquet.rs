//! Parquet columnar container
//!
//! The record schema is rebuilt from the footer: one [`ColumnType`] per leaf
//! column, with a logical type name derived from the physical type. Writers
//! need that column list before the first batch arrives.
//!
//! The column list is too coarse to compare files with (DATE and INT32 both
//! map to `int`), so the signature is the printed footer message type,
//! carrying repetition and logical annotations for every field.

use super::codec::Codec;
use super::{ColumnType, Record, RecordSchema, SchemaSignature};
use crate::error::{FormatError, FormatResult};
use crate::storage::Storage;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ConvertedType, LogicalType, Type as PhysicalType};
use parquet::file::properties::WriterProperties;
use parquet::schema::printer::print_schema;
use parquet::schema::types::SchemaDescriptor;
use std::io::Write;
use std::path::Path;

/// Map every leaf column of a Parquet schema to its logical type name
pub fn columns_from_descriptor(descr: &SchemaDescriptor) -> Vec<ColumnType> {
    descr
        .columns()
        .iter()
        .map(|col| {
            let type_name = match col.physical_type() {
                PhysicalType::INT96 => "timestamp".to_string(),
                PhysicalType::INT64 => "bigint".to_string(),
                PhysicalType::INT32 => "int".to_string(),
                PhysicalType::BYTE_ARRAY => "string".to_string(),
                PhysicalType::BOOLEAN => "boolean".to_string(),
                PhysicalType::DOUBLE => "double".to_string(),
                PhysicalType::FLOAT => "float".to_string(),
                PhysicalType::FIXED_LEN_BYTE_ARRAY => {
                    let decimal = col.converted_type() == ConvertedType::DECIMAL
                        || matches!(col.logical_type(), Some(LogicalType::Decimal { .. }));
                    if decimal {
                        format!("decimal({},{})", col.type_precision(), col.type_scale())
                    } else {
                        "binary".to_string()
                    }
                }
            };
            ColumnType::new(col.path().string(), type_name)
        })
        .collect()
}

/// Full footer message type, as printed by the parquet schema printer
pub fn footer_signature(descr: &SchemaDescriptor) -> SchemaSignature {
    let mut out = Vec::new();
    print_schema(&mut out, descr.root_schema());
    SchemaSignature(String::from_utf8_lossy(&out).into_owned())
}

/// Derive the Parquet column list for an Arrow schema
pub fn columns_from_arrow(schema: &SchemaRef) -> FormatResult<Vec<ColumnType>> {
    let descr = parquet::arrow::arrow_to_parquet_schema(schema)?;
    Ok(columns_from_descriptor(&descr))
}

pub struct ParquetReader {
    inner: ParquetRecordBatchReader,
    schema: RecordSchema,
    signature: SchemaSignature,
}

impl ParquetReader {
    pub fn open(storage: &dyn Storage, path: &Path) -> FormatResult<Self> {
        let bytes = storage.read_all(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;

        let descr = builder.metadata().file_metadata().schema_descr();
        let columns = columns_from_descriptor(descr);
        let signature = footer_signature(descr);
        let schema = RecordSchema::Table {
            arrow: builder.schema().clone(),
            columns: Some(columns),
        };
        let inner = builder.build()?;

        Ok(Self {
            inner,
            schema,
            signature,
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn signature(&self) -> SchemaSignature {
        self.signature.clone()
    }

    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        match self.inner.next() {
            Some(batch) => Ok(Some(Record::Batch(batch?))),
            None => Ok(None),
        }
    }
}

pub struct ParquetWriter {
    inner: ArrowWriter<Box<dyn Write + Send>>,
    schema: SchemaRef,
}

impl ParquetWriter {
    pub fn create(
        storage: &dyn Storage,
        path: &Path,
        schema: &RecordSchema,
        codec: Codec,
    ) -> FormatResult<Self> {
        let (arrow, columns) = match schema {
            RecordSchema::Table { arrow, columns } => (arrow, columns),
            RecordSchema::Rows { .. } => {
                return Err(FormatError::IncompatibleRecord {
                    sink: "parquet",
                    record: "row",
                })
            }
        };

        let columns = columns.as_ref().ok_or(FormatError::MissingColumns)?;
        let fields: Vec<String> = arrow.fields().iter().map(|f| f.name().clone()).collect();
        let top_level: Vec<String> = columns
            .iter()
            .map(|c| c.name.split('.').next().unwrap_or_default().to_string())
            .collect();
        let mut declared = top_level.clone();
        declared.dedup();
        if declared != fields {
            return Err(FormatError::ColumnMismatch {
                columns: columns.iter().map(|c| c.name.clone()).collect(),
                fields,
            });
        }

        let props = WriterProperties::builder()
            .set_compression(compression_for(codec))
            .build();
        let inner = ArrowWriter::try_new(storage.create(path)?, arrow.clone(), Some(props))?;

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
                sink: "parquet",
                record: "row",
            }),
        }
    }

    pub fn close(self) -> FormatResult<()> {
        let mut out = self.inner.into_inner()?;
        out.flush()?;
        Ok(())
    }
}

fn compression_for(codec: Codec) -> Compression {
    match codec {
        Codec::None => Compression::UNCOMPRESSED,
        Codec::Deflate | Codec::Gzip => Compression::GZIP(Default::default()),
        Codec::Zstd => Compression::ZSTD(Default::default()),
    }
}
