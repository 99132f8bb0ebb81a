//! Newline-delimited text rows
//!
//! Each record is one line without its terminator. Input is decoded by
//! file-name suffix; output is compressed as a single stream.

use super::codec::{Codec, CodecWriter};
use super::{Record, RecordSchema, SchemaSignature};
use crate::error::{FormatError, FormatResult};
use crate::storage::Storage;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

/// Key and value type names reported for text rows
pub const TEXT_KEY_TYPE: &str = "none";
pub const TEXT_VALUE_TYPE: &str = "line";

/// Reader over the lines of one text file
pub struct TextReader {
    reader: BufReader<Box<dyn Read + Send>>,
    schema: RecordSchema,
}

impl TextReader {
    pub fn open(storage: &dyn Storage, path: &Path) -> FormatResult<Self> {
        let raw = storage.open_read(path)?;
        let decoded = Codec::from_path(path).decoder(raw)?;
        Ok(Self {
            reader: BufReader::new(decoded),
            schema: text_schema(),
        })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn signature(&self) -> SchemaSignature {
        self.schema.signature()
    }

    pub fn next_record(&mut self) -> FormatResult<Option<Record>> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(Record::Line(line)))
    }
}

/// Writer producing one line per record
pub struct TextWriter {
    out: CodecWriter,
}

impl TextWriter {
    pub fn create(storage: &dyn Storage, path: &Path, codec: Codec) -> FormatResult<Self> {
        let out = codec.encoder(storage.create(path)?)?;
        Ok(Self { out })
    }

    pub fn write(&mut self, record: Record) -> FormatResult<()> {
        match record {
            Record::Line(line) => self.write_line(&line, None),
            Record::Pair(kv) if kv.value.is_empty() => self.write_line(&kv.key, None),
            Record::Pair(kv) => self.write_line(&kv.key, Some(&kv.value)),
            Record::Batch(_) => Err(FormatError::IncompatibleRecord {
                sink: "text",
                record: "table",
            }),
        }
    }

    fn write_line(&mut self, first: &[u8], second: Option<&[u8]>) -> FormatResult<()> {
        self.out.write_all(first)?;
        if let Some(second) = second {
            self.out.write_all(b"\t")?;
            self.out.write_all(second)?;
        }
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn close(self) -> FormatResult<()> {
        self.out.finish()?;
        Ok(())
    }
}

/// Schema shared by every text file
pub fn text_schema() -> RecordSchema {
    RecordSchema::Rows {
        key_type: TEXT_KEY_TYPE.to_string(),
        value_type: TEXT_VALUE_TYPE.to_string(),
    }
}
