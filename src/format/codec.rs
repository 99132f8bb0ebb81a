//! Output compression codecs
//!
//! Codecs are applied as whole-stream wrappers for row formats and mapped
//! onto page/buffer compression for the table formats.

use crate::error::ConfigError;
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

/// Compression codec selected for crush output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    None,
    Deflate,
    Gzip,
    Zstd,
}

impl Codec {
    /// Parse a codec name from the command line
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Codec::None),
            "deflate" | "default" => Ok(Codec::Deflate),
            "gzip" | "gz" => Ok(Codec::Gzip),
            "zstd" => Ok(Codec::Zstd),
            _ => Err(ConfigError::UnknownCodec(name.to_string())),
        }
    }

    /// Default filename suffix, including the leading dot
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Codec::None => None,
            Codec::Deflate => Some(".deflate"),
            Codec::Gzip => Some(".gz"),
            Codec::Zstd => Some(".zst"),
        }
    }

    /// Infer the codec of a file from its name
    pub fn from_path(path: &Path) -> Codec {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        [Codec::Deflate, Codec::Gzip, Codec::Zstd]
            .into_iter()
            .find(|codec| codec.extension().is_some_and(|ext| name.ends_with(ext)))
            .unwrap_or(Codec::None)
    }

    /// Wrap a writer with this codec's encoder
    pub fn encoder(self, inner: Box<dyn Write + Send>) -> io::Result<CodecWriter> {
        Ok(match self {
            Codec::None => CodecWriter::Plain(BufWriter::new(inner)),
            Codec::Deflate => CodecWriter::Deflate(ZlibEncoder::new(inner, Compression::default())),
            Codec::Gzip => CodecWriter::Gzip(GzEncoder::new(inner, Compression::default())),
            Codec::Zstd => CodecWriter::Zstd(zstd::stream::write::Encoder::new(inner, 0)?),
        })
    }

    /// Wrap a reader with this codec's decoder
    pub fn decoder(self, inner: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            Codec::None => inner,
            Codec::Deflate => Box::new(ZlibDecoder::new(inner)),
            Codec::Gzip => Box::new(MultiGzDecoder::new(inner)),
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(inner)?),
        })
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Codec::None => "none",
            Codec::Deflate => "deflate",
            Codec::Gzip => "gzip",
            Codec::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// A writer that compresses with one of the supported codecs
pub enum CodecWriter {
    Plain(BufWriter<Box<dyn Write + Send>>),
    Deflate(ZlibEncoder<Box<dyn Write + Send>>),
    Gzip(GzEncoder<Box<dyn Write + Send>>),
    Zstd(zstd::stream::write::Encoder<'static, Box<dyn Write + Send>>),
}

impl CodecWriter {
    /// Write the codec trailer and flush the underlying stream
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            CodecWriter::Plain(w) => w.into_inner().map_err(|e| e.into_error())?,
            CodecWriter::Deflate(w) => w.finish()?,
            CodecWriter::Gzip(w) => w.finish()?,
            CodecWriter::Zstd(w) => w.finish()?,
        };
        inner.flush()
    }
}

impl Write for CodecWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Plain(w) => w.write(buf),
            CodecWriter::Deflate(w) => w.write(buf),
            CodecWriter::Gzip(w) => w.write(buf),
            CodecWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Plain(w) => w.flush(),
            CodecWriter::Deflate(w) => w.flush(),
            CodecWriter::Gzip(w) => w.flush(),
            CodecWriter::Zstd(w) => w.flush(),
        }
    }
}
