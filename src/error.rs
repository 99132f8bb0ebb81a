//! Error types for file-crush
//!
//! This module defines the error hierarchy that covers:
//! - Configuration errors (bad specs, placeholders, format pairs)
//! - Format adapter errors (reading and writing record containers)
//! - Merge errors (schema mismatches and bucket I/O)
//! - Install errors (renames, including the swap remediation record)
//! - Worker thread errors
//!
//! Library code uses thiserror; the binary wraps everything with anyhow.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a crush run
#[derive(Error, Debug)]
pub enum CrushError {
    /// Configuration errors, raised before any filesystem mutation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Format adapter errors outside of a bucket merge
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// A bucket merge failed
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Installing the crushed output failed
    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Reading or writing a manifest failed
    #[error("Manifest error in '{path}': {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The crushed file count does not match the planned file count
    #[error("Files eligible ({eligible}) != files crushed ({crushed})")]
    InvariantViolation { eligible: u64, crushed: u64 },

    /// Interrupted by signal
    #[error("Operation interrupted by signal")]
    Interrupted,
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be between 1 and {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid task count
    #[error("Tasks must be in the range [1, {max}]: {count}")]
    InvalidMaxTasks { count: usize, max: usize },

    /// Threshold out of range
    #[error("Block size threshold must be in (0, 1]: {0}")]
    InvalidThreshold(f64),

    /// Max file blocks out of range
    #[error("Maximum file size in blocks must be positive: {0}")]
    InvalidMaxFileBlocks(u64),

    /// Block size out of range
    #[error("Block size must be positive: {0}")]
    InvalidBlockSize(u64),

    /// Regex failed to compile
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Spec option lists have different lengths
    #[error(
        "Must be an equal number of regex ({regexes}), replacement ({replacements}), \
         input-format ({inputs}), and output-format ({outputs}) options"
    )]
    SpecCountMismatch {
        regexes: usize,
        replacements: usize,
        inputs: usize,
        outputs: usize,
    },

    /// Unknown format identifier
    #[error("Unknown format '{0}': expected text, sequence, ipc, or parquet")]
    UnknownFormat(String),

    /// Input and output formats belong to different record families
    #[error("Cannot crush {input} input into {output} output")]
    IncompatibleFormats { input: String, output: String },

    /// Unknown compression codec
    #[error("Unknown compression codec '{0}': expected none, deflate, gzip, or zstd")]
    UnknownCodec(String),

    /// Template references a placeholder with no value
    #[error("No value for placeholder '{key}' in template '{template}'")]
    UnresolvedPlaceholder { template: String, key: String },

    /// Timestamp argument is malformed
    #[error("Crush timestamp must be 14 digits yyyymmddhhMMss: {0}")]
    InvalidTimestamp(String),

    /// A directory with crushable data matched no spec
    #[error("Could not find matching regex for directory: {}", dir.display())]
    NoMatchingSpec { dir: PathBuf },

    /// Source is not a directory
    #[error("No such directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Positional arguments or flags do not form a valid run
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Format adapter errors
#[derive(Error, Debug)]
pub enum FormatError {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Sequence container encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// File header is not what the adapter expects
    #[error("Bad header: {0}")]
    BadHeader(String),

    /// A record cannot be written by this sink
    #[error("A {sink} sink cannot accept {record} records")]
    IncompatibleRecord {
        sink: &'static str,
        record: &'static str,
    },

    /// Columnar sink opened without a column list
    #[error("Columnar output requires the column list before any record is written")]
    MissingColumns,

    /// Column list does not line up with the record schema
    #[error("Column list {columns:?} does not match record fields {fields:?}")]
    ColumnMismatch {
        columns: Vec<String>,
        fields: Vec<String>,
    },
}

/// Bucket merge errors
#[derive(Error, Debug)]
pub enum MergeError {
    /// A later file's signature differs from the bucket's first file
    #[error("Heterogeneous schema detected in file {}: [{found}] != [{expected}]", path.display())]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Opening or reading a source file failed
    #[error("Failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    /// Opening, writing or closing the bucket output failed
    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    /// Staging the bucket output failed
    #[error("Failed to stage '{}': {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Output installation errors
#[derive(Error, Debug)]
pub enum InstallError {
    /// A rename failed
    #[error("Failed to rename '{}' to '{}': {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Creating a destination directory failed
    #[error("Failed to create directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path does not live under the root it is relocated from
    #[error("'{}' is not under '{}'", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// A swap stopped part way; the remediation must be run by hand
    #[error("Swap of '{}' interrupted: {source}. {remediation}", remediation.output.display())]
    SwapInterrupted {
        remediation: Remediation,
        #[source]
        source: Box<InstallError>,
    },
}

/// Manual recovery steps for an interrupted swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    /// Crushed output that was being installed
    pub output: PathBuf,
    /// Source directory the output belongs in
    pub crushed_dir: PathBuf,
    /// Originals already in the holding area, as (original, held)
    pub moved: Vec<(PathBuf, PathBuf)>,
    /// Originals still in the source directory
    pub remaining: Vec<PathBuf>,
}

impl Remediation {
    /// True when every original was relocated and only the output install is missing
    pub fn install_pending(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Shell command that restores a consistent state
    pub fn command(&self) -> String {
        if self.install_pending() {
            return format!("mv {} {}/", self.output.display(), self.crushed_dir.display());
        }

        let mut cmd = String::from("mv");
        for (_, held) in &self.moved {
            cmd.push(' ');
            cmd.push_str(&held.display().to_string());
        }
        cmd.push(' ');
        cmd.push_str(&self.crushed_dir.display().to_string());
        cmd.push('/');
        cmd
    }
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.install_pending() {
            write!(
                f,
                "All {} originals moved; crush output was not installed. Execute: {}",
                self.moved.len(),
                self.command()
            )
        } else if self.moved.is_empty() {
            write!(f, "No originals were moved; nothing to restore")
        } else {
            write!(
                f,
                "{} moved and {} remaining. Execute the following to restore the file system: {}",
                self.moved.len(),
                self.remaining.len(),
                self.command()
            )
        }
    }
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker panicked
    #[error("Worker {id} panicked: {message}")]
    Panicked { id: usize, message: String },

    /// Work queue send failed
    #[error("Failed to send work item: queue full or closed")]
    QueueSendFailed,

    /// Worker initialization failed
    #[error("Failed to initialize worker {id}: {reason}")]
    InitFailed { id: usize, reason: String },
}

/// Result type alias for CrushError
pub type Result<T> = std::result::Result<T, CrushError>;

/// Result type alias for FormatError
pub type FormatResult<T> = std::result::Result<T, FormatError>;
