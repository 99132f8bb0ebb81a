//! Configuration types for file-crush
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Run mode selection from the positional arguments

use crate::error::ConfigError;
use crate::format::{Codec, FormatAdapter};
use crate::plan::{PlanOptions, ScanPolicy};
use crate::spec::{full_match_regex, CrushSpec, CrushSpecs};
use chrono::Local;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum reasonable worker count
const MAX_WORKERS: usize = 512;

/// Upper bound on partitions per run
const MAX_TASKS: usize = 4000;

pub const DEFAULT_REGEX: &str = ".+";
pub const DEFAULT_REPLACEMENT: &str =
    "crushed_file-${crush.timestamp}-${crush.task.num}-${crush.file.num}";
pub const DEFAULT_FORMAT: &str = "sequence";

/// Format of the crush timestamp argument
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Regex for the 14-digit crush timestamp
static TIMESTAMP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{14}$").expect("Invalid timestamp regex"));

/// Merge many small files into fewer large ones
#[derive(Parser, Debug, Clone)]
#[command(
    name = "file-crush",
    version,
    about = "Merge many small files into fewer large ones, directory by directory",
    long_about = "Crushes the small files of a directory tree into larger files.\n\n\
                  With two arguments, crushes one directory into one file.\n\
                  With three arguments, crushes a whole tree and moves the output (and every\n\
                  file that was left alone) into DEST. With --clone, the output replaces the\n\
                  originals in place and the originals are moved into DEST.",
    after_help = "EXAMPLES:\n    \
        file-crush /data/in/day /data/out/day.crushed\n    \
        file-crush /data/in /data/out 20240102030405\n    \
        file-crush --clone /data/in /data/hold 20240102030405\n    \
        file-crush --regex '.*/logs/(\\w+)' --replacement '$1-${crush.file.num}' \\\n        \
            --input-format text --output-format text --compress gzip /data/in /data/out 20240102030405"
)]
pub struct CliArgs {
    /// SRC DEST [TIMESTAMP]
    #[arg(value_name = "PATH", num_args = 2..=3, required = true)]
    pub paths: Vec<String>,

    /// Directory regex of a crush spec (repeatable)
    #[arg(long = "regex", value_name = "REGEX", action = clap::ArgAction::Append)]
    pub regexes: Vec<String>,

    /// Output name template of a crush spec (repeatable)
    #[arg(long = "replacement", value_name = "TEMPLATE", action = clap::ArgAction::Append)]
    pub replacements: Vec<String>,

    /// Input format of a crush spec: text, sequence, ipc, parquet (repeatable)
    #[arg(long = "input-format", value_name = "FORMAT", action = clap::ArgAction::Append)]
    pub input_formats: Vec<String>,

    /// Output format of a crush spec: text, sequence, ipc, parquet (repeatable)
    #[arg(long = "output-format", value_name = "FORMAT", action = clap::ArgAction::Append)]
    pub output_formats: Vec<String>,

    /// Fraction of the block size below which a file is crushable
    #[arg(short = 't', long, default_value_t = 0.75, value_name = "FRACTION")]
    pub threshold: f64,

    /// Maximum output file size, in blocks
    #[arg(short = 'm', long, default_value_t = 8, value_name = "NUM")]
    pub max_file_blocks: u64,

    /// Block size in bytes
    #[arg(long, default_value_t = 128 * 1024 * 1024, value_name = "BYTES")]
    pub block_size: u64,

    /// Files whose full path matches are ignored entirely
    #[arg(long, value_name = "REGEX")]
    pub ignore_regex: Option<String>,

    /// Files whose full path matches are left alone
    #[arg(long, value_name = "REGEX")]
    pub skip_regex: Option<String>,

    /// Treat zero-length files as removable instead of crushable
    #[arg(long)]
    pub remove_empty_files: bool,

    /// Crush directories that contain a single crushable file
    #[arg(long)]
    pub include_single_file_dirs: bool,

    /// Output compression: none, deflate, gzip, zstd
    #[arg(long, default_value = "deflate", value_name = "CODEC")]
    pub compress: String,

    /// Replace originals in place, moving them into DEST
    #[arg(long)]
    pub clone: bool,

    /// Maximum number of partitions
    #[arg(long, default_value_t = 100, value_name = "NUM")]
    pub max_tasks: usize,

    /// Number of merge worker threads
    #[arg(
        short = 'w',
        long,
        default_value_t = default_workers(),
        value_name = "NUM"
    )]
    pub workers: usize,

    /// Parent directory for the run's temporary files
    #[arg(long, default_value = "tmp", value_name = "DIR")]
    pub tmp_dir: PathBuf,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// What the run does with its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Crush one directory into one file
    StandAlone { dest_file: PathBuf },
    /// Crush a tree and move the results under `dest_dir`
    Move { dest_dir: PathBuf },
    /// Crush a tree in place, moving originals under `holding_dir`
    Clone { holding_dir: PathBuf },
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct CrushConfig {
    /// Source directory (absolute)
    pub source: PathBuf,

    pub mode: Mode,

    /// Ordered crush specs
    pub specs: CrushSpecs,

    /// File classification rules
    pub policy: ScanPolicy,

    /// Bucket and partition sizing
    pub plan: PlanOptions,

    pub codec: Codec,

    /// Value of `${crush.timestamp}`
    pub timestamp: String,

    /// Number of worker threads
    pub worker_count: usize,

    /// Parent of the run's temporary directory
    pub tmp_dir: PathBuf,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|e| {
        ConfigError::InvalidArguments(format!("cannot resolve '{}': {}", path.display(), e))
    })
}

fn optional_regex(pattern: &Option<String>) -> Result<Option<Regex>, ConfigError> {
    pattern.as_deref().map(full_match_regex).transpose()
}

/// Pair up the repeatable spec options
///
/// Regex and replacement fall back to a single default entry; formats
/// fall back to `sequence` for every regex. All four lists must then have
/// the same length.
fn build_specs(
    regexes: &[String],
    replacements: &[String],
    inputs: &[String],
    outputs: &[String],
) -> Result<CrushSpecs, ConfigError> {
    let or_default = |list: &[String], default: &str, len: usize| -> Vec<String> {
        if list.is_empty() {
            vec![default.to_string(); len]
        } else {
            list.to_vec()
        }
    };

    let regexes = or_default(regexes, DEFAULT_REGEX, 1);
    let replacements = or_default(replacements, DEFAULT_REPLACEMENT, 1);
    let inputs = or_default(inputs, DEFAULT_FORMAT, regexes.len());
    let outputs = or_default(outputs, DEFAULT_FORMAT, regexes.len());

    if replacements.len() != regexes.len()
        || inputs.len() != regexes.len()
        || outputs.len() != regexes.len()
    {
        return Err(ConfigError::SpecCountMismatch {
            regexes: regexes.len(),
            replacements: replacements.len(),
            inputs: inputs.len(),
            outputs: outputs.len(),
        });
    }

    let specs = regexes
        .iter()
        .zip(&replacements)
        .zip(inputs.iter().zip(&outputs))
        .map(|((regex, replacement), (input, output))| {
            CrushSpec::new(
                regex,
                replacement,
                FormatAdapter::parse(input)?,
                FormatAdapter::parse(output)?,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CrushSpecs::new(specs))
}

impl CrushConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.workers == 0 || args.workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.workers,
                max: MAX_WORKERS,
            });
        }

        if args.max_tasks == 0 || args.max_tasks > MAX_TASKS {
            return Err(ConfigError::InvalidMaxTasks {
                count: args.max_tasks,
                max: MAX_TASKS,
            });
        }

        if !(args.threshold > 0.0 && args.threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(args.threshold));
        }

        if args.max_file_blocks == 0 {
            return Err(ConfigError::InvalidMaxFileBlocks(args.max_file_blocks));
        }

        if args.block_size == 0 {
            return Err(ConfigError::InvalidBlockSize(args.block_size));
        }

        let codec = Codec::parse(&args.compress)?;

        let mut policy = ScanPolicy::new(args.block_size, args.threshold);
        policy.ignore = optional_regex(&args.ignore_regex)?;
        policy.skip = optional_regex(&args.skip_regex)?;
        policy.remove_empty = args.remove_empty_files;

        let (source, mode, specs, timestamp) = match args.paths.as_slice() {
            [src, dest] => {
                if args.clone {
                    return Err(ConfigError::InvalidArguments(
                        "--clone requires SRC DEST TIMESTAMP".to_string(),
                    ));
                }
                let dest_file = absolute(Path::new(dest))?;
                let name = dest_file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        ConfigError::InvalidArguments(format!("'{}' is not a file path", dest))
                    })?;

                // Stand-alone crushing names its single output after DEST
                let specs = build_specs(
                    &[DEFAULT_REGEX.to_string()],
                    &[name],
                    &args.input_formats[..args.input_formats.len().min(1)],
                    &args.output_formats[..args.output_formats.len().min(1)],
                )?;
                let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

                (
                    absolute(Path::new(src))?,
                    Mode::StandAlone { dest_file },
                    specs,
                    timestamp,
                )
            }
            [src, dest, timestamp] => {
                if !TIMESTAMP_REGEX.is_match(timestamp) {
                    return Err(ConfigError::InvalidTimestamp(timestamp.clone()));
                }
                let dest = absolute(Path::new(dest))?;
                let mode = if args.clone {
                    Mode::Clone { holding_dir: dest }
                } else {
                    Mode::Move { dest_dir: dest }
                };
                let specs = build_specs(
                    &args.regexes,
                    &args.replacements,
                    &args.input_formats,
                    &args.output_formats,
                )?;

                (absolute(Path::new(src))?, mode, specs, timestamp.clone())
            }
            other => {
                return Err(ConfigError::InvalidArguments(format!(
                    "expected SRC DEST [TIMESTAMP], got {} arguments",
                    other.len()
                )))
            }
        };

        Ok(Self {
            source,
            mode,
            specs,
            policy,
            plan: PlanOptions {
                block_size: args.block_size,
                max_file_blocks: args.max_file_blocks,
                include_single_file_dirs: args.include_single_file_dirs,
                max_tasks: args.max_tasks,
            },
            codec,
            timestamp,
            worker_count: args.workers,
            tmp_dir: absolute(&args.tmp_dir)?,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}
