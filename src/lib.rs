//! file-crush - Small File Consolidation
//!
//! Merges the many small files of a directory tree into fewer, larger
//! files, directory by directory, without losing a record.
//!
//! # Features
//!
//! - **Per-directory buckets**: each directory's small files are grouped
//!   into size-bounded buckets; outputs stay in the directory they came from.
//!
//! - **Parallel merging**: buckets are spread over balanced partitions and
//!   merged by a pool of worker threads.
//!
//! - **Format aware**: text, sequence, Arrow IPC and Parquet containers are
//!   merged record by record, refusing files whose schemas differ.
//!
//! - **Two install strategies**: move the output to a mirror tree, or swap
//!   it into the source tree with a logged recovery path on failure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Source tree                             │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ BFS scan, classify
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Planner                                │
//! │   per-directory buckets ──► balanced partitions (≤ max tasks)   │
//! │   <tmp>/in/dirs, <tmp>/in/partition-map, <tmp>/in/counters      │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ crossbeam bounded channel
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Worker Threads                             │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐      │
//! │  │crush-0  │  │crush-1  │  │crush-2  │  ...    │crush-N  │      │
//! │  │ merge   │  │ merge   │  │ merge   │         │ merge   │      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘      │
//! │       └────────────┴─────┬──────┴────────────────────┘          │
//! │                          ▼                                      │
//! │        <tmp>/out/crush/...  +  <tmp>/out/part-NNNNN             │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ mapping records
//!                               ▼
//!                  ┌──────────────────────────┐
//!                  │  Installer (move / swap) │
//!                  └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Crush one directory into one file
//! file-crush /data/in/day /data/out/day.crushed
//!
//! # Crush a tree into a mirror tree
//! file-crush /data/in /data/out 20240102030405
//!
//! # Crush in place, keeping the originals in a holding area
//! file-crush --clone /data/in /data/hold 20240102030405
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod install;
pub mod merge;
pub mod plan;
pub mod progress;
pub mod spec;
pub mod storage;

pub use config::{CliArgs, CrushConfig, Mode};
pub use controller::{Crusher, RunSummary};
pub use error::{CrushError, Result};
