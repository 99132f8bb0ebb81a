//! Merge execution
//!
//! ```text
//! partitions ──► crossbeam channel ──► crush-0 ─┐
//!                                  ├─► crush-1 ─┼─► staged outputs + out/part-NNNNN
//!                                  └─► crush-N ─┘
//! ```
//!
//! A bucket is the unit of work; a worker processes its buckets strictly
//! one after another and owns the sink of the bucket it is merging.

pub mod engine;
pub mod mapping;
pub mod worker;

pub use engine::{MappingRecord, MergeEngine, MergeOutcome, ReportSchedule};
pub use mapping::{read_mappings, MappingWriter};
pub use worker::{run_partitions, MergeContext, MergeTotals, Worker, WorkerStats};
