//! Progress reporting for crush runs
//!
//! Provides a merge spinner using indicatif and a console-styled summary.

use crate::config::{CrushConfig, Mode};
use crate::controller::{CrushProgress, RunSummary};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress reporter that displays merge status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &CrushProgress) {
        let msg = format!(
            "Buckets: {}/{} | Files: {}/{} | Records: {} | Size: {} | Rate: {:.0} rec/s",
            format_number(progress.totals.buckets),
            format_number(progress.planned_buckets),
            format_number(progress.totals.files),
            format_number(progress.planned_files),
            format_number(progress.totals.records),
            format_size(progress.planned_bytes, BINARY),
            progress.records_per_second(),
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(summary: &RunSummary) {
    let counters = &summary.counters;
    let duration_secs = summary.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        summary.totals.files as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Crush Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} found, {} eligible, {} skipped",
        style("Directories:").bold(),
        format_number(counters.dirs_found),
        format_number(counters.dirs_eligible),
        format_number(counters.dirs_skipped)
    );
    println!(
        "  {} {} found, {} crushed, {} skipped",
        style("Files:").bold(),
        format_number(counters.files_found),
        format_number(summary.totals.files),
        format_number(counters.files_skipped)
    );
    if counters.files_removed > 0 {
        println!(
            "  {} {}",
            style("Empty files:").bold(),
            format_number(counters.files_removed)
        );
    }
    println!(
        "  {} {}",
        style("Crushed Size:").bold(),
        format_size(counters.bytes_eligible, BINARY)
    );
    println!(
        "  {} {} in {} outputs",
        style("Records:").bold(),
        format_number(summary.totals.records),
        format_number(summary.outputs_installed)
    );
    if summary.files_relocated > 0 {
        println!(
            "  {} {}",
            style("Relocated:").bold(),
            format_number(summary.files_relocated)
        );
    }
    println!(
        "  {} {:.1}s ({:.0} files/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    println!();
}

/// Print a header at the start of the run
pub fn print_header(config: &CrushConfig) {
    let (label, target) = match &config.mode {
        Mode::StandAlone { dest_file } => ("Output:", dest_file),
        Mode::Move { dest_dir } => ("Destination:", dest_dir),
        Mode::Clone { holding_dir } => ("Holding:", holding_dir),
    };

    println!();
    println!(
        "{} {}",
        style("file-crush").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), config.source.display());
    println!("  {} {}", style(label).bold(), target.display());
    println!("  {} {}", style("Workers:").bold(), config.worker_count);
    println!("  {} {}", style("Codec:").bold(), config.codec);
    println!("  {} {}", style("Timestamp:").bold(), config.timestamp);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }
}
