//! file-crush - merge many small files into fewer large ones
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use file_crush::config::{CliArgs, CrushConfig};
use file_crush::controller::Crusher;
use file_crush::progress::{print_header, print_summary, ProgressReporter};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = CrushConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(&config);
    }
    let show_progress = config.show_progress;

    let crusher = Crusher::new(config);

    // Setup signal handler for graceful shutdown
    let shutdown_flag = crusher.shutdown_flag();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, finishing current buckets...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let progress = show_progress.then(ProgressReporter::new);
    if let Some(ref p) = progress {
        p.set_status("Planning...");
    }

    let result = crusher.run(&|update| {
        if let Some(ref p) = progress {
            p.update(update);
        }
    });

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(ref p) = progress {
                p.finish("Crush failed");
            }
            return Err(e).context("Crush failed");
        }
    };

    if let Some(ref p) = progress {
        p.finish_and_clear();
    }
    if show_progress {
        print_summary(&summary);
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("file_crush=debug,warn")
    } else {
        EnvFilter::new("file_crush=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
