//! Stress command.

use fbheap::HeapConfig;
use fbheap::stress::{StressConfig, StressReport, run_stress};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, HeapArgs, OutputFormat};
use crate::commands::print_stats_text;
use crate::terminal::{self, Progress};

/// Redraw the progress bar every this many operations.
const PROGRESS_STEP: u64 = 1024;

/// Handle the `stress` command.
pub fn cmd_stress(
    heap_args: &HeapArgs,
    config: &StressConfig,
    format: OutputFormat,
    silent: bool,
) -> i32 {
    let mut heap = match HeapConfig::from(heap_args).build() {
        Ok(heap) => heap,
        Err(e) => {
            error!(error = %e, "failed to create heap");
            return EXIT_FAILURE;
        }
    };

    let progress = if silent || matches!(format, OutputFormat::Json) {
        Progress::hidden()
    } else {
        Progress::new(config.ops, "stress")
    };
    let result = run_stress(&mut heap, config, |done| {
        if done.is_multiple_of(PROGRESS_STEP) {
            progress.set_position(done);
        }
    });
    progress.finish();

    match result {
        Ok(report) => {
            print_report(format, &report);
            EXIT_SUCCESS
        }
        Err(e) => {
            error!(error = %e, seed = config.seed, "stress run failed");
            EXIT_FAILURE
        }
    }
}

fn print_report(format: OutputFormat, report: &StressReport) {
    match format {
        OutputFormat::Text => {
            println!("Operations: {}", report.ops);
            println!("Out of memory: {}", report.out_of_memory);
            println!("Peak live blocks: {}", report.peak_live);
            println!("Time: {:.6}s", report.time_secs);
            println!("Speed: {:.0} ops/s", report.ops_per_sec());
            print_stats_text(&report.stats);
            terminal::success("all payloads verified");
        }
        OutputFormat::Json => report.print_json(),
    }
}
