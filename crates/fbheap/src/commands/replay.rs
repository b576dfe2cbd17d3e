//! Replay command.

use std::path::Path;

use fbheap::HeapConfig;
use fbheap::script::{ReplayOptions, ReplayReport, Script};
use tracing::error;

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS, HeapArgs, OutputFormat};
use crate::commands::print_stats_text;
use crate::terminal;

/// Handle the `replay` command.
pub fn cmd_replay(
    script_path: &Path,
    heap_args: &HeapArgs,
    keep_going: bool,
    format: OutputFormat,
) -> i32 {
    let script = match Script::from_file(script_path) {
        Ok(script) => script,
        Err(e) => {
            error!(error = %e, path = %script_path.display(), "failed to load script");
            return EXIT_FAILURE;
        }
    };

    let mut heap = match HeapConfig::from(heap_args).build() {
        Ok(heap) => heap,
        Err(e) => {
            error!(error = %e, "failed to create heap");
            return EXIT_FAILURE;
        }
    };

    let report = match script.replay(&mut heap, &ReplayOptions { keep_going }) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, path = %script_path.display(), "replay failed");
            return EXIT_FAILURE;
        }
    };

    print_report(format, &report);
    if report.success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

fn print_report(format: OutputFormat, report: &ReplayReport) {
    match format {
        OutputFormat::Text => {
            println!("Commands: {}", report.executed);
            print_stats_text(&report.stats);
            for failure in &report.failures {
                terminal::error(&format!(
                    "line {}: {}: {}",
                    failure.line, failure.op, failure.error
                ));
            }
            if report.success() {
                terminal::success(&format!("replayed {} commands", report.executed));
            } else {
                terminal::warning(&format!(
                    "{} of {} commands failed",
                    report.failures.len(),
                    report.executed + report.failures.len()
                ));
            }
        }
        OutputFormat::Json => report.print_json(),
    }
}
