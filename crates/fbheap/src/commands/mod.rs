//! Command implementations.
//!
//! Each submodule handles one CLI command.

mod classes;
mod replay;
mod stress;

use crate::cli::{Cli, Commands};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Replay { .. } => handle_replay(cli),
        Commands::Stress { .. } => handle_stress(cli),
        Commands::Classes { format } => classes::cmd_classes(*format),
    }
}

fn handle_replay(cli: &Cli) -> i32 {
    let Commands::Replay {
        script,
        heap,
        keep_going,
        format,
    } = &cli.command
    else {
        unreachable!("replay command variant mismatch");
    };

    replay::cmd_replay(script, heap, *keep_going, *format)
}

fn handle_stress(cli: &Cli) -> i32 {
    let Commands::Stress {
        heap,
        ops,
        seed,
        max_size,
        format,
    } = &cli.command
    else {
        unreachable!("stress command variant mismatch");
    };

    let config = fbheap::stress::StressConfig {
        ops: *ops,
        seed: *seed,
        max_size: *max_size,
    };
    stress::cmd_stress(heap, &config, *format, cli.silent)
}

// ============================================================================
// Output formatting helpers
// ============================================================================

/// Format a byte count with a binary unit suffix.
pub fn format_bytes(bytes: u32) -> String {
    const KIB: u32 = 1 << 10;
    const MIB: u32 = 1 << 20;
    if bytes >= MIB && bytes.is_multiple_of(MIB) {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes.is_multiple_of(KIB) {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Print the allocator counters shared by every report.
pub fn print_stats_text(stats: &fbheap::AllocatorStats) {
    println!("Usable size: {} (base {:#x})", stats.usable_size, stats.base_offset);
    println!("Bumper: {}", stats.bumper);
    println!("Bytes in use: {}", stats.bytes_in_use);
    println!("Free-list bytes: {}", stats.free_list_bytes());
    println!("Peak bytes in use: {}", stats.peak_bytes_in_use);
    println!("Live allocations: {}", stats.live_allocations);
    println!(
        "Allocations: {} ({} from free lists)",
        stats.total_allocations, stats.free_list_hits
    );
    println!("Deallocations: {}", stats.total_deallocations);
    println!("Utilization: {:.1}%", stats.utilization() * 100.0);
}
