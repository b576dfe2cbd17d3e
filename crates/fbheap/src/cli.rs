//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fbheap::{Backing, HeapConfig};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "fbheap")]
#[command(about = "Freeing-bump heap allocator - replay and stress sandbox heap workloads")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a workload script against a fresh heap
    Replay {
        /// Script file (one operation per line)
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        #[command(flatten)]
        heap: HeapArgs,

        /// Record heap errors and continue instead of stopping at the first one
        #[arg(long)]
        keep_going: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Run random allocate/free churn with payload verification
    Stress {
        #[command(flatten)]
        heap: HeapArgs,

        /// Number of random operations
        #[arg(long, default_value = "100000")]
        ops: u64,

        /// RNG seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Largest request size in bytes
        #[arg(long, default_value = "4096")]
        max_size: u32,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the size-class table
    Classes {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Heap layout options shared by `replay` and `stress`.
#[derive(Args, Clone, Debug)]
pub struct HeapArgs {
    /// Linear memory size in bytes (accepts 0x prefix)
    #[arg(long, default_value = "1048576", value_parser = parse_size)]
    pub heap_size: usize,

    /// Offset of the heap base inside linear memory (rounded up to 8)
    #[arg(long, default_value = "0", value_parser = parse_offset)]
    pub base_offset: u32,

    /// Host memory backing
    #[arg(long, value_enum, default_value = "vec")]
    pub backing: BackingArg,
}

impl From<&HeapArgs> for HeapConfig {
    fn from(args: &HeapArgs) -> Self {
        Self {
            heap_size: args.heap_size,
            base_offset: args.base_offset,
            backing: args.backing.into(),
        }
    }
}

fn parse_hex_or_dec(text: &str) -> Result<u64, String> {
    let parsed = text.strip_prefix("0x").map_or_else(
        || text.parse::<u64>(),
        |digits| u64::from_str_radix(digits, 16),
    );
    parsed.map_err(|e| format!("invalid number '{text}': {e}"))
}

fn parse_size(text: &str) -> Result<usize, String> {
    let value = parse_hex_or_dec(text)?;
    usize::try_from(value).map_err(|_| format!("{value} does not fit in usize"))
}

fn parse_offset(text: &str) -> Result<u32, String> {
    let value = parse_hex_or_dec(text)?;
    u32::try_from(value).map_err(|_| format!("{value} does not fit in 32 bits"))
}

#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum BackingArg {
    /// Zeroed host vector
    #[default]
    Vec,
    /// mmap region with guard pages
    Guarded,
}

impl From<BackingArg> for Backing {
    fn from(arg: BackingArg) -> Self {
        match arg {
            BackingArg::Vec => Self::Vec,
            BackingArg::Guarded => Self::Guarded,
        }
    }
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable output (default)
    #[default]
    Text,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("0x1000"), Ok(4096));
        assert!(parse_size("lots").is_err());
        assert_eq!(parse_offset("0x10"), Ok(16));
        assert!(parse_offset("0x100000000").is_err());
    }

    #[test]
    fn test_heap_args_into_config() {
        let cli = Cli::parse_from([
            "fbheap",
            "stress",
            "--heap-size",
            "0x10000",
            "--base-offset",
            "13",
            "--backing",
            "guarded",
        ]);
        let Commands::Stress { heap, .. } = &cli.command else {
            panic!("expected stress command");
        };
        let config = HeapConfig::from(heap);
        assert_eq!(config.heap_size, 0x10000);
        assert_eq!(config.base_offset, 13);
        assert_eq!(config.backing, Backing::Guarded);
    }
}
