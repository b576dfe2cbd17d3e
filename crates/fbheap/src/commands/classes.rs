//! Classes command.

use fbheap::{PREFIX_SIZE, SizeClass};

use crate::cli::{EXIT_SUCCESS, OutputFormat};
use crate::commands::format_bytes;

/// Handle the `classes` command.
pub fn cmd_classes(format: OutputFormat) -> i32 {
    match format {
        OutputFormat::Text => {
            println!("| class | block size | slot size |");
            println!("|------:|-----------:|----------:|");
            for class in SizeClass::iter_all() {
                println!(
                    "| {:>5} | {:>10} | {:>9} |",
                    class.index(),
                    format_bytes(class.block_size()),
                    class.slot_size()
                );
            }
            println!();
            println!("Each slot carries a {PREFIX_SIZE}-byte header before the payload.");
        }
        OutputFormat::Json => {
            let rows: Vec<String> = SizeClass::iter_all()
                .map(|class| {
                    format!(
                        r#"{{"class":{},"block_size":{},"slot_size":{}}}"#,
                        class.index(),
                        class.block_size(),
                        class.slot_size()
                    )
                })
                .collect();
            println!("[{}]", rows.join(","));
        }
    }
    EXIT_SUCCESS
}
