//! Integration tests for script replay and the `fbheap` binary.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use fbheap::script::{ReplayOptions, Script};
use fbheap::{Backing, HeapConfig, HostMemory};
use tempfile::NamedTempFile;

const SAMPLE_SCRIPT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/reuse.heap");

fn write_script(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("failed to create temp script");
    file.write_all(source.as_bytes())
        .expect("failed to write temp script");
    file
}

fn fbheap(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fbheap"))
        .args(args)
        .output()
        .expect("failed to run fbheap")
}

#[test]
fn test_sample_script_keep_going() {
    let script = Script::from_file(Path::new(SAMPLE_SCRIPT)).expect("sample script parses");
    let config = HeapConfig {
        heap_size: 1024,
        ..HeapConfig::default()
    };
    let mut heap = config.build().expect("heap builds");

    let report = script
        .replay(&mut heap, &ReplayOptions { keep_going: true })
        .expect("replay runs");

    assert_eq!(report.executed, 7);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].line, 12);
    let ptrs: Vec<u32> = report.allocations.iter().map(|(_, p)| p.offset()).collect();
    assert_eq!(ptrs, vec![8, 24, 8]);
    assert_eq!(report.stats.bytes_in_use, 32);
}

#[test]
fn test_replay_on_guarded_heap_with_base_offset() {
    let file = write_script(
        "alloc hdr 24\n\
         fill hdr 5a\n\
         alloc body 1000\n\
         write body 00112233\n\
         free hdr\n\
         alloc again 20\n\
         expect body 00112233\n\
         free body\n\
         free again\n",
    );
    let script = Script::from_file(file.path()).expect("script parses");
    let config = HeapConfig {
        heap_size: 1 << 16,
        base_offset: 100,
        backing: Backing::Guarded,
    };
    let mut heap = config.build().expect("guarded heap builds");
    assert!(matches!(heap.memory(), HostMemory::Guarded(_)));

    let report = script
        .replay(&mut heap, &ReplayOptions::default())
        .expect("replay runs");

    assert!(report.success());
    assert_eq!(heap.base_offset(), 104);
    // The first block starts at the aligned base.
    assert_eq!(report.allocations[0].1.offset(), 104 + 8);
    // `again` reuses the 32-byte block `hdr` released.
    assert_eq!(report.allocations[2].1, report.allocations[0].1);
    assert_eq!(report.stats.bytes_in_use, 0);
    assert_eq!(report.stats.bumper, 40 + 1032);
}

#[test]
fn test_same_script_same_pointers_across_backings() {
    let source = "alloc a 3\nalloc b 300\nfree a\nalloc c 9\nalloc d 2\nfree b\nalloc e 256\n";
    let script = Script::parse(source).expect("script parses");

    let mut reports = Vec::new();
    for backing in [Backing::Vec, Backing::Guarded] {
        let config = HeapConfig {
            heap_size: 1 << 14,
            base_offset: 0,
            backing,
        };
        let mut heap = config.build().expect("heap builds");
        reports.push(
            script
                .replay(&mut heap, &ReplayOptions::default())
                .expect("replay runs"),
        );
    }
    assert_eq!(reports[0].allocations, reports[1].allocations);
    assert_eq!(reports[0].stats, reports[1].stats);
}

#[test]
fn test_cli_classes_json() {
    let output = fbheap(&["classes", "--format", "json"]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.starts_with('['));
    assert_eq!(stdout.matches("\"class\":").count(), 22);
    assert!(stdout.contains(r#"{"class":21,"block_size":16777216,"slot_size":16777224}"#));
}

#[test]
fn test_cli_replay_json() {
    let file = write_script("alloc a 16\nwrite a 0102\nexpect a 0102\nfree a\n");
    let path = file.path().to_str().expect("utf-8 temp path");
    let output = fbheap(&["replay", path, "--heap-size", "4096", "--format", "json"]);

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains(r#""executed":4"#));
    assert!(stdout.contains(r#""bytes_in_use":0"#));
    assert!(stdout.contains(r#""allocations":[{"name":"a","ptr":8}]"#));
}

#[test]
fn test_cli_replay_failure_exit_code() {
    let output = fbheap(&["replay", SAMPLE_SCRIPT, "--heap-size", "1024", "-s"]);
    assert_eq!(output.status.code(), Some(1));

    let output = fbheap(&[
        "replay",
        SAMPLE_SCRIPT,
        "--heap-size",
        "1024",
        "--keep-going",
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains(r#""line":12"#));

    let output = fbheap(&["replay", "/nonexistent/script.heap"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_cli_replay_text_report() {
    let output = fbheap(&["replay", SAMPLE_SCRIPT, "--heap-size", "1024", "--keep-going"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains("Bytes in use: 32"), "{stdout}");
    assert!(stdout.contains("Free-list bytes: 0"), "{stdout}");
}

#[test]
fn test_cli_metrics_summary() {
    let output = fbheap(&[
        "--metrics",
        "replay",
        SAMPLE_SCRIPT,
        "--heap-size",
        "1024",
        "--keep-going",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains("## Metrics Summary"), "{stdout}");
    assert!(stdout.contains("fbheap_allocations_total{class=8}: 3"), "{stdout}");
    assert!(stdout.contains("fbheap_failures_total{kind=out_of_memory}: 1"), "{stdout}");
    assert!(stdout.contains("fbheap_deallocations_total: 1"), "{stdout}");
}

#[test]
fn test_cli_stress_json() {
    let output = fbheap(&[
        "stress",
        "--ops",
        "2000",
        "--seed",
        "3",
        "--heap-size",
        "0x40000",
        "--format",
        "json",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains(r#""ops":2000"#));
}
