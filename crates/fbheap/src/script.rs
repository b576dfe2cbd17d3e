//! Workload scripts.
//!
//! A script is a line-oriented list of heap operations on named allocations:
//!
//! ```text
//! # comment
//! alloc buf 100
//! write buf deadbeef
//! expect buf deadbeef
//! fill buf 2a
//! free buf
//! stats
//! reset
//! ```
//!
//! Replaying the same script against the same configuration always yields
//! the same pointers.

use std::fmt;

use fbheap_alloc::{
    AllocatorStats, FreeingBumpAllocator, HeapError, HeapPtr, LinearMemory, SizeClass,
};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// One script operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Alloc { name: String, size: u32 },
    Free { name: String },
    Write { name: String, data: Vec<u8> },
    Expect { name: String, data: Vec<u8> },
    Fill { name: String, byte: u8 },
    Stats,
    Reset,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc { name, size } => write!(f, "alloc {name} {size}"),
            Self::Free { name } => write!(f, "free {name}"),
            Self::Write { name, data } => write!(f, "write {name} {}", hex::encode(data)),
            Self::Expect { name, data } => write!(f, "expect {name} {}", hex::encode(data)),
            Self::Fill { name, byte } => write!(f, "fill {name} {byte:02x}"),
            Self::Stats => write!(f, "stats"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// An operation with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub line: usize,
    pub op: Op,
}

/// Parsed workload script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    commands: Vec<Command>,
}

/// Replay behaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Count heap errors and continue instead of aborting.
    pub keep_going: bool,
}

/// A command that failed during a `keep_going` replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFailure {
    pub line: usize,
    pub op: String,
    pub error: String,
}

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    /// Commands that completed successfully.
    pub executed: usize,
    pub failures: Vec<ReplayFailure>,
    /// Pointer returned by each `alloc`, in script order.
    pub allocations: Vec<(String, HeapPtr)>,
    /// Final allocator state.
    pub stats: AllocatorStats,
}

impl ReplayReport {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Print the report as a single JSON object.
    pub fn print_json(&self) {
        println!("{}", self.to_json());
    }

    /// Render the report as a single-line JSON object.
    #[must_use]
    pub fn to_json(&self) -> String {
        let allocations: Vec<String> = self
            .allocations
            .iter()
            .map(|(name, ptr)| {
                format!(r#"{{"name":"{}","ptr":{}}}"#, json_escape(name), ptr.offset())
            })
            .collect();
        let failures: Vec<String> = self
            .failures
            .iter()
            .map(|f| {
                format!(
                    r#"{{"line":{},"op":"{}","error":"{}"}}"#,
                    f.line,
                    json_escape(&f.op),
                    json_escape(&f.error)
                )
            })
            .collect();
        format!(
            r#"{{"executed":{},"failures":[{}],"allocations":[{}],"bytes_in_use":{},"bumper":{},"peak_bytes_in_use":{},"live_allocations":{}}}"#,
            self.executed,
            failures.join(","),
            allocations.join(","),
            self.stats.bytes_in_use,
            self.stats.bumper,
            self.stats.peak_bytes_in_use,
            self.stats.live_allocations,
        )
    }
}

/// Escape `s` for use inside a JSON string literal.
fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Script {
        line,
        message: message.into(),
    }
}

fn parse_hex(line: usize, text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|e| parse_error(line, format!("invalid hex '{text}': {e}")))
}

fn parse_size(line: usize, text: &str) -> Result<u32> {
    let parsed = text.strip_prefix("0x").map_or_else(
        || text.parse::<u32>(),
        |digits| u32::from_str_radix(digits, 16),
    );
    parsed.map_err(|e| parse_error(line, format!("invalid size '{text}': {e}")))
}

fn parse_line(line: usize, text: &str) -> Result<Option<Op>> {
    let text = text.split_once('#').map_or(text, |(code, _)| code);
    let words: Vec<&str> = text.split_whitespace().collect();
    let Some((&keyword, args)) = words.split_first() else {
        return Ok(None);
    };

    let op = match (keyword, args) {
        ("alloc", [name, size]) => Op::Alloc {
            name: (*name).to_string(),
            size: parse_size(line, size)?,
        },
        ("free", [name]) => Op::Free {
            name: (*name).to_string(),
        },
        ("write", [name, data]) => Op::Write {
            name: (*name).to_string(),
            data: parse_hex(line, data)?,
        },
        ("expect", [name, data]) => Op::Expect {
            name: (*name).to_string(),
            data: parse_hex(line, data)?,
        },
        ("fill", [name, byte]) => {
            let bytes = parse_hex(line, byte)?;
            let [value] = bytes[..] else {
                return Err(parse_error(line, format!("fill takes one byte, got '{byte}'")));
            };
            Op::Fill {
                name: (*name).to_string(),
                byte: value,
            }
        }
        ("stats", []) => Op::Stats,
        ("reset", []) => Op::Reset,
        ("alloc" | "free" | "write" | "expect" | "fill" | "stats" | "reset", _) => {
            return Err(parse_error(
                line,
                format!("wrong number of arguments for '{keyword}'"),
            ));
        }
        _ => return Err(parse_error(line, format!("unknown command '{keyword}'"))),
    };
    Ok(Some(op))
}

impl Script {
    /// Parse a script.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] with the offending line number.
    pub fn parse(source: &str) -> Result<Self> {
        let mut commands = Vec::new();
        for (idx, text) in source.lines().enumerate() {
            let line = idx + 1;
            if let Some(op) = parse_line(line, text)? {
                commands.push(Command { line, op });
            }
        }
        Ok(Self { commands })
    }

    /// Read and parse a script file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source)
    }

    #[must_use]
    pub const fn commands(&self) -> &[Command] {
        self.commands.as_slice()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Run every command against `heap`.
    ///
    /// Heap errors abort the replay unless `options.keep_going` is set, in
    /// which case they are recorded in the report. Unknown names and payload
    /// mismatches are script bugs and always abort.
    ///
    /// # Errors
    ///
    /// Returns the first error that aborted the replay.
    pub fn replay<M: LinearMemory>(
        &self,
        heap: &mut FreeingBumpAllocator<M>,
        options: &ReplayOptions,
    ) -> Result<ReplayReport> {
        let mut replay = Replay {
            heap,
            names: FxHashMap::default(),
            allocations: Vec::new(),
        };
        let mut executed = 0;
        let mut failures = Vec::new();

        for command in &self.commands {
            match replay.execute(command) {
                Ok(()) => executed += 1,
                Err(Error::Heap(e)) if options.keep_going => {
                    warn!(line = command.line, op = %command.op, error = %e, "command failed");
                    failures.push(ReplayFailure {
                        line: command.line,
                        op: command.op.to_string(),
                        error: e.to_string(),
                    });
                }
                Err(Error::Heap(source)) => {
                    return Err(Error::Replay {
                        line: command.line,
                        op: command.op.to_string(),
                        source,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let stats = replay.heap.stats();
        metrics::record_stats(&stats);
        info!(
            executed,
            failures = failures.len(),
            bytes_in_use = stats.bytes_in_use,
            "replay finished"
        );
        Ok(ReplayReport {
            executed,
            failures,
            allocations: replay.allocations,
            stats,
        })
    }
}

struct Replay<'a, M: LinearMemory> {
    heap: &'a mut FreeingBumpAllocator<M>,
    names: FxHashMap<String, HeapPtr>,
    allocations: Vec<(String, HeapPtr)>,
}

impl<M: LinearMemory> Replay<'_, M> {
    fn lookup(&self, line: usize, name: &str) -> Result<HeapPtr> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownName {
                line,
                name: name.to_string(),
            })
    }

    fn execute(&mut self, command: &Command) -> Result<()> {
        let line = command.line;
        match &command.op {
            Op::Alloc { name, size } => {
                let ptr = self.heap.allocate(*size).inspect_err(metrics::record_failure)?;
                if let Ok(class) = SizeClass::for_size(*size) {
                    metrics::record_allocation(*size, class);
                }
                debug!(line, name = %name, size, %ptr, "alloc");
                self.names.insert(name.clone(), ptr);
                self.allocations.push((name.clone(), ptr));
            }
            Op::Free { name } => {
                let ptr = self.lookup(line, name)?;
                self.heap.deallocate(ptr).inspect_err(metrics::record_failure)?;
                metrics::record_deallocation();
                debug!(line, name = %name, %ptr, "free");
                self.names.remove(name);
            }
            Op::Write { name, data } => {
                let ptr = self.lookup(line, name)?;
                self.heap.write(ptr, data)?;
            }
            Op::Expect { name, data } => {
                let ptr = self.lookup(line, name)?;
                let len = u32::try_from(data.len()).map_err(|_| HeapError::OutOfBounds {
                    offset: ptr.offset(),
                    len: u32::MAX,
                })?;
                let actual = self.heap.read(ptr, len)?;
                if actual != data.as_slice() {
                    return Err(Error::PayloadMismatch {
                        line,
                        name: name.clone(),
                        expected: hex::encode(data),
                        actual: hex::encode(actual),
                    });
                }
            }
            Op::Fill { name, byte } => {
                let ptr = self.lookup(line, name)?;
                let capacity = self.heap.block_capacity(ptr)?;
                self.heap.write(ptr, &vec![*byte; capacity as usize])?;
            }
            Op::Stats => {
                let stats = self.heap.stats();
                metrics::record_stats(&stats);
                info!(
                    line,
                    bytes_in_use = stats.bytes_in_use,
                    bumper = stats.bumper,
                    live = stats.live_allocations,
                    free_list_hits = stats.free_list_hits,
                    "stats"
                );
            }
            Op::Reset => {
                self.heap.reset();
                self.names.clear();
                debug!(line, "reset");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(size: usize) -> FreeingBumpAllocator<Vec<u8>> {
        FreeingBumpAllocator::new(vec![0u8; size], 0).unwrap()
    }

    #[test]
    fn test_parse_all_commands() {
        let script = Script::parse(
            "# header comment\n\
             alloc a 16\n\
             \n\
             write a 0102ff   # trailing comment\n\
             expect a 0102ff\n\
             fill a 2A\n\
             alloc b 0x100\n\
             free a\n\
             stats\n\
             reset\n",
        )
        .unwrap();

        assert_eq!(script.len(), 8);
        assert_eq!(
            script.commands()[0],
            Command {
                line: 2,
                op: Op::Alloc {
                    name: "a".to_string(),
                    size: 16
                }
            }
        );
        assert_eq!(script.commands()[1].line, 4);
        assert_eq!(
            script.commands()[1].op,
            Op::Write {
                name: "a".to_string(),
                data: vec![1, 2, 0xff]
            }
        );
        assert_eq!(
            script.commands()[3].op,
            Op::Fill {
                name: "a".to_string(),
                byte: 0x2a
            }
        );
        assert_eq!(
            script.commands()[4].op,
            Op::Alloc {
                name: "b".to_string(),
                size: 256
            }
        );
        assert_eq!(script.commands()[7].op, Op::Reset);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let cases = [
            "alloc a\n",
            "stats\nbogus x\n",
            "alloc a 16\nwrite a 0g\n",
            "alloc a 16\n\nfill a 0102\n",
            "alloc a -1\n",
        ];
        let lines = [1, 2, 2, 3, 1];
        for (source, expected) in cases.iter().zip(lines) {
            match Script::parse(source) {
                Err(Error::Script { line, .. }) => assert_eq!(line, expected, "{source:?}"),
                other => panic!("expected parse error for {source:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_replay_reuses_freed_block() {
        let script = Script::parse("alloc a 1\nalloc b 1\nfree a\nalloc c 4\n").unwrap();
        let mut heap = heap(1024);
        let report = script.replay(&mut heap, &ReplayOptions::default()).unwrap();

        assert!(report.success());
        assert_eq!(report.executed, 4);
        let ptrs: Vec<u32> = report.allocations.iter().map(|(_, p)| p.offset()).collect();
        assert_eq!(ptrs, vec![8, 24, 8]);
        assert_eq!(report.stats.bytes_in_use, 32);
        assert_eq!(report.stats.bumper, 32);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let source = "alloc a 40\nalloc b 7\nfree a\nalloc c 33\nalloc d 64\nfree b\n";
        let script = Script::parse(source).unwrap();
        let first = script.replay(&mut heap(4096), &ReplayOptions::default()).unwrap();
        let second = script.replay(&mut heap(4096), &ReplayOptions::default()).unwrap();
        assert_eq!(first.allocations, second.allocations);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_replay_write_expect_fill() {
        let script = Script::parse(
            "alloc a 8\nfill a ee\nexpect a eeeeeeeeeeeeeeee\nwrite a 0102\nexpect a 0102eeee\n",
        )
        .unwrap();
        let report = script.replay(&mut heap(256), &ReplayOptions::default()).unwrap();
        assert_eq!(report.executed, 5);
    }

    #[test]
    fn test_replay_payload_mismatch() {
        let script = Script::parse("alloc a 8\nwrite a 01\nexpect a 02\n").unwrap();
        let err = script
            .replay(&mut heap(256), &ReplayOptions { keep_going: true })
            .unwrap_err();
        match err {
            Error::PayloadMismatch {
                line,
                expected,
                actual,
                ..
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, "02");
                assert_eq!(actual, "01");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_replay_unknown_name() {
        let script = Script::parse("free ghost\n").unwrap();
        let err = script
            .replay(&mut heap(256), &ReplayOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownName { line: 1, .. }));
    }

    #[test]
    fn test_replay_aborts_on_heap_error() {
        let script = Script::parse("alloc a 8\nalloc big 64\nalloc b 8\n").unwrap();
        let mut heap = heap(32);
        let err = script
            .replay(&mut heap, &ReplayOptions::default())
            .unwrap_err();
        assert!(
            matches!(
                &err,
                Error::Replay {
                    line: 2,
                    source: HeapError::OutOfMemory { requested: 64, .. },
                    ..
                }
            ),
            "got {err:?}"
        );
        assert_eq!(err.to_string().split(": ").nth(1), Some("alloc big 64"));
        assert_eq!(heap.stats().live_allocations, 1);
    }

    #[test]
    fn test_report_json_escapes_names() {
        let script = Script::parse("alloc a\"b\\c 8\nalloc \"big\" 64\n").unwrap();
        let mut heap = heap(32);
        let report = script
            .replay(&mut heap, &ReplayOptions { keep_going: true })
            .unwrap();

        let json = report.to_json();
        assert!(json.contains(r#"{"name":"a\"b\\c","ptr":8}"#), "{json}");
        assert!(json.contains(r#""op":"alloc \"big\" 64""#), "{json}");
    }

    #[test]
    fn test_replay_keep_going_records_failures() {
        let script = Script::parse("alloc a 8\nalloc big 64\nalloc b 8\n").unwrap();
        let mut heap = heap(32);
        let report = script
            .replay(&mut heap, &ReplayOptions { keep_going: true })
            .unwrap();

        assert_eq!(report.executed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].line, 2);
        assert_eq!(report.failures[0].op, "alloc big 64");
        assert_eq!(report.stats.bytes_in_use, 32);
    }

    #[test]
    fn test_replay_reset_forgets_names() {
        let script = Script::parse("alloc a 8\nreset\nfree a\n").unwrap();
        let err = script
            .replay(&mut heap(256), &ReplayOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnknownName { line: 3, .. }));
    }

    #[test]
    fn test_rebinding_reused_block() {
        // `b` lands on the block `a` released.
        let script = Script::parse("alloc a 8\nfree a\nalloc b 8\nfree b\n").unwrap();
        let report = script
            .replay(&mut heap(256), &ReplayOptions::default())
            .unwrap();
        assert_eq!(report.allocations[0].1, report.allocations[1].1);
        assert_eq!(report.stats.bytes_in_use, 0);
    }

    #[test]
    fn test_op_display_round_trips_through_parser() {
        let op = Op::Fill {
            name: "x".to_string(),
            byte: 0x0a,
        };
        let reparsed = Script::parse(&op.to_string()).unwrap();
        assert_eq!(reparsed.commands()[0].op, op);
    }
}
