use thiserror::Error;

/// Host-side errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("heap error: {0}")]
    Heap(#[from] fbheap_alloc::HeapError),
    #[error("memory error: {0}")]
    Memory(#[from] fbheap_memory::MemoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {message}")]
    Script { line: usize, message: String },
    #[error("line {line}: {op}: {source}")]
    Replay {
        line: usize,
        op: String,
        #[source]
        source: fbheap_alloc::HeapError,
    },
    #[error("line {line}: unknown allocation '{name}'")]
    UnknownName { line: usize, name: String },
    #[error("line {line}: payload of '{name}' is {actual}, expected {expected}")]
    PayloadMismatch {
        line: usize,
        name: String,
        expected: String,
        actual: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
