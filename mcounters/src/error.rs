//! Error types for mcounters.

use std::io;
use std::path::PathBuf;

/// Errors surfaced by the counters core.
#[derive(Debug)]
pub enum Error {
    /// Requested max number of counters is out of the supported range.
    InvalidConfig(usize),
    /// The counters file already exists; another writer published it.
    FileExists(PathBuf),
    /// IO error from the underlying file or mapping syscalls.
    Io(io::Error),
    /// The counters file exists but its version has not been published yet.
    Uninitialized,
    /// The counters file was written with an unsupported version.
    VersionMismatch(i32),
    /// The statics do not fit into the sized statics section.
    StaticsOverflow(usize),
    /// No usable metadata slot is left before the section end.
    OutOfSlots,
    /// No counter with this id is present.
    CounterNotFound(i64),
    /// The counter's slot exists but is not in the allocated state.
    CounterNotAllocated(i64),
    /// No static with this label is present.
    StaticNotFound(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(n) => write!(f, "incorrect max number of counters: {}", n),
            Error::FileExists(path) => {
                write!(f, "counters file {} already exists", path.display())
            }
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Uninitialized => write!(f, "counters have not been initialized yet"),
            Error::VersionMismatch(v) => {
                write!(f, "unexpected version of the counters file: {}", v)
            }
            Error::StaticsOverflow(capacity) => {
                write!(f, "statics do not fit into the statics section of {} bytes", capacity)
            }
            Error::OutOfSlots => write!(f, "there is no free slot to add a new counter"),
            Error::CounterNotFound(id) => write!(f, "counter {} not found", id),
            Error::CounterNotAllocated(id) => write!(f, "counter {} is not allocated", id),
            Error::StaticNotFound(label) => write!(f, "static {} not found", label),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type for mcounters operations.
pub type Result<T> = std::result::Result<T, Error>;
