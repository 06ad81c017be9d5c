//! Shared-memory monitoring counters exchanged through a memory-mapped file.
//!
//! One process is the writer: it creates the counters file, publishes a set
//! of immutable static key/value strings and then allocates, updates and
//! frees 64-bit counters during its lifetime. Any number of reader processes
//! map the same file read-only and observe the statics and the live counters
//! without any further IPC. The file is the only shared state; all
//! synchronization is lock-free atomics on the mapped bytes.
//!
//! Key types:
//! - [`Writer`]: creates a counters file and issues [`Counter`] handles.
//! - [`Reader`]: attaches to an existing counters file and iterates its
//!   statics and counters.
//! - [`default_directory`]: where counters files live when addressed by
//!   name instead of path.
//!
//! # Concurrency model
//!
//! The writer publishes the header and statics once, sealed by a release
//! store of the version word; readers acquire-load the version before
//! trusting anything else. Each counter lives in a fixed slot whose
//! id-status word is the ownership primitive: the writer wins a slot by CAS,
//! fills in label and value, and release-stores the allocated word. A reader
//! acquire-loads the word, reads the payload, then re-loads the word and
//! discards the observation if it changed, so a concurrent free-and-reuse of
//! the slot never surfaces a torn (id, value, label) triple.

mod decoder;
mod dir;
mod encoder;
mod error;
mod layout;
mod mmap;
mod reader;
mod region;
mod writer;

pub use dir::default_directory;
pub use error::{Error, Result};
pub use reader::Reader;
pub use writer::{Counter, Writer, MAX_COUNTERS};
