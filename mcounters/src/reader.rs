//! Reader side: observes a counters file published by another process.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::decoder::Decoder;
use crate::dir::default_directory;
use crate::error::{Error, Result};
use crate::layout::{COUNTERS_VERSION, HEADER_LENGTH};
use crate::mmap::MappedFile;

/// The observing side of a counters file.
///
/// A reader maps the file read-only and never mutates it. It may run in any
/// process; the only contract with the writer is that the reader closes
/// before the writer unmaps the file.
pub struct Reader {
    mapped: MappedFile,
    decoder: Decoder,
    closed: AtomicBool,
}

impl Reader {
    /// Opens an existing counters file read-only.
    ///
    /// Fails with [`Error::Uninitialized`] while the writer has not yet
    /// published the version word, and with [`Error::VersionMismatch`] for
    /// any version other than the supported one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Reader> {
        let mapped = MappedFile::open_read_only(path.as_ref())?;

        // A file too short for the header cannot have been published.
        if mapped.region().capacity() < HEADER_LENGTH {
            return Err(Error::Uninitialized);
        }

        let decoder = Decoder::new(mapped.region());

        let version = decoder.version();
        if version == 0 {
            return Err(Error::Uninitialized);
        }
        if version != COUNTERS_VERSION {
            return Err(Error::VersionMismatch(version));
        }

        Ok(Reader {
            mapped,
            decoder,
            closed: AtomicBool::new(false),
        })
    }

    /// Opens the counters file named `name` in the default directory.
    pub fn open_in_default_dir(name: &str) -> Result<Reader> {
        Reader::open(default_directory().join(name))
    }

    /// Version of the counters file format.
    pub fn version(&self) -> i32 {
        self.decoder.version()
    }

    /// Pid of the writer process.
    pub fn pid(&self) -> i64 {
        self.decoder.pid()
    }

    /// Start time of the writer, in milliseconds since the Unix epoch.
    pub fn start_time(&self) -> i64 {
        self.decoder.start_time()
    }

    /// Walks the statics in ascending label order. The consumer returns
    /// false to stop early.
    pub fn for_each_static<F>(&self, consumer: F)
    where
        F: FnMut(&str, &str) -> bool,
    {
        self.decoder.for_each_static(consumer)
    }

    /// Returns the value of the static with this label.
    pub fn get_static_value(&self, label: &str) -> Result<String> {
        self.decoder.get_static_value(label)
    }

    /// Walks the live counters as `(id, value, label)`. The consumer
    /// returns false to stop early. Counters whose slot is concurrently
    /// re-used are skipped in this round.
    pub fn for_each_counter<F>(&self, consumer: F)
    where
        F: FnMut(i64, i64, &str) -> bool,
    {
        self.decoder.for_each_counter(consumer)
    }

    /// Returns the current value of counter `counter_id`.
    pub fn get_counter_value(&self, counter_id: i64) -> Result<i64> {
        self.decoder.get_counter_value(counter_id)
    }

    /// Returns the label of counter `counter_id`.
    pub fn get_counter_label(&self, counter_id: i64) -> Result<String> {
        self.decoder.get_counter_label(counter_id)
    }

    /// Closes the reader and unmaps the counters file. Single-shot; a
    /// second close is a no-op.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        self.mapped.unmap().map_err(Error::Io)
    }
}
