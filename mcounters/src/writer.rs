//! Writer side: creates a counters file and publishes counters into it.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dir::default_directory;
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::layout::{self, COUNTERS_VERSION, HEADER_LENGTH};
use crate::mmap::MappedFile;
use crate::region::Region;

/// How many counters can exist simultaneously in one counters file.
pub const MAX_COUNTERS: usize = 10_000;

/// The publishing side of a counters file.
///
/// A writer creates the file exclusively, publishes the header and statics
/// once, and then hands out [`Counter`] handles. Adding, freeing and
/// updating counters is safe from any number of threads; the file itself is
/// the only shared state.
///
/// Readers are expected to close before the writer does: counters and the
/// mapped file must not be touched after [`Writer::close`].
pub struct Writer {
    filename: PathBuf,
    id_sequence: AtomicI64,
    closed: AtomicBool,
    mapped: MappedFile,
    encoder: Encoder,
    values: Region,
}

impl Writer {
    /// Creates the counters file at `path` and publishes `statics` into it.
    ///
    /// `max_counters` bounds how many counters may be alive at once; up to
    /// [`MAX_COUNTERS`] is supported. An already existing file fails with
    /// [`Error::FileExists`] — the exclusive create is what keeps two
    /// writers from racing on one file image.
    pub fn create<P: AsRef<Path>>(
        path: P,
        statics: &BTreeMap<String, String>,
        max_counters: usize,
    ) -> Result<Writer> {
        let path = path.as_ref();

        if max_counters > MAX_COUNTERS {
            return Err(Error::InvalidConfig(max_counters));
        }

        let statics_length = layout::statics_length(statics);
        let metadata_length = layout::metadata_length(max_counters);
        let values_length = layout::values_length(max_counters);

        let file_size = HEADER_LENGTH + statics_length + metadata_length + values_length;

        let mapped = MappedFile::create(path, file_size).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                Error::FileExists(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let encoder = Encoder::new(mapped.region(), statics_length, metadata_length, values_length);

        encoder.set_pid(process::id() as i64);
        encoder.set_start_time(unix_time_millis());
        encoder.set_statics(statics)?;

        // Last step on purpose: the release store of the version publishes
        // the header and statics to readers.
        encoder.set_version(COUNTERS_VERSION);

        let values = encoder.values();

        Ok(Writer {
            filename: path.to_path_buf(),
            id_sequence: AtomicI64::new(0),
            closed: AtomicBool::new(false),
            mapped,
            encoder,
            values,
        })
    }

    /// Creates the counters file named `name` in the default directory.
    pub fn create_in_default_dir(
        name: &str,
        statics: &BTreeMap<String, String>,
        max_counters: usize,
    ) -> Result<Writer> {
        Writer::create(default_directory().join(name), statics, max_counters)
    }

    /// Path of the counters file.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Adds a counter with the given label and an initial value of zero.
    pub fn add_counter(&self, label: &str) -> Result<Counter<'_>> {
        self.add_counter_with_initial_value(label, 0)
    }

    /// Adds a counter with the given label and initial value.
    ///
    /// The counter id comes from a per-writer sequence starting at 0, so
    /// ids are unique process-wide even as slots are recycled. Labels
    /// longer than the slot's capacity are truncated.
    pub fn add_counter_with_initial_value(
        &self,
        label: &str,
        initial_value: i64,
    ) -> Result<Counter<'_>> {
        let id = self.id_sequence.fetch_add(1, Ordering::SeqCst);

        let value_offset = self.encoder.add_counter(id, initial_value, label)?;

        Ok(Counter {
            writer: self,
            id,
            label: label.to_owned(),
            value_offset,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the writer and unmaps the counters file. Single-shot; a
    /// second close is a no-op.
    ///
    /// Counters obtained from this writer must not be used afterwards.
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

    pub(crate) fn free_counter(&self, id: i64) -> bool {
        self.encoder.free_counter(id)
    }
}

fn unix_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A single published 64-bit counter.
///
/// The handle borrows its [`Writer`], so it cannot outlive the writer
/// value; it additionally must not be used once the writer or the counter
/// itself has been closed. Dropping a handle does not free the slot — the
/// counter stays published until [`Counter::close`].
pub struct Counter<'a> {
    writer: &'a Writer,
    id: i64,
    label: String,
    value_offset: usize,
    closed: AtomicBool,
}

impl Counter<'_> {
    /// Id of the counter, unique for the writer's process.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Label of the counter as requested, before any truncation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the value with acquire semantics.
    pub fn get(&self) -> i64 {
        self.writer.values.get_i64_acquire(self.value_offset)
    }

    /// Returns the value with plain load semantics.
    pub fn get_weak(&self) -> i64 {
        self.writer.values.get_i64(self.value_offset)
    }

    /// Sets the value with release semantics.
    pub fn set(&self, value: i64) {
        self.writer.values.put_i64_release(self.value_offset, value)
    }

    /// Sets the value with plain store semantics.
    pub fn set_weak(&self, value: i64) {
        self.writer.values.put_i64(self.value_offset, value)
    }

    /// Atomically increments the value and returns the incremented value.
    pub fn increment(&self) -> i64 {
        self.writer.values.add_i64(self.value_offset, 1)
    }

    /// Atomically adds `delta` and returns the value it replaced.
    pub fn get_and_add(&self, delta: i64) -> i64 {
        self.writer.values.add_i64(self.value_offset, delta) - delta
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the counter and frees its slot for re-use by a later
    /// allocation. Single-shot; the handle must not be used afterwards.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.writer.free_counter(self.id);
    }
}
