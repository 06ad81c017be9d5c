//! Reader-side decoding of the counters file.

use crate::error::{Error, Result};
use crate::layout::{
    id_of, statics_record_length, CounterStatus, HEADER_LENGTH, HEADER_METADATA_LENGTH_OFFSET,
    HEADER_PID_OFFSET, HEADER_START_TIME_OFFSET, HEADER_STATICS_LENGTH_OFFSET,
    HEADER_VALUES_LENGTH_OFFSET, HEADER_VERSION_OFFSET, METADATA_ID_STATUS_OFFSET,
    METADATA_LABEL_LENGTH_OFFSET, METADATA_LABEL_OFFSET, METADATA_RECORD_LENGTH,
    STATICS_COUNT_OFFSET, STATICS_LABEL_LENGTH_OFFSET, STATICS_LABEL_OFFSET,
    STATICS_RECORDS_OFFSET, STATICS_VALUE_LENGTH_OFFSET, VALUES_COUNTER_LENGTH,
};
use crate::region::Region;

/// Decodes a counters file, tolerating the writer freeing and re-allocating
/// slots while it reads.
///
/// Counter observations use a double-check read: the id-status word is
/// acquire-loaded, the payload read, and the word loaded again. An unchanged
/// word proves the payload belongs to that id; a changed word means the slot
/// was re-used and the observation is discarded.
pub(crate) struct Decoder {
    header: Region,
    statics: Region,
    metadata: Region,
    values: Region,
}

impl Decoder {
    /// Slices `buf` into the four sections using the lengths the writer
    /// recorded in the header.
    pub(crate) fn new(buf: Region) -> Decoder {
        let header = buf.slice(0, HEADER_LENGTH);

        let statics_length = header.get_i32_acquire(HEADER_STATICS_LENGTH_OFFSET) as usize;
        let metadata_length = header.get_i32(HEADER_METADATA_LENGTH_OFFSET) as usize;
        let values_length = header.get_i32(HEADER_VALUES_LENGTH_OFFSET) as usize;

        Decoder {
            header,
            statics: buf.slice(HEADER_LENGTH, statics_length),
            metadata: buf.slice(HEADER_LENGTH + statics_length, metadata_length),
            values: buf.slice(HEADER_LENGTH + statics_length + metadata_length, values_length),
        }
    }

    pub(crate) fn version(&self) -> i32 {
        self.header.get_i32_acquire(HEADER_VERSION_OFFSET)
    }

    pub(crate) fn pid(&self) -> i64 {
        self.header.get_i64_acquire(HEADER_PID_OFFSET)
    }

    pub(crate) fn start_time(&self) -> i64 {
        self.header.get_i64_acquire(HEADER_START_TIME_OFFSET)
    }

    /// Walks the statics in file order (ascending label). The consumer
    /// returns false to stop early.
    pub(crate) fn for_each_static<F>(&self, mut consumer: F)
    where
        F: FnMut(&str, &str) -> bool,
    {
        let statics = self.statics;

        let count = statics.get_i32_acquire(STATICS_COUNT_OFFSET);

        let mut offset = STATICS_RECORDS_OFFSET;

        for _ in 0..count {
            let label_length = statics.get_i32(offset + STATICS_LABEL_LENGTH_OFFSET) as usize;
            let value_length = statics.get_i32(offset + STATICS_VALUE_LENGTH_OFFSET) as usize;

            let label = statics.get_string(offset + STATICS_LABEL_OFFSET, label_length);
            let value = statics.get_string(offset + STATICS_LABEL_OFFSET + label_length, value_length);

            if !consumer(&label, &value) {
                return;
            }

            offset += statics_record_length(label_length, value_length);
        }
    }

    /// Returns the value of the first static whose label bytes equal `label`.
    pub(crate) fn get_static_value(&self, label: &str) -> Result<String> {
        let statics = self.statics;

        let count = statics.get_i32_acquire(STATICS_COUNT_OFFSET);

        let mut offset = STATICS_RECORDS_OFFSET;

        for _ in 0..count {
            let label_length = statics.get_i32(offset + STATICS_LABEL_LENGTH_OFFSET) as usize;
            let value_length = statics.get_i32(offset + STATICS_VALUE_LENGTH_OFFSET) as usize;

            let record_label = statics.get_bytes(offset + STATICS_LABEL_OFFSET, label_length);
            if record_label == label.as_bytes() {
                let value =
                    statics.get_bytes(offset + STATICS_LABEL_OFFSET + label_length, value_length);
                return Ok(String::from_utf8_lossy(&value).into_owned());
            }

            offset += statics_record_length(label_length, value_length);
        }

        Err(Error::StaticNotFound(label.to_owned()))
    }

    /// Walks the live counters, stopping at the first NotUsed slot.
    ///
    /// A slot whose id-status word changes while its payload is read was
    /// re-allocated under us; it is skipped, not retried, and the consumer
    /// never sees the inconsistent observation. The consumer returns false
    /// to stop early.
    pub(crate) fn for_each_counter<F>(&self, mut consumer: F)
    where
        F: FnMut(i64, i64, &str) -> bool,
    {
        let metadata = self.metadata;
        let values = self.values;

        let mut metadata_offset = 0;
        let mut value_offset = 0;

        while metadata_offset < metadata.capacity() {
            let id_status_offset = metadata_offset + METADATA_ID_STATUS_OFFSET;

            let observed = metadata.get_i64_acquire(id_status_offset);

            match CounterStatus::of(observed) {
                Some(CounterStatus::NotUsed) => break,
                Some(CounterStatus::Allocated) => {
                    let id = id_of(observed);

                    let label_length =
                        metadata.get_i32(metadata_offset + METADATA_LABEL_LENGTH_OFFSET) as usize;
                    let label =
                        metadata.get_string(metadata_offset + METADATA_LABEL_OFFSET, label_length);

                    let value = values.get_i64(value_offset);

                    if metadata.get_i64_acquire(id_status_offset) == observed
                        && !consumer(id, value, &label)
                    {
                        return;
                    }
                }
                _ => {}
            }

            metadata_offset += METADATA_RECORD_LENGTH;
            value_offset += VALUES_COUNTER_LENGTH;
        }
    }

    /// Returns the current value of counter `counter_id`.
    ///
    /// Unlike iteration, a same-id observation invalidated by a concurrent
    /// value-publishing word change is re-read in place: the slot still
    /// belongs to the id being asked about.
    pub(crate) fn get_counter_value(&self, counter_id: i64) -> Result<i64> {
        let metadata = self.metadata;
        let values = self.values;

        let mut metadata_offset = 0;
        let mut value_offset = 0;

        while metadata_offset < metadata.capacity() {
            let id_status_offset = metadata_offset + METADATA_ID_STATUS_OFFSET;

            let observed = metadata.get_i64_acquire(id_status_offset);

            let status = CounterStatus::of(observed);
            if status == Some(CounterStatus::NotUsed) {
                break;
            }

            if id_of(observed) == counter_id {
                if status != Some(CounterStatus::Allocated) {
                    return Err(Error::CounterNotAllocated(counter_id));
                }

                let value = values.get_i64(value_offset);

                if metadata.get_i64_acquire(id_status_offset) == observed {
                    return Ok(value);
                }
                continue;
            }

            metadata_offset += METADATA_RECORD_LENGTH;
            value_offset += VALUES_COUNTER_LENGTH;
        }

        Err(Error::CounterNotFound(counter_id))
    }

    /// Returns the label of counter `counter_id`. Same retry discipline as
    /// [`Decoder::get_counter_value`].
    pub(crate) fn get_counter_label(&self, counter_id: i64) -> Result<String> {
        let metadata = self.metadata;

        let mut metadata_offset = 0;

        while metadata_offset < metadata.capacity() {
            let id_status_offset = metadata_offset + METADATA_ID_STATUS_OFFSET;

            let observed = metadata.get_i64_acquire(id_status_offset);

            let status = CounterStatus::of(observed);
            if status == Some(CounterStatus::NotUsed) {
                break;
            }

            if id_of(observed) == counter_id {
                if status != Some(CounterStatus::Allocated) {
                    return Err(Error::CounterNotAllocated(counter_id));
                }

                let label_length =
                    metadata.get_i32(metadata_offset + METADATA_LABEL_LENGTH_OFFSET) as usize;
                let label_bytes =
                    metadata.get_bytes(metadata_offset + METADATA_LABEL_OFFSET, label_length);

                if metadata.get_i64_acquire(id_status_offset) == observed {
                    return Ok(String::from_utf8_lossy(&label_bytes).into_owned());
                }
                continue;
            }

            metadata_offset += METADATA_RECORD_LENGTH;
        }

        Err(Error::CounterNotFound(counter_id))
    }
}
