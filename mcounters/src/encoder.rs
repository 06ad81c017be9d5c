//! Writer-side encoding of the counters file.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::layout::{
    id_of, id_status, statics_record_length, CounterStatus, HEADER_LENGTH,
    HEADER_METADATA_LENGTH_OFFSET, HEADER_PID_OFFSET, HEADER_START_TIME_OFFSET,
    HEADER_STATICS_LENGTH_OFFSET, HEADER_VALUES_LENGTH_OFFSET, HEADER_VERSION_OFFSET,
    METADATA_ID_STATUS_OFFSET, METADATA_LABEL_LENGTH_OFFSET, METADATA_LABEL_MAX_LENGTH,
    METADATA_LABEL_OFFSET, METADATA_RECORD_LENGTH, STATICS_COUNT_OFFSET, STATICS_LABEL_OFFSET,
    STATICS_LABEL_LENGTH_OFFSET, STATICS_RECORDS_OFFSET, STATICS_VALUE_LENGTH_OFFSET,
    VALUES_COUNTER_LENGTH,
};
use crate::region::Region;

/// Encodes the header and statics and runs the slot state machine for the
/// counter sections.
pub(crate) struct Encoder {
    header: Region,
    statics: Region,
    metadata: Region,
    values: Region,
}

impl Encoder {
    /// Slices `buf` into the four sections and records their lengths in the
    /// header.
    pub(crate) fn new(
        buf: Region,
        statics_length: usize,
        metadata_length: usize,
        values_length: usize,
    ) -> Encoder {
        let header = buf.slice(0, HEADER_LENGTH);
        let statics = buf.slice(HEADER_LENGTH, statics_length);
        let metadata = buf.slice(HEADER_LENGTH + statics_length, metadata_length);
        let values = buf.slice(HEADER_LENGTH + statics_length + metadata_length, values_length);

        // Plain stores: the release store of the version word publishes the
        // whole header.
        header.put_i32(HEADER_STATICS_LENGTH_OFFSET, statics_length as i32);
        header.put_i32(HEADER_METADATA_LENGTH_OFFSET, metadata_length as i32);
        header.put_i32(HEADER_VALUES_LENGTH_OFFSET, values_length as i32);

        Encoder {
            header,
            statics,
            metadata,
            values,
        }
    }

    /// The values section; counter handles update their slots through it.
    pub(crate) fn values(&self) -> Region {
        self.values
    }

    /// Publishes the version word. Must be the last step of initialization:
    /// this release store is what makes everything before it visible.
    pub(crate) fn set_version(&self, version: i32) {
        self.header.put_i32_release(HEADER_VERSION_OFFSET, version);
    }

    pub(crate) fn set_pid(&self, pid: i64) {
        self.header.put_i64_release(HEADER_PID_OFFSET, pid);
    }

    pub(crate) fn set_start_time(&self, millis_since_epoch: i64) {
        self.header.put_i64_release(HEADER_START_TIME_OFFSET, millis_since_epoch);
    }

    /// Serializes the statics in ascending label order.
    ///
    /// Record payloads use plain stores; each record's value length and the
    /// final count are release stores, so a reader that walks the section
    /// without going through the header still sees complete records.
    pub(crate) fn set_statics(&self, statics: &BTreeMap<String, String>) -> Result<()> {
        let statx = self.statics;

        if STATICS_RECORDS_OFFSET > statx.capacity() {
            return Err(Error::StaticsOverflow(statx.capacity()));
        }

        let mut offset = STATICS_RECORDS_OFFSET;

        for (label, value) in statics {
            let record_length = statics_record_length(label.len(), value.len());
            if offset + record_length > statx.capacity() {
                return Err(Error::StaticsOverflow(statx.capacity()));
            }

            statx.put_string(offset + STATICS_LABEL_OFFSET, label);
            statx.put_string(offset + STATICS_LABEL_OFFSET + label.len(), value);

            statx.put_i32(offset + STATICS_LABEL_LENGTH_OFFSET, label.len() as i32);
            statx.put_i32_release(offset + STATICS_VALUE_LENGTH_OFFSET, value.len() as i32);

            offset += record_length;
        }

        statx.put_i32_release(STATICS_COUNT_OFFSET, statics.len() as i32);

        Ok(())
    }

    /// Claims a metadata slot for counter `id` and returns the offset of its
    /// value in the values section.
    ///
    /// Scans from slot 0 so freed slots are recycled early and the readers'
    /// stop-at-first-NotUsed horizon stays correct. A NotUsed or Freed slot
    /// is taken by CAS of the exact observed word; on a lost race the same
    /// slot is examined again, since the winner may already have released it.
    pub(crate) fn add_counter(&self, id: i64, initial_value: i64, label: &str) -> Result<usize> {
        let metadata = self.metadata;
        let values = self.values;

        let mut metadata_offset = 0;
        let mut value_offset = 0;

        while metadata_offset < metadata.capacity() {
            let id_status_offset = metadata_offset + METADATA_ID_STATUS_OFFSET;

            let observed = metadata.get_i64_acquire(id_status_offset);

            match CounterStatus::of(observed) {
                Some(CounterStatus::NotUsed) | Some(CounterStatus::Freed) => {
                    let in_progress = id_status(id, CounterStatus::AllocationInProgress);

                    if metadata.cas_i64(id_status_offset, observed, in_progress) {
                        let label_bytes = label.as_bytes();
                        let label_length = label_bytes.len().min(METADATA_LABEL_MAX_LENGTH);

                        metadata.put_i32(
                            metadata_offset + METADATA_LABEL_LENGTH_OFFSET,
                            label_length as i32,
                        );
                        metadata.put_bytes(
                            metadata_offset + METADATA_LABEL_OFFSET,
                            &label_bytes[..label_length],
                        );

                        values.put_i64(value_offset, initial_value);

                        // Publishes the label and initial value to readers.
                        metadata.put_i64_release(
                            id_status_offset,
                            id_status(id, CounterStatus::Allocated),
                        );

                        return Ok(value_offset);
                    }
                    continue;
                }
                _ => {}
            }

            metadata_offset += METADATA_RECORD_LENGTH;
            value_offset += VALUES_COUNTER_LENGTH;
        }

        Err(Error::OutOfSlots)
    }

    /// Frees the slot of counter `id`; true when the counter was found in
    /// the allocated state.
    ///
    /// The CAS result is ignored: losing it means another thread freed the
    /// counter first, and the slot is freed either way. The CAS from the
    /// exact observed word is still required so a slot that was already
    /// re-allocated under a new id is never freed by mistake.
    pub(crate) fn free_counter(&self, id: i64) -> bool {
        let metadata = self.metadata;

        let mut metadata_offset = 0;

        while metadata_offset < metadata.capacity() {
            let id_status_offset = metadata_offset + METADATA_ID_STATUS_OFFSET;

            let observed = metadata.get_i64_acquire(id_status_offset);

            if id_of(observed) == id {
                return match CounterStatus::of(observed) {
                    Some(CounterStatus::Allocated) => {
                        metadata.cas_i64(
                            id_status_offset,
                            observed,
                            id_status(id, CounterStatus::Freed),
                        );
                        true
                    }
                    _ => false,
                };
            }

            metadata_offset += METADATA_RECORD_LENGTH;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{metadata_length, statics_length, values_length};
    use std::ptr::NonNull;

    // An aligned in-process buffer stands in for the mapped file.
    fn make_buffer(statics: &BTreeMap<String, String>, max_counters: usize) -> (Vec<i64>, Encoder) {
        let statics_len = statics_length(statics);
        let metadata_len = metadata_length(max_counters);
        let values_len = values_length(max_counters);
        let total = HEADER_LENGTH + statics_len + metadata_len + values_len;

        let mut storage = vec![0i64; total / 8];
        let region = Region::new(
            NonNull::new(storage.as_mut_ptr() as *mut u8).unwrap(),
            total,
        );
        let encoder = Encoder::new(region, statics_len, metadata_len, values_len);
        (storage, encoder)
    }

    #[test]
    fn section_lengths_land_in_the_header() {
        let mut statics = BTreeMap::new();
        statics.insert("k".to_owned(), "v".to_owned());
        let (storage, _encoder) = make_buffer(&statics, 2);

        let region = Region::new(
            NonNull::new(storage.as_ptr() as *mut u8).unwrap(),
            storage.len() * 8,
        );
        assert_eq!(region.get_i32(HEADER_STATICS_LENGTH_OFFSET), 128);
        assert_eq!(region.get_i32(HEADER_METADATA_LENGTH_OFFSET), 2 * 512);
        assert_eq!(region.get_i32(HEADER_VALUES_LENGTH_OFFSET), 2 * 128);
    }

    #[test]
    fn statics_that_do_not_fit_are_rejected() {
        let (_storage, encoder) = make_buffer(&BTreeMap::new(), 1);

        let mut too_many = BTreeMap::new();
        for i in 0..32 {
            too_many.insert(format!("property{}", i), "value".to_owned());
        }
        match encoder.set_statics(&too_many) {
            Err(Error::StaticsOverflow(_)) => {}
            other => panic!("expected StaticsOverflow, got {:?}", other),
        }
    }

    #[test]
    fn slots_are_claimed_lowest_first_and_recycled() {
        let (_storage, encoder) = make_buffer(&BTreeMap::new(), 2);

        let first = encoder.add_counter(0, 10, "a").unwrap();
        let second = encoder.add_counter(1, 20, "b").unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, VALUES_COUNTER_LENGTH);

        assert!(encoder.free_counter(0));
        let reused = encoder.add_counter(2, 30, "c").unwrap();
        assert_eq!(reused, 0);
    }

    #[test]
    fn exhausted_metadata_section_reports_out_of_slots() {
        let (_storage, encoder) = make_buffer(&BTreeMap::new(), 1);

        encoder.add_counter(0, 0, "only").unwrap();
        match encoder.add_counter(1, 0, "extra") {
            Err(Error::OutOfSlots) => {}
            other => panic!("expected OutOfSlots, got {:?}", other),
        }
    }

    #[test]
    fn freeing_an_unknown_or_freed_counter_fails() {
        let (_storage, encoder) = make_buffer(&BTreeMap::new(), 2);

        assert!(!encoder.free_counter(7));

        encoder.add_counter(0, 0, "a").unwrap();
        assert!(encoder.free_counter(0));
        assert!(!encoder.free_counter(0));
    }
}
