//! Persisted form of the value array.
//!
//! The image is a plain concatenation of 8 byte records, one per persistent entry, sorted by
//! ascending index. The storage layer adds size and CRC.
//!
//! | offset | size | field                 |
//! |--------|------|-----------------------|
//! | 0      | 4    | value, `i32`          |
//! | 4      | 2    | table index, `i16`    |
//! | 6      | 2    | entry fingerprint     |

use crate::error::Error;
use crate::table::Index;
use alloc::vec::Vec;

pub const RECORD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Record {
    pub value: i32,
    pub index: Index,
    pub fingerprint: u16,
}

impl Record {
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut raw = [0u8; RECORD_SIZE];
        raw[..4].copy_from_slice(&self.value.to_le_bytes());
        raw[4..6].copy_from_slice(&self.index.to_le_bytes());
        raw[6..].copy_from_slice(&self.fingerprint.to_le_bytes());
        raw
    }

    pub fn from_bytes(raw: &[u8; RECORD_SIZE]) -> Self {
        Self {
            value: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            index: i16::from_le_bytes([raw[4], raw[5]]),
            fingerprint: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }
}

pub fn encode(records: &[Record]) -> Vec<u8> {
    records.iter().flat_map(Record::to_bytes).collect()
}

/// Fails with [`Error::ParameterEntriesMismatch`] unless the blob is a whole number of records.
pub fn decode(blob: &[u8]) -> Result<Vec<Record>, Error> {
    if !blob.len().is_multiple_of(RECORD_SIZE) {
        return Err(Error::ParameterEntriesMismatch);
    }
    Ok(blob
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; RECORD_SIZE];
            raw.copy_from_slice(chunk);
            Record::from_bytes(&raw)
        })
        .collect())
}

/// Walks the persisted records alongside the table. Lookups must come in ascending index order.
pub(crate) struct Lockstep<'a> {
    records: &'a [Record],
    cursor: usize,
    content_changed: bool,
}

impl<'a> Lockstep<'a> {
    pub(crate) fn new(records: &'a [Record]) -> Self {
        Self {
            records,
            cursor: 0,
            content_changed: false,
        }
    }

    /// Persisted value for `index`, or `None` if there is no record with a matching fingerprint.
    /// Records of indices below `index` are skipped, they belong to entries that no longer exist.
    pub(crate) fn lookup(&mut self, index: Index, fingerprint: u16) -> Option<i32> {
        while self
            .records
            .get(self.cursor)
            .is_some_and(|record| record.index < index)
        {
            self.cursor += 1;
            self.content_changed = true;
        }

        match self.records.get(self.cursor) {
            Some(record) if record.index == index && record.fingerprint == fingerprint => {
                self.cursor += 1;
                Some(record.value)
            }
            _ => {
                self.content_changed = true;
                None
            }
        }
    }

    /// Whether records were skipped, mismatched or left over behind the last lookup.
    pub(crate) fn content_changed(&self) -> bool {
        self.content_changed || self.cursor < self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: Index, value: i32) -> Record {
        Record {
            value,
            index,
            fingerprint: 0x1000u16.wrapping_add(index as u16),
        }
    }

    #[test]
    fn decode_rejects_partial_records() {
        let blob = encode(&[record(-1, 5), record(0, 7)]);
        assert_eq!(decode(&blob[..12]), Err(Error::ParameterEntriesMismatch));
        assert_eq!(decode(&blob).unwrap(), [record(-1, 5), record(0, 7)]);
    }

    #[test]
    fn lockstep_matches_in_order() {
        let records = [record(-2, 1), record(0, 2), record(3, 4)];
        let mut lockstep = Lockstep::new(&records);

        assert_eq!(lockstep.lookup(-2, 0x0FFE), Some(1));
        assert_eq!(lockstep.lookup(0, 0x1000), Some(2));
        assert_eq!(lockstep.lookup(3, 0x1003), Some(4));
        assert!(!lockstep.content_changed());
    }

    #[test]
    fn lockstep_flags_drift() {
        let records = [record(-2, 1), record(0, 2), record(3, 4)];

        // index 0 no longer persistent
        let mut lockstep = Lockstep::new(&records);
        assert_eq!(lockstep.lookup(-2, 0x0FFE), Some(1));
        assert_eq!(lockstep.lookup(3, 0x1003), Some(4));
        assert!(lockstep.content_changed());

        // fingerprint changed
        let mut lockstep = Lockstep::new(&records);
        assert_eq!(lockstep.lookup(-2, 0xBEEF), None);
        assert!(lockstep.content_changed());

        // trailing record never looked up
        let mut lockstep = Lockstep::new(&records);
        assert_eq!(lockstep.lookup(-2, 0x0FFE), Some(1));
        assert_eq!(lockstep.lookup(0, 0x1000), Some(2));
        assert!(lockstep.content_changed());
    }
}
