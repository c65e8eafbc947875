//! Fixed-slot blob storage on NOR flash.
//!
//! Every blob is stored as a record: an 8 byte header followed by the payload.
//!
//! | offset | size | field                                     |
//! |--------|------|-------------------------------------------|
//! | 0      | 4    | CRC-32 over bytes 4..8 and the payload    |
//! | 4      | 2    | payload size                              |
//! | 6      | 1    | slot tag                                  |
//! | 7      | 1    | write counter, wraps                      |
//!
//! All fields are little-endian. The payload starts at the next write-size boundary after the
//! header, so the header can be written last and commits the record.

mod alternate;
mod paged;

pub use alternate::AlternatingStore;
pub use paged::PagedStore;

use crate::error::Error;
use crate::platform::{AlignedOps, FnCrc32, Platform};
use alloc::vec;
use alloc::vec::Vec;
use strum::{EnumCount, EnumIter, FromRepr, IntoEnumIterator};

pub(crate) const HEADER_SIZE: usize = 8;

/// Blob identities. The discriminant is stored in every record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumCount, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Slot {
    ParameterImage,
    ApplicationImage,
    AdaptiveDataImage,
}

/// Bytes reserved per slot. A slot without a reservation is not available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    reservations: [usize; Slot::COUNT],
}

impl SlotLayout {
    pub const fn new() -> Self {
        Self {
            reservations: [0; Slot::COUNT],
        }
    }

    pub const fn with(mut self, slot: Slot, size: usize) -> Self {
        self.reservations[slot as usize] = size;
        self
    }

    pub const fn reservation(&self, slot: Slot) -> usize {
        self.reservations[slot as usize]
    }

    pub(crate) fn configured(&self) -> impl Iterator<Item = Slot> + use<'_> {
        Slot::iter().filter(|&slot| self.reservation(slot) > 0)
    }

    pub(crate) fn check(&self, slot: Slot, size: Option<usize>) -> Result<(), Error> {
        let reservation = self.reservation(slot);
        if reservation == 0 {
            return Err(Error::IndexOutOfBoundary);
        }
        match size {
            Some(size) if size > reservation || size > u16::MAX as usize => {
                Err(Error::StorageDataTooBig)
            }
            _ => Ok(()),
        }
    }
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistent blob storage. Implemented by [`AlternatingStore`] and [`PagedStore`].
pub trait Storage {
    /// Copies the last committed blob of `slot` into `buf` and returns its length.
    fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Error>;

    /// Replaces the blob of `slot`. On error the previous blob stays readable.
    fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Error>;

    /// `Ok` when all copies are healthy, [`Error::StorageImageUncertain`] when a valid blob exists
    /// next to a corrupt copy, any other error when the slot cannot be read.
    fn image_vitality(&mut self, slot: Slot) -> Result<(), Error>;

    /// Largest blob `slot` accepts, 0 if the slot is not available.
    fn capacity(&self, slot: Slot) -> usize;
}

impl<S: Storage> Storage for &mut S {
    fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Error> {
        (*self).read(slot, buf)
    }

    fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Error> {
        (*self).write(slot, data)
    }

    fn image_vitality(&mut self, slot: Slot) -> Result<(), Error> {
        (*self).image_vitality(slot)
    }

    fn capacity(&self, slot: Slot) -> usize {
        (**self).capacity(slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub(crate) crc: u32,
    pub(crate) size: u16,
    pub(crate) slot: u8,
    pub(crate) counter: u8,
}

impl RecordHeader {
    pub(crate) fn new(slot: Slot, counter: u8, payload: &[u8], crc32: FnCrc32) -> Self {
        let mut header = Self {
            crc: 0,
            size: payload.len() as u16,
            slot: slot as u8,
            counter,
        };
        header.crc = header.calculate_crc32(payload, crc32);
        header
    }

    /// `None` for erased flash.
    pub(crate) fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Option<Self> {
        if raw.iter().all(|&b| b == 0xFF) {
            return None;
        }
        Some(Self {
            crc: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            size: u16::from_le_bytes([raw[4], raw[5]]),
            slot: raw[6],
            counter: raw[7],
        })
    }

    pub(crate) fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..4].copy_from_slice(&self.crc.to_le_bytes());
        raw[4..].copy_from_slice(&self.tail());
        raw
    }

    pub(crate) fn calculate_crc32(&self, payload: &[u8], crc32: FnCrc32) -> u32 {
        crc32(crc32(0, &self.tail()), payload)
    }

    fn tail(&self) -> [u8; 4] {
        let size = self.size.to_le_bytes();
        [size[0], size[1], self.slot, self.counter]
    }
}

/// `candidate` was written after `reference` if it is at most half the counter range ahead.
pub(crate) fn is_newer(candidate: u8, reference: u8) -> bool {
    matches!(candidate.wrapping_sub(reference), 1..=127)
}

/// Offset of the payload relative to its header.
pub(crate) fn payload_offset<T: Platform>() -> usize {
    T::align_write_ceil(HEADER_SIZE)
}

/// Flash bytes occupied by a record with `size` payload bytes.
pub(crate) fn record_len<T: Platform>(size: usize) -> usize {
    payload_offset::<T>() + T::align_write_ceil(size)
}

pub(crate) fn read_aligned<T: Platform>(
    hal: &mut T,
    offset: usize,
    len: usize,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0xFFu8; T::align_read(len)];
    hal.read(offset as u32, &mut buf)
        .map_err(|_| Error::StorageNotAccessible)?;
    buf.truncate(len);
    Ok(buf)
}

pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: usize,
    bytes: &[u8],
) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    defmt::trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.is_empty() {
        return Ok(());
    }

    let offset = offset as u32;
    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        hal.write(offset, bytes)
            .map_err(|_| Error::StorageNotAccessible)
    } else {
        let pivot = T::align_write_floor(bytes.len());
        let (header, trailer) = bytes.split_at(pivot);
        if !header.is_empty() {
            hal.write(offset, header)
                .map_err(|_| Error::StorageNotAccessible)?;
        }

        // no need to write the trailer if remaining data is all ones - this the default state of the flash
        if trailer.iter().any(|&e| e != 0xFF) {
            let mut buf = vec![0xFFu8; T::WRITE_SIZE];
            buf[..trailer.len()].copy_from_slice(trailer);
            hal.write(offset + pivot as u32, &buf)
                .map_err(|_| Error::StorageNotAccessible)?;
        }

        Ok(())
    }
}

pub(crate) fn erase<T: Platform>(hal: &mut T, from: usize, to: usize) -> Result<(), Error> {
    #[cfg(feature = "defmt")]
    defmt::trace!("erase @{:#08x}..{:#08x}", from, to);

    #[cfg(feature = "debug-logs")]
    println!("  storage: erase 0x{from:0>8x}..0x{to:0>8x}");

    hal.erase(from as u32, to as u32)
        .map_err(|_| Error::StorageNotAccessible)
}
