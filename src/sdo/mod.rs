//! CANopen SDO access to the parameter table.
//!
//! Parameter `i` and field `f` live at dictionary index `0x2000 + (i >> 2)` and sub-index
//! `((i & 3) << 6) + f`, using the two's complement form of `i`. Negative indices therefore map to
//! the top of the range, index -1 is `0x5FFF` sub-index `0xC0 + f`.

mod client;
mod server;

pub use client::{DEFAULT_TIMEOUT_MS, Property, Response, SdoClient, State, Transfer, Transport};
pub use server::{Identity, SdoServer};

use crate::table::Index;
use strum::FromRepr;

/// Every request and response is one CAN frame.
pub type Frame = [u8; 8];

pub const PARAMETER_BASE_INDEX: u16 = 0x2000;
pub const PARAMETER_LAST_INDEX: u16 = 0x5FFF;

pub const DEVICE_TYPE_INDEX: u16 = 0x1000;
pub const PRODUCT_NAME_INDEX: u16 = 0x1008;
pub const FIRMWARE_VERSION_INDEX: u16 = 0x100A;
pub const IDENTITY_INDEX: u16 = 0x1018;

pub(crate) const COMMAND_MASK: u8 = 0xE0;
pub(crate) const INITIATE_DOWNLOAD: u8 = 0x20;
pub(crate) const INITIATE_UPLOAD: u8 = 0x40;
pub(crate) const UPLOAD_SEGMENT: u8 = 0x60;
pub(crate) const DOWNLOAD_CONFIRM: u8 = 0x60;
pub(crate) const SEGMENT_RESPONSE: u8 = 0x00;
pub(crate) const ABORT: u8 = 0x80;
pub(crate) const TOGGLE: u8 = 0x10;
pub(crate) const EXPEDITED: u8 = 0x02;
pub(crate) const SIZE_INDICATED: u8 = 0x01;
pub(crate) const LAST_SEGMENT: u8 = 0x01;

/// Bytes of payload in one segment.
pub(crate) const SEGMENT_SIZE: usize = 7;

/// Field of a parameter addressed by the low six bits of the sub-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Field {
    IndexMin,
    IndexMax,
    IndexRange,
    TableCrc,
    Value,
    Nominal,
    Minimum,
    Maximum,
    Unit,
    Repr,
    Flags,
    /// `unit << 24 | repr << 16 | flags`
    Property,
    Name,
    Info,
}

impl Field {
    /// Fields transferred as NUL terminated strings in segments.
    pub const fn is_segmented(self) -> bool {
        matches!(self, Self::Name | Self::Info)
    }
}

/// Dictionary index and sub-index of a parameter field.
pub const fn address(index: Index, field: Field) -> (u16, u8) {
    let raw = index as u16;
    (
        PARAMETER_BASE_INDEX + (raw >> 2),
        ((raw & 0x3) << 6) as u8 + field as u8,
    )
}

/// Parameter index and raw field selector of a dictionary address, `None` outside the parameter
/// range.
pub const fn decode_address(dict_index: u16, sub_index: u8) -> Option<(Index, u8)> {
    if dict_index < PARAMETER_BASE_INDEX || dict_index > PARAMETER_LAST_INDEX {
        return None;
    }
    let raw = ((dict_index - PARAMETER_BASE_INDEX) << 2) | (sub_index >> 6) as u16;
    Some((raw as Index, sub_index & 0x3F))
}

pub(crate) fn frame(command: u8, dict_index: u16, sub_index: u8, data: [u8; 4]) -> Frame {
    let [index_lo, index_hi] = dict_index.to_le_bytes();
    [
        command, index_lo, index_hi, sub_index, data[0], data[1], data[2], data[3],
    ]
}

pub(crate) fn frame_address(frame: &Frame) -> (u16, u8) {
    (u16::from_le_bytes([frame[1], frame[2]]), frame[3])
}

pub(crate) fn frame_data(frame: &Frame) -> u32 {
    u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_cover_both_halves() {
        assert_eq!(address(0, Field::Value), (0x2000, 0x04));
        assert_eq!(address(5, Field::Name), (0x2001, 0x4C));
        assert_eq!(address(-1, Field::Value), (0x5FFF, 0xC4));
        assert_eq!(address(-4, Field::IndexMin), (0x5FFF, 0x00));

        for index in [-300, -5, -1, 0, 3, 4, 1000] {
            let (dict_index, sub_index) = address(index, Field::Maximum);
            assert_eq!(
                decode_address(dict_index, sub_index),
                Some((index, Field::Maximum as u8))
            );
        }
    }

    #[test]
    fn foreign_indices_are_not_parameters() {
        assert_eq!(decode_address(0x1018, 0), None);
        assert_eq!(decode_address(0x6000, 0), None);
    }
}
