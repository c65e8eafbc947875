use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use crate::storage::{
    HEADER_SIZE, RecordHeader, Slot, SlotLayout, Storage, erase, is_newer, payload_offset,
    read_aligned, record_len, write_aligned,
};
use alloc::vec::Vec;
use strum::EnumCount;

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Two equal blocks, each holding one extent per slot. A write always goes to the block that does
/// not hold the current copy and becomes visible only once its header is written, so a power loss
/// leaves at least the previous copy intact.
///
/// ```text
///  base                         base + size / 2
///  | block 0                    | block 1                    |
///  | slot A | slot B | ...      | slot A | slot B | ...      |
/// ```
pub struct AlternatingStore<T: Platform> {
    hal: T,
    base_address: usize,
    block_size: usize,
    layout: SlotLayout,
    extents: [Extent; Slot::COUNT],

    // set after calling self.mount
    slots: Option<[SlotState; Slot::COUNT]>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Extent {
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct SlotState {
    /// Block holding the newest valid copy, or the block written last when there is none
    current: usize,
    counter: u8,
    blocks: [Result<(), Error>; 2],
}

impl SlotState {
    fn valid(&self) -> bool {
        self.blocks[self.current].is_ok()
    }

    /// Error to report when no block holds a valid copy.
    fn failure(&self) -> Error {
        self.blocks
            .iter()
            .filter_map(|status| status.err())
            .find(|&e| e != Error::StorageDataUnavailable)
            .unwrap_or(Error::StorageDataUnavailable)
    }
}

impl<T: Platform> AlternatingStore<T> {
    /// `size` bytes starting at `partition_offset` are split into two blocks. Both values have to be
    /// aligned to the erase size, and every configured slot needs an erase-aligned extent in each
    /// block.
    pub fn new(
        hal: T,
        partition_offset: usize,
        partition_size: usize,
        layout: SlotLayout,
    ) -> Result<Self, Error> {
        if !partition_offset.is_multiple_of(T::ERASE_SIZE)
            || !partition_size.is_multiple_of(2 * T::ERASE_SIZE)
        {
            return Err(Error::AddressNotAccessible);
        }
        if partition_offset + partition_size > hal.capacity() {
            return Err(Error::StorageNvmemTooSmall);
        }

        let block_size = partition_size / 2;
        let mut extents = [Extent::default(); Slot::COUNT];
        let mut offset = 0;
        for slot in layout.configured() {
            let len = T::align_erase_ceil(record_len::<T>(layout.reservation(slot)));
            extents[slot as usize] = Extent { offset, len };
            offset += len;
        }
        if offset > block_size {
            return Err(Error::StorageNvmemTooSmall);
        }

        Ok(Self {
            hal,
            base_address: partition_offset,
            block_size,
            layout,
            extents,
            slots: None,
        })
    }

    /// Validates both copies of every configured slot and selects the newest.
    pub fn mount(&mut self) -> Result<(), Error> {
        let mut slots = [SlotState {
            current: 0,
            counter: 0,
            blocks: [Err(Error::StorageDataUnavailable); 2],
        }; Slot::COUNT];

        let layout = self.layout;
        for slot in layout.configured() {
            let mut headers = [None; 2];
            for block in 0..2 {
                match self.load(slot, block, usize::MAX) {
                    Ok((header, _)) => headers[block] = Some(header),
                    Err(Error::StorageNotAccessible) => return Err(Error::StorageNotAccessible),
                    Err(e) => slots[slot as usize].blocks[block] = Err(e),
                }
            }

            let state = &mut slots[slot as usize];
            let current = match headers {
                [Some(first), Some(second)] => {
                    if is_newer(second.counter, first.counter) {
                        Some((1, second))
                    } else {
                        Some((0, first))
                    }
                }
                [Some(first), None] => Some((0, first)),
                [None, Some(second)] => Some((1, second)),
                [None, None] => None,
            };

            match current {
                Some((block, header)) => {
                    state.blocks[block] = Ok(());
                    if headers[block ^ 1].is_some() {
                        state.blocks[block ^ 1] = Ok(());
                    }
                    state.current = block;
                    state.counter = header.counter;
                }
                // the next write lands in block 0 with counter 0
                None => {
                    state.current = 1;
                    state.counter = u8::MAX;
                }
            }

            #[cfg(feature = "defmt")]
            trace!(
                "mount: {} current block {} counter {}",
                slot, state.current, state.counter
            );

            #[cfg(feature = "debug-logs")]
            println!(
                "  alternate: mount {slot:?}: block {} counter {} {:?}",
                state.current, state.counter, state.blocks
            );
        }

        self.slots = Some(slots);
        Ok(())
    }

    /// Releases the flash device.
    pub fn into_inner(self) -> T {
        self.hal
    }

    pub fn flash(&mut self) -> &mut T {
        &mut self.hal
    }

    fn address(&self, slot: Slot, block: usize) -> usize {
        self.base_address + block * self.block_size + self.extents[slot as usize].offset
    }

    /// Reads and validates one copy. Payloads larger than `limit` are not loaded.
    fn load(
        &mut self,
        slot: Slot,
        block: usize,
        limit: usize,
    ) -> Result<(RecordHeader, Vec<u8>), Error> {
        let address = self.address(slot, block);
        let raw = read_aligned(&mut self.hal, address, HEADER_SIZE)?;
        let mut bytes = [0u8; HEADER_SIZE];
        bytes.copy_from_slice(&raw);

        let header = RecordHeader::from_bytes(&bytes).ok_or(Error::StorageDataUnavailable)?;
        if header.slot != slot as u8 {
            return Err(Error::StorageIndexMismatch);
        }
        let size = header.size as usize;
        if record_len::<T>(size) > self.extents[slot as usize].len {
            return Err(Error::StorageCrcMismatch);
        }
        if size > limit {
            return Err(Error::BufferTooSmall);
        }

        let payload = read_aligned(&mut self.hal, address + payload_offset::<T>(), size)?;
        if header.calculate_crc32(&payload, T::crc32) != header.crc {
            #[cfg(feature = "defmt")]
            warn!("load: crc mismatch in {} block {}", slot, block);
            return Err(Error::StorageCrcMismatch);
        }
        Ok((header, payload))
    }

    fn state(&self, slot: Slot) -> Result<SlotState, Error> {
        let slots = self.slots.as_ref().ok_or(Error::StorageNotInitialized)?;
        self.layout.check(slot, None)?;
        Ok(slots[slot as usize])
    }

    fn state_mut(&mut self, slot: Slot) -> Result<&mut SlotState, Error> {
        self.slots
            .as_mut()
            .map(|slots| &mut slots[slot as usize])
            .ok_or(Error::StorageNotInitialized)
    }
}

impl<T: Platform> Storage for AlternatingStore<T> {
    fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Error> {
        let state = self.state(slot)?;
        if !state.valid() {
            return Err(state.failure());
        }

        let (header, payload) = self.load(slot, state.current, buf.len())?;
        let size = header.size as usize;
        buf[..size].copy_from_slice(&payload);
        Ok(size)
    }

    fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Error> {
        let state = self.state(slot)?;
        self.layout.check(slot, Some(data.len()))?;

        let target = state.current ^ 1;
        let counter = state.counter.wrapping_add(1);
        let address = self.address(slot, target);
        let extent_len = self.extents[slot as usize].len;

        #[cfg(feature = "defmt")]
        trace!("write: {} block {} counter {}", slot, target, counter);

        #[cfg(feature = "debug-logs")]
        println!(
            "  alternate: write {slot:?}: block {target} counter {counter} [{}]",
            data.len()
        );

        let header = RecordHeader::new(slot, counter, data, T::crc32);
        let result = erase(&mut self.hal, address, address + extent_len)
            .and_then(|()| write_aligned(&mut self.hal, address + payload_offset::<T>(), data))
            .and_then(|()| write_aligned(&mut self.hal, address, &header.to_bytes()));

        let state = self.state_mut(slot)?;
        match result {
            Ok(()) => {
                state.current = target;
                state.counter = counter;
                state.blocks[target] = Ok(());
                Ok(())
            }
            Err(e) => {
                state.blocks[target] = Err(Error::StorageCrcMismatch);
                Err(e)
            }
        }
    }

    fn capacity(&self, slot: Slot) -> usize {
        self.layout.reservation(slot)
    }

    fn image_vitality(&mut self, slot: Slot) -> Result<(), Error> {
        let state = self.state(slot)?;
        let other = state.blocks[state.current ^ 1];
        match (state.blocks[state.current], other) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(Error::StorageCrcMismatch)) => Err(Error::StorageImageUncertain),
            (Ok(()), Err(_)) => Ok(()),
            (Err(_), _) => Err(state.failure()),
        }
    }
}
