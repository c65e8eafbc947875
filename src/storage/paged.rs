use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use crate::storage::{
    HEADER_SIZE, RecordHeader, Slot, SlotLayout, Storage, erase, is_newer, payload_offset,
    read_aligned, record_len, write_aligned,
};
use alloc::vec::Vec;
use strum::{EnumCount, IntoEnumIterator};

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

const PAGE_HEADER_SIZE: usize = 8;

/// Records of all slots are appended to the active page. When the next record does not fit, the
/// live records are copied to the erased peer page together with the new one, and only then the old
/// page is erased.
///
/// Every page starts with a header holding a sequence number and its CRC-32; the page with the
/// higher sequence is active. A relocation writes that header last, so a page with records but no
/// header is garbage left by a torn relocation.
pub struct PagedStore<T: Platform> {
    hal: T,
    base_address: usize,
    page_size: usize,
    layout: SlotLayout,

    // set after calling self.mount
    state: Option<PagedState>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Page {
    sequence: Option<u32>,
    /// Offset of the first free byte. Everything behind it is erased unless `corrupt` is set.
    fill: usize,
    corrupt: bool,
}

impl Page {
    fn is_dirty(&self) -> bool {
        self.sequence.is_some() || self.corrupt
    }
}

#[derive(Debug, Clone, Copy)]
struct Location {
    page: usize,
    offset: usize,
    header: RecordHeader,
}

#[derive(Debug, Clone)]
struct PagedState {
    active: usize,
    pages: [Page; 2],
    records: [Option<Location>; Slot::COUNT],
}

impl PagedState {
    fn next_sequence(&self) -> u32 {
        self.pages
            .iter()
            .filter_map(|page| page.sequence)
            .max()
            .map_or(0, |sequence| sequence.wrapping_add(1))
    }

    fn failure(&self) -> Error {
        if self.pages.iter().any(|page| page.corrupt) {
            Error::StorageCrcMismatch
        } else {
            Error::StorageDataUnavailable
        }
    }
}

impl<T: Platform> PagedStore<T> {
    /// Uses the two pages of `page_size` bytes starting at `partition_offset`. All configured slots
    /// at their full reservation must fit into a single page.
    pub fn new(
        hal: T,
        partition_offset: usize,
        page_size: usize,
        layout: SlotLayout,
    ) -> Result<Self, Error> {
        if !partition_offset.is_multiple_of(T::ERASE_SIZE)
            || page_size == 0
            || !page_size.is_multiple_of(T::ERASE_SIZE)
        {
            return Err(Error::AddressNotAccessible);
        }
        if partition_offset + 2 * page_size > hal.capacity() {
            return Err(Error::StorageNvmemTooSmall);
        }

        let required = layout
            .configured()
            .map(|slot| record_len::<T>(layout.reservation(slot)))
            .sum::<usize>()
            + Self::records_start();
        if required > page_size {
            return Err(Error::StorageNvmemTooSmall);
        }

        Ok(Self {
            hal,
            base_address: partition_offset,
            page_size,
            layout,
            state: None,
        })
    }

    /// Scans both pages, selects the active one and indexes the newest record of every slot.
    pub fn mount(&mut self) -> Result<(), Error> {
        let mut pages = [Page::default(); 2];
        for (index, page) in pages.iter_mut().enumerate() {
            page.sequence = self.load_page_header(index)?;
            if page.sequence.is_none() {
                page.corrupt = !self.is_erased(index, 0)?;
            }
        }

        let active = match (pages[0].sequence, pages[1].sequence) {
            (Some(first), Some(second)) if (second.wrapping_sub(first) as i32) > 0 => 1,
            (None, Some(_)) => 1,
            _ => 0,
        };

        let mut state = PagedState {
            active,
            pages,
            records: [None; Slot::COUNT],
        };
        for index in [active, active ^ 1] {
            if state.pages[index].sequence.is_some() {
                self.scan(index, &mut state)?;
            }
        }

        #[cfg(feature = "defmt")]
        trace!(
            "mount: active page {} fill {}",
            state.active, state.pages[state.active].fill
        );

        #[cfg(feature = "debug-logs")]
        println!("  paged: mount: active {} {:?}", state.active, state.pages);

        self.state = Some(state);
        Ok(())
    }

    /// Releases the flash device.
    pub fn into_inner(self) -> T {
        self.hal
    }

    pub fn flash(&mut self) -> &mut T {
        &mut self.hal
    }

    fn records_start() -> usize {
        T::align_write_ceil(PAGE_HEADER_SIZE)
    }

    fn page_address(&self, page: usize) -> usize {
        self.base_address + page * self.page_size
    }

    fn load_page_header(&mut self, page: usize) -> Result<Option<u32>, Error> {
        let address = self.page_address(page);
        let raw = read_aligned(&mut self.hal, address, PAGE_HEADER_SIZE)?;
        if raw.iter().all(|&b| b == 0xFF) {
            return Ok(None);
        }
        let sequence = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let crc = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if T::crc32(0, &raw[..4]) != crc {
            #[cfg(feature = "defmt")]
            warn!("mount: invalid header on page {}", page);
            return Ok(None);
        }
        Ok(Some(sequence))
    }

    fn is_erased(&mut self, page: usize, from: usize) -> Result<bool, Error> {
        if from >= self.page_size {
            return Ok(true);
        }
        let address = self.page_address(page) + from;
        let bytes = read_aligned(&mut self.hal, address, self.page_size - from)?;
        Ok(bytes.iter().all(|&b| b == 0xFF))
    }

    fn scan(&mut self, page: usize, state: &mut PagedState) -> Result<(), Error> {
        let mut offset = Self::records_start();
        let mut corrupt = false;
        while offset + HEADER_SIZE <= self.page_size {
            let header = match self.load_record(page, offset, usize::MAX) {
                Ok((header, _)) => header,
                Err(Error::StorageDataUnavailable) => break,
                Err(Error::StorageNotAccessible) => return Err(Error::StorageNotAccessible),
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };

            if let Some(slot) = Slot::from_repr(header.slot) {
                let candidate = Location {
                    page,
                    offset,
                    header,
                };
                let replace = match state.records[slot as usize] {
                    Some(current) => is_newer(header.counter, current.header.counter),
                    None => true,
                };
                if replace {
                    state.records[slot as usize] = Some(candidate);
                }
            }
            offset += record_len::<T>(header.size as usize);
        }

        if !corrupt {
            corrupt = !self.is_erased(page, offset)?;
        }
        state.pages[page].fill = offset;
        state.pages[page].corrupt = corrupt;
        Ok(())
    }

    fn load_record(
        &mut self,
        page: usize,
        offset: usize,
        limit: usize,
    ) -> Result<(RecordHeader, Vec<u8>), Error> {
        let address = self.page_address(page) + offset;
        let raw = read_aligned(&mut self.hal, address, HEADER_SIZE)?;
        let mut bytes = [0u8; HEADER_SIZE];
        bytes.copy_from_slice(&raw);

        let header = RecordHeader::from_bytes(&bytes).ok_or(Error::StorageDataUnavailable)?;
        let size = header.size as usize;
        if offset + record_len::<T>(size) > self.page_size {
            return Err(Error::StorageCrcMismatch);
        }
        if size > limit {
            return Err(Error::BufferTooSmall);
        }

        let payload = read_aligned(&mut self.hal, address + payload_offset::<T>(), size)?;
        if header.calculate_crc32(&payload, T::crc32) != header.crc {
            return Err(Error::StorageCrcMismatch);
        }
        Ok((header, payload))
    }

    fn write_page_header(&mut self, page: usize, sequence: u32) -> Result<(), Error> {
        let mut raw = [0u8; PAGE_HEADER_SIZE];
        raw[..4].copy_from_slice(&sequence.to_le_bytes());
        let crc = T::crc32(0, &raw[..4]);
        raw[4..].copy_from_slice(&crc.to_le_bytes());
        let address = self.page_address(page);
        write_aligned(&mut self.hal, address, &raw)
    }

    fn erase_page(&mut self, page: usize) -> Result<(), Error> {
        let address = self.page_address(page);
        erase(&mut self.hal, address, address + self.page_size)
    }

    /// Writes one record behind the last one of `page`; the header goes last.
    fn append(
        &mut self,
        state: &mut PagedState,
        page: usize,
        header: RecordHeader,
        payload: &[u8],
    ) -> Result<(), Error> {
        let offset = state.pages[page].fill;
        let address = self.page_address(page) + offset;

        #[cfg(feature = "debug-logs")]
        println!(
            "  paged: append slot {} counter {} @ page {page} + 0x{offset:x}",
            header.slot, header.counter
        );

        // anything partially written is garbage from now on
        state.pages[page].corrupt = true;
        write_aligned(&mut self.hal, address + payload_offset::<T>(), payload)?;
        write_aligned(&mut self.hal, address, &header.to_bytes())?;
        state.pages[page].corrupt = false;
        state.pages[page].fill = offset + record_len::<T>(payload.len());

        if let Some(slot) = Slot::from_repr(header.slot) {
            state.records[slot as usize] = Some(Location {
                page,
                offset,
                header,
            });
        }
        Ok(())
    }

    /// Moves every live record plus `record` into the erased peer page and erases the old one.
    fn relocate(
        &mut self,
        state: &mut PagedState,
        record: (RecordHeader, &[u8]),
    ) -> Result<(), Error> {
        let (new_header, new_payload) = record;
        let mut live = Vec::new();
        for slot in Slot::iter() {
            if slot as u8 == new_header.slot {
                continue;
            }
            if let Some(location) = state.records[slot as usize] {
                match self.load_record(location.page, location.offset, usize::MAX) {
                    Ok(loaded) => live.push(loaded),
                    Err(Error::StorageNotAccessible) => return Err(Error::StorageNotAccessible),
                    Err(_) => {
                        #[cfg(feature = "defmt")]
                        warn!("relocate: dropping unreadable record of {}", slot);
                        state.records[slot as usize] = None;
                    }
                }
            }
        }

        let source = state.active;
        let target = source ^ 1;
        let sequence = state.next_sequence();

        #[cfg(feature = "defmt")]
        trace!(
            "relocate: page {} -> {} with {} live records",
            source,
            target,
            live.len()
        );

        self.erase_page(target)?;
        state.pages[target] = Page {
            sequence: None,
            fill: Self::records_start(),
            corrupt: true,
        };

        // the target page header commits the copy, until then the source page stays in charge
        let committed = state.records;
        if let Err(e) = self.fill_page(state, target, sequence, &live, (new_header, new_payload)) {
            state.records = committed;
            return Err(e);
        }
        state.pages[target].sequence = Some(sequence);
        state.active = target;

        self.erase_page(source)?;
        state.pages[source] = Page::default();
        Ok(())
    }

    fn fill_page(
        &mut self,
        state: &mut PagedState,
        page: usize,
        sequence: u32,
        live: &[(RecordHeader, Vec<u8>)],
        record: (RecordHeader, &[u8]),
    ) -> Result<(), Error> {
        for (header, payload) in live {
            self.append(state, page, *header, payload)?;
        }
        self.append(state, page, record.0, record.1)?;
        self.write_page_header(page, sequence)
    }

    /// Copies live records left behind on the peer page into the active page, then erases the peer.
    fn release_peer(&mut self, state: &mut PagedState) -> Result<(), Error> {
        let active = state.active;
        let peer = active ^ 1;
        for slot in Slot::iter() {
            let Some(location) = state.records[slot as usize] else {
                continue;
            };
            if location.page != peer {
                continue;
            }
            match self.load_record(peer, location.offset, usize::MAX) {
                Ok((header, payload)) => self.append(state, active, header, &payload)?,
                Err(Error::StorageNotAccessible) => return Err(Error::StorageNotAccessible),
                Err(_) => state.records[slot as usize] = None,
            }
        }
        self.erase_page(peer)?;
        state.pages[peer] = Page::default();
        Ok(())
    }

    fn mounted(&self, slot: Slot) -> Result<&PagedState, Error> {
        let state = self.state.as_ref().ok_or(Error::StorageNotInitialized)?;
        self.layout.check(slot, None)?;
        Ok(state)
    }
}

impl<T: Platform> Storage for PagedStore<T> {
    fn read(&mut self, slot: Slot, buf: &mut [u8]) -> Result<usize, Error> {
        let state = self.mounted(slot)?;
        let Some(location) = state.records[slot as usize] else {
            return Err(state.failure());
        };

        let (header, payload) = self.load_record(location.page, location.offset, buf.len())?;
        if header.slot != slot as u8 {
            return Err(Error::StorageIndexMismatch);
        }
        let size = header.size as usize;
        buf[..size].copy_from_slice(&payload);
        Ok(size)
    }

    fn write(&mut self, slot: Slot, data: &[u8]) -> Result<(), Error> {
        let mut state = self.mounted(slot)?.clone();
        self.layout.check(slot, Some(data.len()))?;

        let counter = match state.records[slot as usize] {
            Some(location) => {
                if location.header.size as usize == data.len() {
                    match self.load_record(location.page, location.offset, usize::MAX) {
                        Ok((_, current)) if current == data => return Ok(()),
                        Err(Error::StorageNotAccessible) => return Err(Error::StorageNotAccessible),
                        _ => {}
                    }
                }
                location.header.counter.wrapping_add(1)
            }
            None => 0,
        };
        let header = RecordHeader::new(slot, counter, data, T::crc32);

        let active = state.active;
        let peer = active ^ 1;
        let mut needed = record_len::<T>(data.len());
        if state.pages[peer].is_dirty() {
            needed += state
                .records
                .iter()
                .flatten()
                .filter(|location| location.page == peer && location.header.slot != slot as u8)
                .map(|location| record_len::<T>(location.header.size as usize))
                .sum::<usize>();
        }
        let start = state.pages[active].fill.max(Self::records_start());
        let fits = !state.pages[active].corrupt && start + needed <= self.page_size;

        let result = if fits {
            self.write_in_place(&mut state, header, data)
        } else {
            self.relocate(&mut state, (header, data))
        };
        self.state = Some(state);
        result
    }

    fn capacity(&self, slot: Slot) -> usize {
        self.layout.reservation(slot)
    }

    fn image_vitality(&mut self, slot: Slot) -> Result<(), Error> {
        let state = self.mounted(slot)?;
        match state.records[slot as usize] {
            None => Err(state.failure()),
            Some(_) if state.pages.iter().any(|page| page.corrupt) => {
                Err(Error::StorageImageUncertain)
            }
            Some(_) => Ok(()),
        }
    }
}

impl<T: Platform> PagedStore<T> {
    fn write_in_place(
        &mut self,
        state: &mut PagedState,
        header: RecordHeader,
        data: &[u8],
    ) -> Result<(), Error> {
        let active = state.active;
        let peer = active ^ 1;
        if state.pages[active].sequence.is_none() {
            let sequence = state.next_sequence();
            self.write_page_header(active, sequence)?;
            state.pages[active] = Page {
                sequence: Some(sequence),
                fill: Self::records_start(),
                corrupt: false,
            };
        }
        self.append(state, active, header, data)?;
        if state.pages[peer].is_dirty() {
            self.release_peer(state)?;
        }
        Ok(())
    }
}
