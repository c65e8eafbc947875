use embedded_storage::nor_flash::NorFlash;

/// A flash device the stores can persist to. Any [`NorFlash`] qualifies once it implements [`Crc`],
/// which only needs an empty `impl` unless the chip has a faster CRC-32 than the software table.
///
/// ```ignore
/// impl param_registry::platform::Crc for MyFlash {}
/// ```
pub trait Platform: Crc + NorFlash {}

impl<T: Crc + NorFlash> Platform for T {}

pub type FnCrc32 = fn(prev: u32, data: &[u8]) -> u32;

/// CRC-32/ISO-HDLC, chainable through `prev` (0 to start). Overrides must stay bit-exact with
/// [`crate::crc::crc32`], otherwise images written by another build can no longer be read.
pub trait Crc {
    fn crc32(prev: u32, data: &[u8]) -> u32 {
        crate::crc::crc32(prev, data)
    }
}

impl<T: Crc> Crc for &mut T {
    fn crc32(prev: u32, data: &[u8]) -> u32 {
        T::crc32(prev, data)
    }
}

pub trait AlignedOps: Platform {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_ceil(size: usize) -> usize {
        align_ceil(size, Self::WRITE_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }

    fn align_erase_ceil(size: usize) -> usize {
        align_ceil(size, Self::ERASE_SIZE)
    }
}

#[inline(always)]
pub(crate) const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

/// The internal flash of an ESP chip persists through [`esp_storage::FlashStorage`] directly. The
/// ROM `crc32_le` chains through `prev` the same way the software table does.
#[cfg(feature = "esp")]
impl Crc for esp_storage::FlashStorage<'_> {
    fn crc32(prev: u32, data: &[u8]) -> u32 {
        esp_hal::rom::crc::crc32_le(prev, data)
    }
}
