use crate::crc::{crc16, crc32};
use crate::error::Error;
use crate::unit::{Representation, Unit};
use bitflags::bitflags;
use core::cmp::Ordering;
use strum::FromRepr;

bitflags! {
    /// Access and persistence attributes of an entry. The lowest three bits hold the access level
    /// required to see or change the value, see [`Flags::level`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u16 {
        const LEVEL_0 = 0x00;
        const LEVEL_1 = 0x01;
        const LEVEL_2 = 0x02;
        const LEVEL_3 = 0x03;
        const LEVEL_4 = 0x04;
        const LEVEL_MASK = 0x07;
        /// Hide the value from sessions below the entry level
        const HIDE = 0x08;
        /// Read-only is the absence of this flag
        const R_W = 0x10;
        /// Part of the NV image
        const NVMEM = 0x20;
        /// Shown in info listings
        const INFO = 0x40;
        /// Loaded from the NV image even when defaults are requested
        const PERS = 0x80;
    }
}

impl Flags {
    pub const R_O: Self = Self::empty();

    pub const fn level(self) -> u8 {
        (self.bits() & Self::LEVEL_MASK.bits()) as u8
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Flags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Flags({=u16:#x})", self.bits())
    }
}

/// Reason a callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Call {
    /// Once per [`crate::Registry::init`], after the cell was loaded from NV or nominal
    Init,
    /// On every read-through, the callback may substitute a live value
    Read,
    /// Before a written value is committed, an error rejects it
    Write,
    /// Right before the cell is serialized into the NV image
    Save,
}

/// Application effect handler of an entry. The cell is passed by reference and may be changed.
pub type Callback = fn(call: Call, cell: &mut i32) -> Result<(), Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handler {
    Function(Callback),
    SysInfo,
    SysKey,
    SysCmd,
    SerialNumber,
}

/// Static descriptor of a parameter. Tables are usually `static` arrays built with the const
/// constructors:
///
/// ```
/// use param_registry::table::{Entry, Flags};
/// use param_registry::unit::{Representation, Unit};
///
/// static APP: [Entry; 1] = [Entry::new(
///     "f-pwm",
///     Unit::KiloHertz,
///     Representation::Dec,
///     Flags::LEVEL_1.union(Flags::R_W).union(Flags::NVMEM),
///     1,
///     20,
///     100,
/// )
/// .with_help("PWM frequency")];
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub name: &'static str,
    pub unit: Unit,
    pub repr: Representation,
    pub flags: Flags,
    pub minimum: i32,
    pub nominal: i32,
    pub maximum: i32,
    pub help: &'static str,
    pub(crate) handler: Option<Handler>,
}

impl Entry {
    pub const fn new(
        name: &'static str,
        unit: Unit,
        repr: Representation,
        flags: Flags,
        minimum: i32,
        nominal: i32,
        maximum: i32,
    ) -> Self {
        Self {
            name,
            unit,
            repr,
            flags,
            minimum,
            nominal,
            maximum,
            help: "",
            handler: None,
        }
    }

    pub const fn with_help(self, help: &'static str) -> Self {
        Self { help, ..self }
    }

    pub const fn with_callback(self, callback: Callback) -> Self {
        Self {
            handler: Some(Handler::Function(callback)),
            ..self
        }
    }

    pub(crate) const fn with_handler(self, handler: Handler) -> Self {
        Self {
            handler: Some(handler),
            ..self
        }
    }

    pub const fn level(&self) -> u8 {
        self.flags.level()
    }

    pub const fn is_writable(&self) -> bool {
        self.flags.contains(Flags::R_W)
    }

    pub const fn is_persistent(&self) -> bool {
        self.flags.contains(Flags::NVMEM)
    }

    pub fn has_callback(&self) -> bool {
        self.handler.is_some()
    }

    /// CRC-16 over name, unit and representation. Identifies the entry across table revisions;
    /// limits, flags and help may change without invalidating persisted values.
    pub fn fingerprint(&self) -> u16 {
        let crc = crc16(0, self.name.as_bytes());
        crc16(crc, &[self.unit as u8, self.repr as u8])
    }

    fn chain_crc32(&self, prev: u32) -> u32 {
        let mut crc = crc32(prev, self.name.as_bytes());
        crc = crc32(crc, &[self.unit as u8, self.repr as u8]);
        crc = crc32(crc, &self.flags.bits().to_le_bytes());
        crc = crc32(crc, &self.minimum.to_le_bytes());
        crc = crc32(crc, &self.nominal.to_le_bytes());
        crc32(crc, &self.maximum.to_le_bytes())
    }
}

/// Position of an entry in one of the two halves. System entries order before application
/// entries, matching the signed [`Index`] encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TableId {
    System(u16),
    App(u16),
}

impl TableId {
    pub const fn index(self) -> Index {
        match self {
            Self::System(position) => (-(position as i32) - 1) as Index,
            Self::App(position) => position as Index,
        }
    }

    pub const fn from_index(index: Index) -> Self {
        if index < 0 {
            Self::System((-(index as i32) - 1) as u16)
        } else {
            Self::App(index as u16)
        }
    }
}

impl Ord for TableId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index().cmp(&other.index())
    }
}

impl PartialOrd for TableId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Signed table index: negative values address the system half, the rest the application half.
pub type Index = i16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IndexRange {
    pub min: Index,
    pub max: Index,
}

impl IndexRange {
    pub const fn contains(&self, index: Index) -> bool {
        index >= self.min && index <= self.max
    }

    pub fn iter(&self) -> impl Iterator<Item = Index> + use<> {
        self.min..=self.max
    }

    /// Packed form used by the remote adaptor, `max << 16 | min`.
    pub const fn to_word(self) -> i32 {
        ((self.max as i32) << 16) | (self.min as u16 as i32)
    }

    pub const fn from_word(word: i32) -> Self {
        Self {
            min: word as i16,
            max: (word >> 16) as i16,
        }
    }
}

/// The two halves of the parameter table.
#[derive(Debug, Clone, Copy)]
pub struct Table<'t> {
    system: &'t [Entry],
    app: &'t [Entry],
}

impl<'t> Table<'t> {
    /// Both halves together must fit the signed 16-bit index.
    pub fn new(system: &'t [Entry], app: &'t [Entry]) -> Result<Self, Error> {
        if system.len() > i16::MAX as usize + 1 || app.len() > i16::MAX as usize + 1 {
            return Err(Error::IndexOutOfBoundary);
        }
        Ok(Self { system, app })
    }

    pub fn len(&self) -> usize {
        self.system.len() + self.app.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn system(&self) -> &'t [Entry] {
        self.system
    }

    pub fn app(&self) -> &'t [Entry] {
        self.app
    }

    pub fn index_range(&self) -> IndexRange {
        IndexRange {
            min: -(self.system.len() as i32) as Index,
            max: (self.app.len() as i32 - 1) as Index,
        }
    }

    pub fn entry(&self, index: Index) -> Result<&'t Entry, Error> {
        let entry = match TableId::from_index(index) {
            TableId::System(position) => self.system.get(position as usize),
            TableId::App(position) => self.app.get(position as usize),
        };
        entry.ok_or(Error::IndexOutOfBoundary)
    }

    /// Position of the entry's cell in a flat array holding the system half first.
    pub(crate) fn slot_of(&self, index: Index) -> usize {
        (self.system.len() as isize + index as isize) as usize
    }

    /// Entries in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (Index, &'t Entry)> + use<'t> {
        let range = self.index_range();
        self.system
            .iter()
            .rev()
            .chain(self.app.iter())
            .zip(range.iter())
            .map(|(entry, index)| (index, entry))
    }

    pub fn find_by_name(&self, name: &str) -> Option<Index> {
        self.iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(index, _)| index)
    }

    /// CRC-32 over every descriptor except its help text, in index order.
    pub fn crc(&self) -> u32 {
        self.iter()
            .fold(0, |crc, (_, entry)| entry.chain_crc32(crc))
    }
}
