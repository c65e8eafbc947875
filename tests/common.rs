#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use param_registry::config::Revision;
use param_registry::storage::{PagedStore, Slot, SlotLayout};
use param_registry::system::{self, SYSTEM_ENTRY_COUNT};
use param_registry::table::{Call, Entry, Flags, Table};
use param_registry::unit::{Representation, Unit};
use param_registry::{Config, Registry};

pub const FLASH_SECTOR_SIZE: usize = 256;
pub const WORD_SIZE: usize = 4;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Copy of the flash content with an empty operation log and no faults.
    pub fn snapshot(&self) -> Self {
        Self {
            buf: self.buf.clone(),
            fail_after_operation: usize::MAX,
            operations: Vec::new(),
        }
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
    }

    /// Lets the next `count` operations pass and fails the rest.
    pub fn fail_after(&mut self, count: usize) {
        self.fail_after_operation = self.operations.len() + count;
    }

    /// Clears bits at `offset`, the way a torn write would.
    pub fn damage(&mut self, offset: usize) {
        self.buf[offset] &= 0x5A;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));
        assert!(!bytes.is_empty());

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl param_registry::platform::Crc for Flash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

pub const REVISION: Revision = Revision::new(1, 3);

pub static SYSTEM: [Entry; SYSTEM_ENTRY_COUNT] = system::entries(REVISION);

fn reject_odd(call: Call, cell: &mut i32) -> Result<(), param_registry::Error> {
    if call == Call::Write && *cell % 2 != 0 {
        return Err(param_registry::Error::ValueInvalid);
    }
    Ok(())
}

fn live_counter(call: Call, cell: &mut i32) -> Result<(), param_registry::Error> {
    if call == Call::Read {
        *cell += 1;
    }
    Ok(())
}

/// Application half used by most tests, index 0 to 5.
pub static APP: [Entry; 6] = app();

pub const fn app() -> [Entry; 6] {
    [
        Entry::new(
            "f-pwm",
            Unit::KiloHertz,
            Representation::Dec,
            Flags::LEVEL_0.union(Flags::R_W).union(Flags::NVMEM),
            1,
            20,
            100,
        )
        .with_help("PWM frequency"),
        Entry::new(
            "u-max",
            Unit::MilliVolt,
            Representation::Dec,
            Flags::LEVEL_2.union(Flags::R_W).union(Flags::NVMEM),
            0,
            5000,
            12000,
        ),
        Entry::new(
            "secret",
            Unit::None,
            Representation::Hex08,
            Flags::LEVEL_3
                .union(Flags::HIDE)
                .union(Flags::R_W)
                .union(Flags::NVMEM),
            i32::MIN,
            0x1234,
            i32::MAX,
        ),
        Entry::new(
            "fw-build",
            Unit::None,
            Representation::Dec,
            Flags::R_O,
            0,
            77,
            1000,
        ),
        Entry::new(
            "even",
            Unit::None,
            Representation::Dec,
            Flags::R_W.union(Flags::NVMEM),
            -100,
            0,
            100,
        )
        .with_callback(reject_odd),
        Entry::new(
            "ticks",
            Unit::None,
            Representation::DecUnsigned,
            Flags::R_W,
            0,
            0,
            i32::MAX,
        )
        .with_callback(live_counter),
    ]
}

pub const F_PWM: i16 = 0;
pub const U_MAX: i16 = 1;
pub const SECRET: i16 = 2;
pub const FW_BUILD: i16 = 3;
pub const EVEN: i16 = 4;
pub const TICKS: i16 = 5;

pub const SN: i16 = -1;
pub const SYS_INFO: i16 = -2;
pub const SYS_KEY: i16 = -3;
pub const SYS_CMD: i16 = -4;

pub const PARAMETER_LAYOUT: SlotLayout = SlotLayout::new().with(Slot::ParameterImage, 128);

pub type TestRegistry = Registry<'static, PagedStore<Flash>>;

pub fn registry_with(system: &'static [Entry], app: &'static [Entry], flash: Flash) -> TestRegistry {
    let table = Table::new(system, app).unwrap();
    let mut store = PagedStore::new(flash, 0, FLASH_SECTOR_SIZE, PARAMETER_LAYOUT).unwrap();
    store.mount().unwrap();
    Registry::new(table, store, Config::default()).unwrap()
}

pub fn registry(flash: Flash) -> TestRegistry {
    registry_with(&SYSTEM, &APP, flash)
}

/// Power cycle: the flash content survives, everything else is rebuilt.
pub fn reboot(registry: TestRegistry) -> TestRegistry {
    let mut flash = registry.into_storage().into_inner();
    flash.disable_faults();
    self::registry(flash)
}
