//! Mandatory system parameters. [`entries`] builds the standard system half; firmware that needs a
//! different order or additional system entries can combine the individual constructors with its
//! own entries, the registry finds them by their handler and not by position.

use crate::config::Revision;
use crate::table::{Entry, Flags, Handler};
use crate::unit::{Representation, Unit};
use strum::FromRepr;

pub const SERIAL_NUMBER: &str = "SN";
pub const SYS_INFO: &str = "sys-info";
pub const SYS_KEY: &str = "sys-key";
pub const SYS_CMD: &str = "sys-cmd";

pub const SYSTEM_ENTRY_COUNT: usize = 4;

const SYS_CMD_HELP: &str = "System commands:\n\
1: Save parameter\n\
2: Initialize parameter\n\
3: Load default parameter\n\
4: Parameter init status\n\
5: Parameter task status\n\
Read-back value represents table CRC";

/// Values accepted by `sys-cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i32)]
pub enum Command {
    Save = 1,
    Init = 2,
    LoadDefaults = 3,
    InitStatus = 4,
    TaskStatus = 5,
}

/// Standard system half: index -1 `SN`, -2 `sys-info`, -3 `sys-key`, -4 `sys-cmd`.
///
/// ```
/// use param_registry::config::Revision;
/// use param_registry::system::{self, SYSTEM_ENTRY_COUNT};
/// use param_registry::table::Entry;
///
/// static SYSTEM: [Entry; SYSTEM_ENTRY_COUNT] = system::entries(Revision::new(1, 0));
/// ```
pub const fn entries(revision: Revision) -> [Entry; SYSTEM_ENTRY_COUNT] {
    [serial_number(), info(revision), key(), command()]
}

pub const fn serial_number() -> Entry {
    Entry::new(
        SERIAL_NUMBER,
        Unit::None,
        Representation::Hex08,
        Flags::LEVEL_3
            .union(Flags::R_W)
            .union(Flags::NVMEM)
            .union(Flags::PERS),
        i32::MIN,
        0,
        i32::MAX,
    )
    .with_help("Serial number")
    .with_handler(Handler::SerialNumber)
}

/// Read-only revision word, persisted so that the next boot can detect a table change.
pub const fn info(revision: Revision) -> Entry {
    Entry::new(
        SYS_INFO,
        Unit::None,
        Representation::Hex,
        Flags::LEVEL_0.union(Flags::NVMEM),
        i32::MIN,
        revision.to_word(),
        i32::MAX,
    )
    .with_help("Parameter revision (major << 16 | minor)")
    .with_handler(Handler::SysInfo)
}

/// Access key. Reads back the current level; only the developer secret survives a save.
pub const fn key() -> Entry {
    Entry::new(
        SYS_KEY,
        Unit::None,
        Representation::Dec,
        Flags::LEVEL_0.union(Flags::R_W).union(Flags::NVMEM),
        i32::MIN,
        0,
        i32::MAX,
    )
    .with_help("Access key, reads back the access level")
    .with_handler(Handler::SysKey)
}

pub const fn command() -> Entry {
    Entry::new(
        SYS_CMD,
        Unit::None,
        Representation::Hex,
        Flags::LEVEL_0.union(Flags::R_W),
        i32::MIN,
        0,
        i32::MAX,
    )
    .with_help(SYS_CMD_HELP)
    .with_handler(Handler::SysCmd)
}
