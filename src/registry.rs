use crate::config::{Config, Revision};
use crate::error::Error;
use crate::image::{self, Lockstep, Record};
use crate::storage::{Slot, Storage};
use crate::system::{self, Command};
use crate::table::{Call, Callback, Entry, Flags, Handler, Index, IndexRange, Table};
use alloc::vec;
use alloc::vec::Vec;

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Source of persistent values on [`Registry::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Load {
    /// Values from the NV image where available
    Stored,
    /// Nominal values, except for entries flagged [`Flags::PERS`]
    Defaults,
}

/// Copy of an entry descriptor as returned by [`Registry::read_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub entry: Entry,
    /// The current session may label the entry but must not show its value
    pub hidden: bool,
}

impl Descriptor {
    /// [`Error::ParameterHidden`] for hidden entries.
    pub fn status(&self) -> Result<(), Error> {
        if self.hidden {
            Err(Error::ParameterHidden)
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct Outcome {
    content_changed: bool,
    major: bool,
    minor: bool,
}

impl Outcome {
    fn status(&self) -> Result<(), Error> {
        if self.major {
            Err(Error::ParameterRevMajorChange)
        } else if self.content_changed {
            Err(Error::ParameterContentChange)
        } else if self.minor {
            Err(Error::ParameterRevMinorChange)
        } else {
            Ok(())
        }
    }
}

/// Runtime mirror of a parameter table: one `i32` cell per entry, the access level of the current
/// session and the pending save.
///
/// ```
/// # use param_registry::{Registry, Load, Config};
/// # use param_registry::config::Revision;
/// # use param_registry::storage::{Slot, Storage};
/// # use param_registry::system::{self, SYSTEM_ENTRY_COUNT};
/// # use param_registry::table::{Entry, Flags, Table};
/// # use param_registry::unit::{Representation, Unit};
/// # use param_registry::error::Error;
/// # struct Ram(Vec<u8>);
/// # impl Storage for Ram {
/// #     fn read(&mut self, _: Slot, _: &mut [u8]) -> Result<usize, Error> {
/// #         Err(Error::StorageDataUnavailable)
/// #     }
/// #     fn write(&mut self, _: Slot, data: &[u8]) -> Result<(), Error> {
/// #         self.0 = data.to_vec();
/// #         Ok(())
/// #     }
/// #     fn image_vitality(&mut self, _: Slot) -> Result<(), Error> { Ok(()) }
/// #     fn capacity(&self, _: Slot) -> usize { 256 }
/// # }
/// static SYSTEM: [Entry; SYSTEM_ENTRY_COUNT] = system::entries(Revision::new(1, 0));
/// static APP: [Entry; 1] = [Entry::new(
///     "x",
///     Unit::None,
///     Representation::Dec,
///     Flags::R_W.union(Flags::NVMEM),
///     0,
///     10,
///     100,
/// )];
///
/// let table = Table::new(&SYSTEM, &APP).unwrap();
/// let mut registry = Registry::new(table, Ram(Vec::new()), Config::default()).unwrap();
/// assert_eq!(registry.init(Load::Stored), Err(Error::StorageDataUnavailable));
///
/// registry.write_value(0, 42).unwrap();
/// registry.save().unwrap();
/// registry.task().unwrap();
/// ```
pub struct Registry<'t, S: Storage> {
    table: Table<'t>,
    storage: S,
    config: Config,
    cells: Vec<i32>,
    table_crc: u32,
    initialized: bool,

    access_level: u8,
    access_secret: u32,

    save_pending: bool,
    init_status: Result<(), Error>,
    task_status: Result<(), Error>,

    serial_number: Option<Callback>,
}

impl<'t, S: Storage> Registry<'t, S> {
    /// The registry is unusable until [`Registry::init`] ran.
    pub fn new(table: Table<'t>, storage: S, config: Config) -> Result<Self, Error> {
        config.secrets.validate()?;

        Ok(Self {
            table,
            storage,
            config,
            cells: vec![0; table.len()],
            table_crc: table.crc(),
            initialized: false,
            access_level: 0,
            access_secret: 0,
            save_pending: false,
            init_status: Err(Error::NotInitialized),
            task_status: Ok(()),
            serial_number: None,
        })
    }

    /// Loads every cell and runs the `INIT` callbacks. The access level drops to 0 unless the
    /// stored `sys-key` holds the developer secret.
    ///
    /// The registry is usable afterwards no matter what is returned. The status is the most severe
    /// of: storage error, major revision change, content change, minor revision change. A major
    /// revision change reloads everything except [`Flags::PERS`] entries from defaults.
    pub fn init(&mut self, load: Load) -> Result<(), Error> {
        self.initialized = true;
        self.access_level = 0;
        self.access_secret = 0;
        self.table_crc = self.table.crc();

        let image = self.read_image();
        let records = image.as_deref().ok();

        let major =
            load == Load::Stored && records.is_some_and(|records| self.major_changed(records));
        if major {
            #[cfg(feature = "defmt")]
            warn!("init: incompatible parameter revision, loading defaults");
        }

        let mut outcome = self.apply(records, if major { Load::Defaults } else { load });
        outcome.major |= major;

        let status = match image {
            Ok(_) => outcome.status(),
            Err(e) => Err(e),
        };

        #[cfg(feature = "defmt")]
        trace!("init: {} -> {}", load, status);

        #[cfg(feature = "debug-logs")]
        println!("  registry: init {load:?} -> {status:?}");

        self.init_status = status;
        status
    }

    fn read_image(&mut self) -> Result<Vec<Record>, Error> {
        let mut buf = vec![0u8; self.storage.capacity(Slot::ParameterImage)];
        let len = self.storage.read(Slot::ParameterImage, &mut buf)?;
        image::decode(&buf[..len])
    }

    /// Whether the image was saved under another major revision than the `sys-info` entry holds.
    fn major_changed(&self, records: &[Record]) -> bool {
        let Some((index, entry)) = self
            .table
            .iter()
            .find(|(_, entry)| entry.handler == Some(Handler::SysInfo))
        else {
            return false;
        };
        records
            .iter()
            .find(|record| record.index == index && record.fingerprint == entry.fingerprint())
            .is_some_and(|record| {
                Revision::from_word(record.value).major != Revision::from_word(entry.nominal).major
            })
    }

    fn apply(&mut self, records: Option<&[Record]>, load: Load) -> Outcome {
        let mut lockstep = records.map(Lockstep::new);
        let mut outcome = Outcome::default();

        for (index, entry) in self.table.iter() {
            let mut cell = entry.nominal;
            if let Some(lockstep) = lockstep.as_mut() {
                let wanted = load == Load::Stored || entry.flags.contains(Flags::PERS);
                if entry.is_persistent() && wanted {
                    if let Some(value) = lockstep.lookup(index, entry.fingerprint()) {
                        cell = clamp(entry, value);
                    }
                }
            }

            match self.invoke(entry, Call::Init, &mut cell) {
                Ok(()) => {}
                Err(Error::ParameterRevMajorChange) => outcome.major = true,
                Err(Error::ParameterRevMinorChange) => outcome.minor = true,
                Err(_e) => {
                    #[cfg(feature = "defmt")]
                    warn!("init: callback of {} failed: {}", entry.name, _e);
                }
            }
            let slot = self.table.slot_of(index);
            self.cells[slot] = clamp(entry, cell);
        }

        // a defaults load skips records on purpose
        outcome.content_changed =
            load == Load::Stored && lockstep.is_some_and(|lockstep| lockstep.content_changed());
        outcome
    }

    /// Requests a save. The image is written by the next [`Registry::task`]; until then writes are
    /// rejected with [`Error::ResourceBusy`].
    pub fn save(&mut self) -> Result<(), Error> {
        self.ensure_initialized()?;
        if self.save_pending {
            return Err(Error::ResourceBusy);
        }
        self.save_pending = true;
        Ok(())
    }

    /// Idle work, to be called from the main loop. Writes the NV image if a save is pending and
    /// returns the result of that write.
    pub fn task(&mut self) -> Result<(), Error> {
        if !self.save_pending {
            return Ok(());
        }

        let result = self.write_image();
        self.save_pending = false;
        self.task_status = result;

        #[cfg(feature = "defmt")]
        trace!("task: save -> {}", result);

        #[cfg(feature = "debug-logs")]
        println!("  registry: save -> {result:?}");

        result
    }

    fn write_image(&mut self) -> Result<(), Error> {
        let mut records = Vec::new();
        for (index, entry) in self.table.iter() {
            if !entry.is_persistent() {
                continue;
            }
            let slot = self.table.slot_of(index);
            let mut cell = self.cells[slot];
            if let Err(_e) = self.invoke(entry, Call::Save, &mut cell) {
                #[cfg(feature = "defmt")]
                warn!("save: callback of {} failed: {}", entry.name, _e);
            }
            let cell = clamp(entry, cell);
            self.cells[slot] = cell;
            records.push(Record {
                value: cell,
                index,
                fingerprint: entry.fingerprint(),
            });
        }
        self.storage
            .write(Slot::ParameterImage, &image::encode(&records))
    }

    /// Checks access, write permission and limits, then lets the callback accept or substitute the
    /// value. Nothing changes if any step fails.
    pub fn write_value(&mut self, index: Index, value: i32) -> Result<(), Error> {
        if self.save_pending {
            return Err(Error::ResourceBusy);
        }
        self.ensure_initialized()?;

        let entry = self.table.entry(index)?;
        if !self.is_accessible(entry) {
            return Err(Error::ParameterAccessDenied);
        }
        if !entry.is_writable() {
            return Err(Error::ParameterWriteProtected);
        }
        if value < entry.minimum {
            return Err(Error::BelowLimit);
        }
        if value > entry.maximum {
            return Err(Error::AboveLimit);
        }

        let mut candidate = value;
        self.invoke(entry, Call::Write, &mut candidate)?;
        let slot = self.table.slot_of(index);
        self.cells[slot] = clamp(entry, candidate);
        Ok(())
    }

    /// Current value. Hidden entries are denied before their callback runs.
    pub fn read_value(&mut self, index: Index) -> Result<i32, Error> {
        self.ensure_initialized()?;

        let entry = self.table.entry(index)?;
        if self.is_hidden(entry) {
            return Err(Error::ParameterAccessDenied);
        }

        let slot = self.table.slot_of(index);
        let mut cell = self.cells[slot];
        self.invoke(entry, Call::Read, &mut cell)?;
        let cell = clamp(entry, cell);
        self.cells[slot] = cell;
        Ok(cell)
    }

    /// Like [`Registry::read_value`] but returns 0 on any error.
    pub fn get_value(&mut self, index: Index) -> i32 {
        self.read_value(index).unwrap_or(0)
    }

    pub fn read_data(&self, index: Index) -> Result<Descriptor, Error> {
        let entry = self.table.entry(index)?;
        Ok(Descriptor {
            entry: *entry,
            hidden: self.is_hidden(entry),
        })
    }

    pub fn is_writable(&self, index: Index) -> bool {
        self.table
            .entry(index)
            .is_ok_and(|entry| self.is_accessible(entry) && entry.is_writable())
    }

    pub fn help(&self, index: Index) -> Result<&'t str, Error> {
        Ok(self.table.entry(index)?.help)
    }

    pub fn index_exists(&self, index: Index) -> bool {
        self.table.entry(index).is_ok()
    }

    pub fn index_range(&self) -> IndexRange {
        self.table.index_range()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Index> {
        self.table.find_by_name(name)
    }

    pub fn table(&self) -> &Table<'t> {
        &self.table
    }

    pub fn table_crc(&self) -> u32 {
        self.table_crc
    }

    pub fn access_level(&self) -> u8 {
        self.access_level
    }

    pub fn is_developer(&self) -> bool {
        self.access_level >= 4
    }

    /// Result of the last [`Registry::init`], also reported by `sys-cmd` 4.
    pub fn init_status(&self) -> Result<(), Error> {
        self.init_status
    }

    /// Result of the last image write, also reported by `sys-cmd` 5.
    pub fn task_status(&self) -> Result<(), Error> {
        self.task_status
    }

    pub fn is_save_pending(&self) -> bool {
        self.save_pending
    }

    /// Value of the `SN` entry read through its callback, 0 if the table has none.
    pub fn serial_number(&mut self) -> i32 {
        match self.find_by_name(system::SERIAL_NUMBER) {
            Some(index) => self.get_value(index),
            None => 0,
        }
    }

    /// Callback for the `SN` entry, e.g. to read the serial number from OTP memory.
    pub fn set_serial_number_callback(&mut self, callback: Callback) {
        self.serial_number = Some(callback);
    }

    pub fn storage(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn ensure_initialized(&self) -> Result<(), Error> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn is_accessible(&self, entry: &Entry) -> bool {
        self.access_level >= entry.level()
    }

    fn is_hidden(&self, entry: &Entry) -> bool {
        !self.is_accessible(entry) && entry.flags.contains(Flags::HIDE)
    }

    fn invoke(&mut self, entry: &Entry, call: Call, cell: &mut i32) -> Result<(), Error> {
        match entry.handler {
            None => Ok(()),
            Some(Handler::Function(callback)) => callback(call, cell),
            Some(Handler::SerialNumber) => match self.serial_number {
                Some(callback) => callback(call, cell),
                None => Ok(()),
            },
            Some(Handler::SysInfo) => sys_info(entry, call, cell),
            Some(Handler::SysKey) => {
                self.sys_key(call, cell);
                Ok(())
            }
            Some(Handler::SysCmd) => self.sys_cmd(call, cell),
        }
    }

    fn sys_key(&mut self, call: Call, cell: &mut i32) {
        match call {
            Call::Init | Call::Write => {
                let key = *cell as u32;
                self.access_level = self.config.secrets.level_of(key);
                self.access_secret = if self.access_level > 0 { key } else { 0 };

                #[cfg(feature = "defmt")]
                trace!("sys-key: access level {}", self.access_level);

                *cell = self.access_level as i32;
            }
            // only a developer session keeps its secret across a reboot
            Call::Save => {
                *cell = if self.is_developer() {
                    self.access_secret as i32
                } else {
                    0
                };
            }
            Call::Read => *cell = self.access_level as i32,
        }
    }

    fn sys_cmd(&mut self, call: Call, cell: &mut i32) -> Result<(), Error> {
        match call {
            Call::Write => match Command::from_repr(*cell) {
                Some(Command::Save) => self.save(),
                Some(Command::Init) => self.init(Load::Stored),
                Some(Command::LoadDefaults) if self.access_level >= 3 => {
                    self.init(Load::Defaults)
                }
                Some(Command::LoadDefaults) => Err(Error::ParameterAccessDenied),
                Some(Command::InitStatus) => self.init_status,
                Some(Command::TaskStatus) => self.task_status,
                None => Err(Error::ValueInvalid),
            },
            Call::Read => {
                *cell = self.table_crc as i32;
                Ok(())
            }
            Call::Init | Call::Save => Ok(()),
        }
    }
}

fn sys_info(entry: &Entry, call: Call, cell: &mut i32) -> Result<(), Error> {
    if call != Call::Init {
        return Ok(());
    }
    let stored = Revision::from_word(*cell);
    let current = Revision::from_word(entry.nominal);
    *cell = entry.nominal;

    if stored.major != current.major {
        Err(Error::ParameterRevMajorChange)
    } else if stored.minor != current.minor {
        Err(Error::ParameterRevMinorChange)
    } else {
        Ok(())
    }
}

fn clamp(entry: &Entry, value: i32) -> i32 {
    value.max(entry.minimum).min(entry.maximum)
}
