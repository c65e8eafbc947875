use strum::FromRepr;
use thiserror::Error;

/// High half of a pseudo abort code. The low half carries [`Error::code`].
pub const PSEUDO_ABORT_PREFIX: u32 = 0x1010_0000;

/// Errors returned by every layer of the registry. Each variant has a stable, negative `i16` code
/// that is persisted in `sys-cmd` replies and transported inside pseudo abort codes, so variants are
/// only ever appended.
///
/// Some variants are statuses rather than failures: [`Error::ParameterContentChange`] and the
/// revision changes are returned from [`crate::Registry::init`] while the registry stays usable.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
#[repr(i16)]
pub enum Error {
    /// Fallback for codes that are not known to this build
    #[error("unknown error")]
    Unknown = -128,

    /// An index does not address an entry of the table, a slot or a field
    #[error("index out of boundary")]
    IndexOutOfBoundary,

    #[error("value below limit")]
    BelowLimit,

    #[error("value above limit")]
    AboveLimit,

    /// Rejected by a callback or an unknown command
    #[error("value invalid")]
    ValueInvalid,

    #[error("value unavailable")]
    ValueUnavailable,

    /// The registry was used before [`crate::Registry::init`]
    #[error("not initialized")]
    NotInitialized,

    #[error("function unavailable")]
    FunctionUnavailable,

    #[error("address not accessible")]
    AddressNotAccessible,

    /// A remote request did not complete in time
    #[error("timeout")]
    Timeout,

    /// A save is pending or a remote request is still running
    #[error("resource busy")]
    ResourceBusy,

    #[error("buffer too small")]
    BufferTooSmall,

    /// The store has not been mounted
    #[error("storage not initialized")]
    StorageNotInitialized,

    /// The slot layout does not match the slot enumeration
    #[error("storage enum mismatch")]
    StorageEnumMismatch,

    /// A persisted record failed its CRC check
    #[error("storage crc mismatch")]
    StorageCrcMismatch,

    /// The device is too small for the configured slot layout
    #[error("storage nvmem too small")]
    StorageNvmemTooSmall,

    /// The slot tag of a persisted record does not match the requested slot
    #[error("storage index mismatch")]
    StorageIndexMismatch,

    /// A blob exceeds the reservation of its slot
    #[error("storage data too big")]
    StorageDataTooBig,

    /// The flash device reported an I/O error
    #[error("storage not accessible")]
    StorageNotAccessible,

    /// Nothing has been written to the slot yet
    #[error("storage data unavailable")]
    StorageDataUnavailable,

    /// A valid copy exists but the peer copy is stale or corrupt
    #[error("storage image uncertain")]
    StorageImageUncertain,

    #[error("parameter storage missing")]
    ParameterStorageMissing,

    #[error("parameter write protected")]
    ParameterWriteProtected,

    #[error("parameter access denied")]
    ParameterAccessDenied,

    /// The descriptor may be shown, the value must not
    #[error("parameter hidden")]
    ParameterHidden,

    /// Two access secrets share the same value
    #[error("parameter key collision")]
    ParameterKeyCollision,

    #[error("parameter enum mismatch")]
    ParameterEnumMismatch,

    /// Persisted records were skipped or did not match the current table
    #[error("parameter content change")]
    ParameterContentChange,

    #[error("parameter minor revision change")]
    ParameterRevMinorChange,

    /// The persisted image was written by an incompatible table revision
    #[error("parameter major revision change")]
    ParameterRevMajorChange,

    #[error("parameter index mismatch")]
    ParameterIndexMismatch,

    /// The persisted image is not a whole number of records
    #[error("parameter entries mismatch")]
    ParameterEntriesMismatch,

    /// A remote peer aborted or did not answer a request
    #[error("sdo connection failed")]
    SdoConnectionFailed,
}

impl Error {
    /// Stable numeric code of this error.
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Maps a numeric code back to its error, falling back to [`Error::Unknown`].
    pub fn from_code(code: i16) -> Self {
        Self::from_repr(code).unwrap_or(Self::Unknown)
    }

    /// `0x1010_xxxx` container used to carry the code through a transport abort.
    pub const fn abort_code(self) -> u32 {
        PSEUDO_ABORT_PREFIX | (self.code() as u16 as u32)
    }

    /// Reverses [`Error::abort_code`]. Genuine transport aborts are reported as
    /// [`Error::SdoConnectionFailed`].
    pub fn from_abort_code(abort_code: u32) -> Self {
        if abort_code & 0xFFFF_0000 == PSEUDO_ABORT_PREFIX {
            Self::from_code(abort_code as u16 as i16)
        } else {
            Self::SdoConnectionFailed
        }
    }

    /// Statuses of [`crate::Registry::init`] that leave the registry fully usable.
    pub const fn is_table_drift(self) -> bool {
        matches!(
            self,
            Self::ParameterContentChange
                | Self::ParameterRevMinorChange
                | Self::ParameterRevMajorChange
        )
    }
}
