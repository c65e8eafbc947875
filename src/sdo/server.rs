use super::{
    ABORT, COMMAND_MASK, DEVICE_TYPE_INDEX, DOWNLOAD_CONFIRM, EXPEDITED, FIRMWARE_VERSION_INDEX,
    Field, Frame, IDENTITY_INDEX, INITIATE_DOWNLOAD, INITIATE_UPLOAD, LAST_SEGMENT,
    PRODUCT_NAME_INDEX, SEGMENT_SIZE, SIZE_INDICATED, TOGGLE, UPLOAD_SEGMENT, decode_address,
    frame, frame_address, frame_data,
};
use crate::error::Error;
use crate::registry::Registry;
use crate::storage::Storage;
use crate::table::Index;
use alloc::vec::Vec;

#[cfg(feature = "defmt")]
use defmt::trace;

/// Device identification mirrored at the well-known dictionary indices `0x1000`, `0x1008`,
/// `0x100A` and `0x1018`. The serial number is read from the registry's `SN` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identity {
    pub product_name: &'static str,
    pub firmware_version: &'static str,
    pub device_type: u32,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision: u32,
}

/// Segmented read in progress.
struct Upload {
    data: Vec<u8>,
    offset: usize,
}

/// Answers SDO requests from the parameter table. Owns the cursor of the one segmented read that
/// may be in progress; a new upload request replaces it.
#[derive(Default)]
pub struct SdoServer {
    identity: Option<Identity>,
    upload: Option<Upload>,
}

impl SdoServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            upload: None,
        }
    }

    /// Whether a segmented read is waiting for its next segment request.
    pub fn is_uploading(&self) -> bool {
        self.upload.is_some()
    }

    /// Response to `request`, `None` if the request is not addressed to this server.
    pub fn handle<S: Storage>(
        &mut self,
        registry: &mut Registry<'_, S>,
        request: &Frame,
    ) -> Option<Frame> {
        let command = request[0];
        let (dict_index, sub_index) = frame_address(request);

        #[cfg(feature = "defmt")]
        trace!(
            "sdo: request {=u8:#x} {=u16:#x}.{=u8:#x}",
            command, dict_index, sub_index
        );

        match command & COMMAND_MASK {
            INITIATE_UPLOAD => self.initiate_upload(registry, dict_index, sub_index),
            UPLOAD_SEGMENT => self.upload_segment(command),
            INITIATE_DOWNLOAD => download(registry, request),
            _ => None,
        }
    }

    fn initiate_upload<S: Storage>(
        &mut self,
        registry: &mut Registry<'_, S>,
        dict_index: u16,
        sub_index: u8,
    ) -> Option<Frame> {
        self.upload = None;

        if let Some((index, selector)) = decode_address(dict_index, sub_index) {
            let field = Field::from_repr(selector)?;
            return Some(self.upload_field(registry, dict_index, sub_index, index, field));
        }

        let identity = self.identity?;
        match (dict_index, sub_index) {
            (DEVICE_TYPE_INDEX, 0) => Some(expedited(dict_index, sub_index, identity.device_type, 4)),
            (PRODUCT_NAME_INDEX, 0) => {
                Some(self.start_segmented(dict_index, sub_index, identity.product_name))
            }
            (FIRMWARE_VERSION_INDEX, 0) => {
                Some(self.start_segmented(dict_index, sub_index, identity.firmware_version))
            }
            (IDENTITY_INDEX, 0) => Some(expedited(dict_index, sub_index, 4, 1)),
            (IDENTITY_INDEX, 1) => Some(expedited(dict_index, sub_index, identity.vendor_id, 4)),
            (IDENTITY_INDEX, 2) => Some(expedited(dict_index, sub_index, identity.product_code, 4)),
            (IDENTITY_INDEX, 3) => Some(expedited(dict_index, sub_index, identity.revision, 4)),
            (IDENTITY_INDEX, 4) => {
                let serial = registry.serial_number() as u32;
                Some(expedited(dict_index, sub_index, serial, 4))
            }
            _ => None,
        }
    }

    fn upload_field<S: Storage>(
        &mut self,
        registry: &mut Registry<'_, S>,
        dict_index: u16,
        sub_index: u8,
        index: Index,
        field: Field,
    ) -> Frame {
        let range = registry.index_range();
        let (value, len) = match field {
            Field::IndexMin => (range.min as u16 as u32, 2),
            Field::IndexMax => (range.max as u16 as u32, 2),
            Field::IndexRange => (range.to_word() as u32, 4),
            Field::TableCrc => (registry.table_crc(), 4),
            Field::Value => match registry.read_value(index) {
                Ok(value) => (value as u32, 4),
                Err(e) => return abort(dict_index, sub_index, e),
            },
            _ => {
                // descriptors stay readable for hidden entries
                let entry = match registry.read_data(index) {
                    Ok(descriptor) => descriptor.entry,
                    Err(e) => return abort(dict_index, sub_index, e),
                };
                match field {
                    Field::Nominal => (entry.nominal as u32, 4),
                    Field::Minimum => (entry.minimum as u32, 4),
                    Field::Maximum => (entry.maximum as u32, 4),
                    Field::Unit => (entry.unit as u32, 1),
                    Field::Repr => (entry.repr as u32, 1),
                    Field::Flags => (entry.flags.bits() as u32, 2),
                    Field::Property => (
                        (entry.unit as u32) << 24
                            | (entry.repr as u32) << 16
                            | entry.flags.bits() as u32,
                        4,
                    ),
                    Field::Name => return self.start_segmented(dict_index, sub_index, entry.name),
                    _ => return self.start_segmented(dict_index, sub_index, entry.help),
                }
            }
        };
        expedited(dict_index, sub_index, value, len)
    }

    fn start_segmented(&mut self, dict_index: u16, sub_index: u8, text: &str) -> Frame {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(0);

        let len = data.len() as u32;
        self.upload = Some(Upload { data, offset: 0 });
        frame(
            INITIATE_UPLOAD | SIZE_INDICATED,
            dict_index,
            sub_index,
            len.to_le_bytes(),
        )
    }

    fn upload_segment(&mut self, command: u8) -> Option<Frame> {
        let upload = self.upload.as_mut()?;
        let remaining = &upload.data[upload.offset..];
        let n = remaining.len().min(SEGMENT_SIZE);

        let mut response = [0u8; 8];
        response[1..1 + n].copy_from_slice(&remaining[..n]);
        upload.offset += n;

        let last = upload.offset >= upload.data.len();
        response[0] = (command & TOGGLE) | (((SEGMENT_SIZE - n) as u8) << 1);
        if last {
            response[0] |= LAST_SEGMENT;
            self.upload = None;
        }
        Some(response)
    }
}

fn download<S: Storage>(registry: &mut Registry<'_, S>, request: &Frame) -> Option<Frame> {
    let (dict_index, sub_index) = frame_address(request);
    let (index, selector) = decode_address(dict_index, sub_index)?;
    // segmented downloads are not supported
    if request[0] & EXPEDITED == 0 {
        return None;
    }
    if Field::from_repr(selector) != Some(Field::Value) {
        return Some(abort(dict_index, sub_index, Error::ParameterWriteProtected));
    }

    let value = frame_data(request) as i32;
    match registry.write_value(index, value) {
        Ok(()) => Some(frame(DOWNLOAD_CONFIRM, dict_index, sub_index, [0; 4])),
        Err(e) => Some(abort(dict_index, sub_index, e)),
    }
}

fn expedited(dict_index: u16, sub_index: u8, value: u32, len: u8) -> Frame {
    let command = INITIATE_UPLOAD | ((4 - len) << 2) | EXPEDITED | SIZE_INDICATED;
    let mut data = value.to_le_bytes();
    data[len as usize..].fill(0);
    frame(command, dict_index, sub_index, data)
}

fn abort(dict_index: u16, sub_index: u8, error: Error) -> Frame {
    #[cfg(feature = "defmt")]
    trace!("sdo: abort {=u16:#x}.{=u8:#x}: {}", dict_index, sub_index, error);

    #[cfg(feature = "debug-logs")]
    println!("  sdo: abort 0x{dict_index:0>4x}.{sub_index}: {error:?}");

    frame(ABORT, dict_index, sub_index, error.abort_code().to_le_bytes())
}
