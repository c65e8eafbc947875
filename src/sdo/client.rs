use super::{
    ABORT, COMMAND_MASK, DOWNLOAD_CONFIRM, EXPEDITED, Field, Frame, INITIATE_DOWNLOAD,
    INITIATE_UPLOAD, LAST_SEGMENT, SEGMENT_RESPONSE, SEGMENT_SIZE, SIZE_INDICATED, TOGGLE,
    UPLOAD_SEGMENT, address, frame, frame_address, frame_data,
};
use crate::error::Error;
use crate::table::{Flags, Index};
use crate::unit::{Representation, Unit};
use alloc::vec::Vec;

#[cfg(feature = "defmt")]
use defmt::{trace, warn};

pub const DEFAULT_TIMEOUT_MS: u16 = 1000;

/// Outgoing CAN frames.
pub trait Transport {
    /// `false` while the transmit path cannot take a frame.
    fn is_available(&mut self) -> bool;

    fn send(&mut self, node_id: u8, frame: &Frame) -> Result<(), Error>;
}

impl<T: Transport> Transport for &mut T {
    fn is_available(&mut self) -> bool {
        (*self).is_available()
    }

    fn send(&mut self, node_id: u8, frame: &Frame) -> Result<(), Error> {
        (*self).send(node_id, frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transfer {
    ExpeditedRead,
    ExpeditedWrite,
    SegmentedRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    Busy(Transfer),
    Success,
    Fail,
}

/// Data of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Up to four bytes, little-endian
    Expedited { data: [u8; 4], len: u8 },
    Segmented(Vec<u8>),
    Written,
}

impl Response {
    /// Zero extended value of an expedited response.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Expedited { data, .. } => Some(u32::from_le_bytes(*data)),
            _ => None,
        }
    }

    /// Sign extended value of an expedited response.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Expedited { data, len: 1 } => Some(data[0] as i8 as i32),
            Self::Expedited { data, len: 2 } => Some(i16::from_le_bytes([data[0], data[1]]) as i32),
            Self::Expedited { data, .. } => Some(i32::from_le_bytes(data)),
            _ => None,
        }
    }

    /// Text of a segmented response without the trailing NUL.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Segmented(bytes) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                core::str::from_utf8(&bytes[..end]).ok()
            }
            _ => None,
        }
    }
}

/// Unpacked `PROPERTY` field of a remote parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub unit: Unit,
    pub repr: Representation,
    pub flags: Flags,
}

impl Property {
    /// `None` if unit or representation are unknown to this build.
    pub fn from_word(word: u32) -> Option<Self> {
        Some(Self {
            unit: Unit::from_repr((word >> 24) as u8)?,
            repr: Representation::from_repr((word >> 16) as u8)?,
            flags: Flags::from_bits_retain(word as u16),
        })
    }
}

/// One outstanding SDO request towards a peer node. Incoming frames are fed through
/// [`SdoClient::on_frame`], time through [`SdoClient::tick_1ms`].
pub struct SdoClient<T: Transport> {
    transport: T,
    timeout_ms: u16,
    remaining_ms: u16,
    state: State,

    node_id: u8,
    dict_index: u16,
    sub_index: u8,

    // segmented read
    segmenting: bool,
    toggle: u8,
    capacity: usize,
    data: Vec<u8>,

    response: Option<Response>,
    abort_code: Option<u32>,
}

impl<T: Transport> SdoClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timeout(transport, DEFAULT_TIMEOUT_MS)
    }

    pub fn with_timeout(transport: T, timeout_ms: u16) -> Self {
        Self {
            transport,
            timeout_ms,
            remaining_ms: 0,
            state: State::Idle,
            node_id: 0,
            dict_index: 0,
            sub_index: 0,
            segmenting: false,
            toggle: 0,
            capacity: 0,
            data: Vec::new(),
            response: None,
            abort_code: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, State::Busy(_))
    }

    /// Abort code of the last failed request, `None` after a timeout.
    pub fn abort_code(&self) -> Option<u32> {
        self.abort_code
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn expedited_read(
        &mut self,
        node_id: u8,
        dict_index: u16,
        sub_index: u8,
    ) -> Result<(), Error> {
        self.start(Transfer::ExpeditedRead, node_id, dict_index, sub_index, 4)?;
        self.send(frame(INITIATE_UPLOAD, dict_index, sub_index, [0; 4]))
    }

    /// Writes one to four bytes.
    pub fn expedited_write(
        &mut self,
        node_id: u8,
        dict_index: u16,
        sub_index: u8,
        data: &[u8],
    ) -> Result<(), Error> {
        if data.is_empty() || data.len() > 4 {
            return Err(Error::BufferTooSmall);
        }
        self.start(Transfer::ExpeditedWrite, node_id, dict_index, sub_index, 0)?;

        let mut payload = [0u8; 4];
        payload[..data.len()].copy_from_slice(data);
        let unused = (4 - data.len()) as u8;
        let command = INITIATE_DOWNLOAD | (unused << 2) | EXPEDITED | SIZE_INDICATED;
        self.send(frame(command, dict_index, sub_index, payload))
    }

    /// Reads at most `capacity` bytes. The peer may answer expedited or segmented.
    pub fn segmented_read(
        &mut self,
        node_id: u8,
        dict_index: u16,
        sub_index: u8,
        capacity: usize,
    ) -> Result<(), Error> {
        self.start(Transfer::SegmentedRead, node_id, dict_index, sub_index, capacity)?;
        self.send(frame(INITIATE_UPLOAD, dict_index, sub_index, [0; 4]))
    }

    /// Reads a field of a peer's parameter, segmented for `NAME` and `INFO`.
    pub fn read_parameter(
        &mut self,
        node_id: u8,
        index: Index,
        field: Field,
        capacity: usize,
    ) -> Result<(), Error> {
        let (dict_index, sub_index) = address(index, field);
        if field.is_segmented() {
            self.segmented_read(node_id, dict_index, sub_index, capacity)
        } else {
            self.expedited_read(node_id, dict_index, sub_index)
        }
    }

    pub fn write_parameter(&mut self, node_id: u8, index: Index, value: i32) -> Result<(), Error> {
        let (dict_index, sub_index) = address(index, Field::Value);
        self.expedited_write(node_id, dict_index, sub_index, &value.to_le_bytes())
    }

    /// Outcome of the finished request, `None` while busy or idle. The client is idle afterwards.
    pub fn take_response(&mut self) -> Option<Result<Response, Error>> {
        let result = match self.state {
            State::Idle | State::Busy(_) => return None,
            State::Fail => Err(self
                .abort_code
                .map_or(Error::Timeout, Error::from_abort_code)),
            State::Success => self.response.take().ok_or(Error::ValueUnavailable),
        };
        self.state = State::Idle;
        Some(result)
    }

    /// Advances the request timeout by one millisecond.
    pub fn tick_1ms(&mut self) {
        if !self.is_busy() {
            return;
        }
        self.remaining_ms = self.remaining_ms.saturating_sub(1);
        if self.remaining_ms == 0 {
            #[cfg(feature = "defmt")]
            warn!("sdo: request to node {} timed out", self.node_id);

            self.abort_code = None;
            self.state = State::Fail;
        }
    }

    /// Handles a frame received from `node_id`. Frames that do not belong to the running request
    /// are ignored.
    pub fn on_frame(&mut self, node_id: u8, received: &Frame) {
        let State::Busy(transfer) = self.state else {
            return;
        };
        if node_id != self.node_id {
            return;
        }

        let command = received[0];
        let own_address = frame_address(received) == (self.dict_index, self.sub_index);
        if command == ABORT {
            if own_address {
                self.abort_code = Some(frame_data(received));
                self.state = State::Fail;
            }
            return;
        }

        let result = if self.segmenting {
            match command & COMMAND_MASK {
                SEGMENT_RESPONSE => self.take_segment(command, received),
                _ => Err(Error::ValueInvalid),
            }
        } else {
            if !own_address {
                return;
            }
            match (transfer, command & COMMAND_MASK) {
                (Transfer::ExpeditedWrite, DOWNLOAD_CONFIRM) => Ok(Some(Response::Written)),
                (Transfer::ExpeditedRead | Transfer::SegmentedRead, INITIATE_UPLOAD)
                    if command & EXPEDITED != 0 =>
                {
                    self.take_expedited(transfer, command, received)
                }
                (Transfer::SegmentedRead, INITIATE_UPLOAD) => {
                    self.begin_segments(command, received)
                }
                _ => Err(Error::ValueInvalid),
            }
        };

        match result {
            Ok(Some(response)) => {
                self.response = Some(response);
                self.state = State::Success;
            }
            Ok(None) => self.remaining_ms = self.timeout_ms,
            Err(e) => {
                #[cfg(feature = "defmt")]
                warn!("sdo: response {=u8:#x} failed: {}", command, e);

                self.abort_code = Some(e.abort_code());
                self.state = State::Fail;
            }
        }
    }

    fn take_expedited(
        &mut self,
        transfer: Transfer,
        command: u8,
        received: &Frame,
    ) -> Result<Option<Response>, Error> {
        let len = if command & SIZE_INDICATED != 0 {
            4 - ((command >> 2) & 0x3)
        } else {
            4
        };
        let mut data = [0u8; 4];
        data[..len as usize].copy_from_slice(&received[4..4 + len as usize]);

        match transfer {
            Transfer::SegmentedRead if len as usize > self.capacity => Err(Error::BufferTooSmall),
            Transfer::SegmentedRead => Ok(Some(Response::Segmented(data[..len as usize].to_vec()))),
            _ => Ok(Some(Response::Expedited { data, len })),
        }
    }

    fn begin_segments(&mut self, command: u8, received: &Frame) -> Result<Option<Response>, Error> {
        if command & SIZE_INDICATED != 0 && frame_data(received) as usize > self.capacity {
            return Err(Error::BufferTooSmall);
        }
        self.segmenting = true;
        self.toggle = 0;
        self.request_segment()?;
        Ok(None)
    }

    fn take_segment(&mut self, command: u8, received: &Frame) -> Result<Option<Response>, Error> {
        if command & TOGGLE != self.toggle {
            return Err(Error::ValueInvalid);
        }
        let n = SEGMENT_SIZE - ((command >> 1) & 0x7) as usize;
        if self.data.len() + n > self.capacity {
            return Err(Error::BufferTooSmall);
        }
        self.data.extend_from_slice(&received[1..1 + n]);

        if command & LAST_SEGMENT != 0 {
            self.segmenting = false;
            return Ok(Some(Response::Segmented(core::mem::take(&mut self.data))));
        }
        self.toggle ^= TOGGLE;
        self.request_segment()?;
        Ok(None)
    }

    fn request_segment(&mut self) -> Result<(), Error> {
        let mut request = [0u8; 8];
        request[0] = UPLOAD_SEGMENT | self.toggle;
        self.send(request)
    }

    fn start(
        &mut self,
        transfer: Transfer,
        node_id: u8,
        dict_index: u16,
        sub_index: u8,
        capacity: usize,
    ) -> Result<(), Error> {
        if self.is_busy() || !self.transport.is_available() {
            return Err(Error::ResourceBusy);
        }

        #[cfg(feature = "defmt")]
        trace!(
            "sdo: {} node {} {=u16:#x}.{=u8:#x}",
            transfer, node_id, dict_index, sub_index
        );

        self.state = State::Busy(transfer);
        self.node_id = node_id;
        self.dict_index = dict_index;
        self.sub_index = sub_index;
        self.segmenting = false;
        self.toggle = 0;
        self.capacity = capacity;
        self.data.clear();
        self.response = None;
        self.abort_code = None;
        self.remaining_ms = self.timeout_ms;
        Ok(())
    }

    fn send(&mut self, request: Frame) -> Result<(), Error> {
        let result = self.transport.send(self.node_id, &request);
        if let Err(e) = result {
            self.abort_code = Some(e.abort_code());
            self.state = State::Fail;
        }
        result
    }
}
