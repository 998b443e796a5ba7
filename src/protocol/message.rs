//! Protocol message with typed accessors.
//!
//! A [`Message`] is the in-memory form of one frame: type tag, request id and
//! payload. Requests are built with the chainable `with_*` appenders and
//! serialized with [`Message::encode`]; responses are reconstructed by the
//! frame scanner and read back with the typed payload readers.
//!
//! # Example
//!
//! ```
//! use ridewire::protocol::{Message, MessageType};
//!
//! let msg = Message::new(MessageType::GetStationState, 7)
//!     .with_i32(0)
//!     .with_i32(2);
//!
//! assert_eq!(msg.payload().len(), 8);
//! let frame = msg.encode();
//! assert_eq!(frame[0], b'N');
//! assert_eq!(frame[frame.len() - 1], b'L');
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire::{END_MARKER, FRAME_OVERHEAD, MAX_PAYLOAD_LEN, START_MARKER};
use super::read_i32;
use crate::error::{ClientError, Result};

/// Protocol message type tags.
///
/// Client requests and server replies share one tag space. The data layout of
/// each payload is fixed per tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// Keep-alive, no payload. Server replies with `Ok`.
    Idle = 0,
    /// Generic success reply, no payload.
    Ok = 1,
    /// Error reply; payload is a UTF-8 message.
    Error = 2,
    /// Request the application version. Server replies with `Version`.
    GetVersion = 3,
    /// Version reply; 4 bytes (major, minor, patch, build).
    Version = 4,
    /// Request common telemetry data. Server replies with `Telemetry`.
    GetTelemetry = 5,
    /// Telemetry reply; fixed 76-byte layout.
    Telemetry = 6,
    /// Request the coaster count. Server replies with `IntValue`.
    GetCoasterCount = 7,
    /// Generic number reply; one big-endian i32.
    IntValue = 8,
    /// Request a coaster name by index. Server replies with `String`.
    GetCoasterName = 9,
    /// Generic string reply; UTF-8 payload.
    String = 10,
    /// Request current coaster and nearest station. Server replies with
    /// `IntValuePair` (coaster index, station index).
    GetCurrentCoasterAndNearestStation = 11,
    /// Generic value-pair reply; two big-endian i32.
    IntValuePair = 12,
    /// Set the emergency stop; one bool byte.
    SetEmergencyStop = 13,
    /// Request a station's state; two i32 (coaster, station).
    GetStationState = 14,
    /// Station state reply; one i32 of bit flags.
    StationState = 15,
    /// Switch manual/automatic mode; two i32 + bool.
    SetManualMode = 16,
    /// Dispatch a train in manual mode; two i32.
    Dispatch = 17,
    /// Open/close gates in manual mode; two i32 + bool.
    SetGates = 18,
    /// Open/close harness in manual mode; two i32 + bool.
    SetHarness = 19,
    /// Raise/lower platform in manual mode; two i32 + bool.
    SetPlatform = 20,
    /// Lock/unlock flyer car in manual mode; two i32 + bool.
    SetFlyerCar = 21,
}

impl MessageType {
    /// Look up a type by its wire tag. Unknown tags are a protocol violation
    /// the scanner treats as fatal.
    pub fn from_tag(tag: u16) -> Option<Self> {
        Some(match tag {
            0 => Self::Idle,
            1 => Self::Ok,
            2 => Self::Error,
            3 => Self::GetVersion,
            4 => Self::Version,
            5 => Self::GetTelemetry,
            6 => Self::Telemetry,
            7 => Self::GetCoasterCount,
            8 => Self::IntValue,
            9 => Self::GetCoasterName,
            10 => Self::String,
            11 => Self::GetCurrentCoasterAndNearestStation,
            12 => Self::IntValuePair,
            13 => Self::SetEmergencyStop,
            14 => Self::GetStationState,
            15 => Self::StationState,
            16 => Self::SetManualMode,
            17 => Self::Dispatch,
            18 => Self::SetGates,
            19 => Self::SetHarness,
            20 => Self::SetPlatform,
            21 => Self::SetFlyerCar,
            _ => return None,
        })
    }

    /// The wire tag for this type.
    #[inline]
    pub fn tag(self) -> u16 {
        self as u16
    }
}

/// One protocol message: type, request id and payload.
///
/// Owned by the caller that built it or by the registry entry it was
/// delivered to; never shared. The payload always fits the unsigned 16-bit
/// length field (the appenders uphold this, request payloads are at most a
/// handful of bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: MessageType,
    request_id: u32,
    payload: BytesMut,
}

impl Message {
    /// Create a message with an empty payload.
    pub fn new(message_type: MessageType, request_id: u32) -> Self {
        Self {
            message_type,
            request_id,
            payload: BytesMut::new(),
        }
    }

    /// Reassemble a message from scanned frame parts.
    pub(crate) fn from_parts(message_type: MessageType, request_id: u32, payload: BytesMut) -> Self {
        Self {
            message_type,
            request_id,
            payload,
        }
    }

    /// Message type tag.
    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Request id assigned by the client and echoed by the server.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Raw payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Append a boolean as one byte (0/1).
    pub fn with_bool(mut self, value: bool) -> Self {
        self.payload.put_u8(u8::from(value));
        self
    }

    /// Append one unsigned byte.
    pub fn with_u8(mut self, value: u8) -> Self {
        self.payload.put_u8(value);
        self
    }

    /// Append one signed byte.
    pub fn with_i8(mut self, value: i8) -> Self {
        self.payload.put_i8(value);
        self
    }

    /// Append a big-endian u16.
    pub fn with_u16(mut self, value: u16) -> Self {
        self.payload.put_u16(value);
        self
    }

    /// Append a big-endian i16.
    pub fn with_i16(mut self, value: i16) -> Self {
        self.payload.put_i16(value);
        self
    }

    /// Append a big-endian u32.
    pub fn with_u32(mut self, value: u32) -> Self {
        self.payload.put_u32(value);
        self
    }

    /// Append a big-endian i32.
    pub fn with_i32(mut self, value: i32) -> Self {
        self.payload.put_i32(value);
        self
    }

    /// Append a big-endian f32.
    pub fn with_f32(mut self, value: f32) -> Self {
        self.payload.put_f32(value);
        self
    }

    /// Append a big-endian f64.
    pub fn with_f64(mut self, value: f64) -> Self {
        self.payload.put_f64(value);
        self
    }

    /// Append raw bytes as-is.
    pub fn with_bytes(mut self, value: &[u8]) -> Self {
        self.payload.extend_from_slice(value);
        self
    }

    /// Serialize to the wire frame, markers included.
    pub fn encode(&self) -> Bytes {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_LEN);
        let mut frame = BytesMut::with_capacity(FRAME_OVERHEAD + self.payload.len());
        frame.put_u8(START_MARKER);
        frame.put_u16(self.message_type.tag());
        frame.put_u32(self.request_id);
        frame.put_u16(self.payload.len() as u16);
        frame.extend_from_slice(&self.payload);
        frame.put_u8(END_MARKER);
        frame.freeze()
    }

    /// Read the payload as a UTF-8 string.
    ///
    /// Valid only for `String` and `Error` messages.
    pub fn as_string(&self) -> Result<String> {
        if self.message_type != MessageType::String && self.message_type != MessageType::Error {
            return Err(ClientError::InvalidPayloadType(self.message_type));
        }
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }

    /// Read the payload as one big-endian i32.
    ///
    /// Valid only for `IntValue` messages.
    pub fn as_i32(&self) -> Result<i32> {
        if self.message_type != MessageType::IntValue {
            return Err(ClientError::InvalidPayloadType(self.message_type));
        }
        if self.payload.len() < 4 {
            return Err(ClientError::Protocol(format!(
                "IntValue payload is {} bytes, expected 4",
                self.payload.len()
            )));
        }
        Ok(read_i32(&self.payload, 0))
    }

    /// Read the payload as two big-endian i32 values.
    ///
    /// Valid only for `IntValuePair` messages.
    pub fn as_int_pair(&self) -> Result<(i32, i32)> {
        if self.message_type != MessageType::IntValuePair {
            return Err(ClientError::InvalidPayloadType(self.message_type));
        }
        if self.payload.len() < 8 {
            return Err(ClientError::Protocol(format!(
                "IntValuePair payload is {} bytes, expected 8",
                self.payload.len()
            )));
        }
        Ok((read_i32(&self.payload, 0), read_i32(&self.payload, 4)))
    }
}
