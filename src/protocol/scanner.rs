//! Frame scanner for accumulating partial reads.
//!
//! The receive path appends raw socket bytes with [`FrameScanner::push`] and
//! gets back every complete message the buffer now holds. Partial frames stay
//! buffered for the next push; bytes ahead of a start marker are garbage and
//! are dropped together with the frame that follows them.
//!
//! Three conditions are fatal and make the connection unusable:
//! an unknown message type tag, a wrong end marker after a complete
//! length-delimited body, and a buffer that outgrows [`MAX_BUFFER_LEN`]
//! without yielding a frame (the peer is not speaking this protocol).

use bytes::{Buf, BytesMut};

use super::wire::{
    END_MARKER, FRAME_OVERHEAD, MAX_BUFFER_LEN, PAYLOAD_OFFSET, START_MARKER,
};
use super::{read_u16, read_u32, Message, MessageType};
use crate::error::{ClientError, Result};

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct FrameScanner {
    buffer: BytesMut,
}

impl FrameScanner {
    /// Create an empty scanner.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Push received data and extract all complete messages.
    ///
    /// Returns an empty vector while more bytes are needed.
    ///
    /// # Errors
    ///
    /// Any error is a fatal protocol violation; the caller must tear the
    /// connection down.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_one()? {
            messages.push(message);
        }

        if messages.is_empty() && self.buffer.len() > MAX_BUFFER_LEN {
            return Err(ClientError::Protocol(format!(
                "no parseable frame in {} buffered bytes; peer is not a telemetry server",
                self.buffer.len()
            )));
        }

        Ok(messages)
    }

    /// Try to extract a single message from the front of the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete frame yet.
    fn try_extract_one(&mut self) -> Result<Option<Message>> {
        // Everything before the first start marker can never begin a frame.
        let start = match self.buffer.iter().position(|&b| b == START_MARKER) {
            Some(at) => at,
            None => return Ok(None),
        };
        let frame = &self.buffer[start..];

        // Message type tag.
        if frame.len() < 3 {
            return Ok(None);
        }
        let tag = read_u16(frame, 1);
        let message_type = MessageType::from_tag(tag).ok_or_else(|| {
            ClientError::Protocol(format!("unknown message type tag {tag}"))
        })?;

        // Request id.
        if frame.len() < 7 {
            return Ok(None);
        }
        let request_id = read_u32(frame, 3);

        // Payload length, then the payload itself and the end marker.
        if frame.len() < PAYLOAD_OFFSET {
            return Ok(None);
        }
        let payload_len = read_u16(frame, 7) as usize;
        if frame.len() < FRAME_OVERHEAD + payload_len {
            return Ok(None);
        }
        let terminator = frame[PAYLOAD_OFFSET + payload_len];
        if terminator != END_MARKER {
            // The body is complete, so waiting for more bytes can never
            // repair this frame.
            return Err(ClientError::Protocol(format!(
                "expected end marker after {payload_len}-byte payload, got {terminator:#04x}"
            )));
        }

        let payload =
            BytesMut::from(&frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len]);
        self.buffer.advance(start + FRAME_OVERHEAD + payload_len);

        Ok(Some(Message::from_parts(message_type, request_id, payload)))
    }

    /// Number of buffered bytes still awaiting a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}
