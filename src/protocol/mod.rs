//! Protocol module - wire constants, message representation and framing.
//!
//! - Big-endian field readers and frame constants
//! - [`Message`] with builder-style payload appenders and typed readers
//! - [`FrameScanner`] for reassembling frames from a byte stream

mod message;
mod scanner;
mod wire;

pub use message::{Message, MessageType};
pub use scanner::FrameScanner;
pub use wire::{
    read_f32, read_f64, read_i16, read_i32, read_u16, read_u32, END_MARKER, FRAME_OVERHEAD,
    MAX_BUFFER_LEN, MAX_PAYLOAD_LEN, PAYLOAD_OFFSET, START_MARKER,
};
