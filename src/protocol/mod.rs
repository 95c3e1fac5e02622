//! Protocol module - wire format, framing, and the command table.
//!
//! This module implements the binary framing used on the bulk endpoints:
//! - 12-byte header encoding/decoding
//! - Frame codec (`encode_frame` / `try_decode`)
//! - Frame buffer for accumulating partial reads
//! - Closed command identifier table

mod command;
mod frame;
mod frame_buffer;
mod wire_format;

pub use command::Command;
pub use frame::{encode_frame, try_decode, Decoded, Message};
pub use frame_buffer::{Drained, FrameBuffer, DEFAULT_BUFFER_CAPACITY};
pub use wire_format::{Header, HEADER_SIZE, MAX_BODY_LENGTH, SYNC_MARKER};
