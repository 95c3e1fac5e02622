//! Protocol messages and the frame codec.
//!
//! A [`Message`] is the decoded form of one frame: command id, sequence and
//! body. Checksum bytes are consumed but not kept.
//!
//! # Example
//!
//! ```
//! use jensen_client::protocol::{encode_frame, try_decode, Decoded};
//!
//! let bytes = encode_frame(6, 7, b"");
//! assert_eq!(bytes.len(), 12);
//!
//! match try_decode(&bytes, 0).unwrap() {
//!     Decoded::Message(message, consumed) => {
//!         assert_eq!(message.command_id, 6);
//!         assert_eq!(message.sequence, 7);
//!         assert_eq!(consumed, 12);
//!     }
//!     Decoded::NeedMoreData => unreachable!(),
//! }
//! ```

use bytes::Bytes;

use super::command::Command;
use super::wire_format::{Header, HEADER_SIZE};
use crate::error::Result;

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Command identifier.
    pub command_id: u16,
    /// Sequence number as sent by the device.
    pub sequence: u32,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(command_id: u16, sequence: u32, body: Bytes) -> Self {
        Self {
            command_id,
            sequence,
            body,
        }
    }

    /// Known command for this message, if any.
    #[inline]
    pub fn command(&self) -> Option<Command> {
        Command::from_id(self.command_id)
    }

    /// Get a reference to the body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete message and the number of bytes it occupied.
    Message(Message, usize),
    /// The buffer holds only part of a frame.
    NeedMoreData,
}

/// Encode a command frame as a single byte vector.
///
/// Allocates exactly `12 + body.len()` bytes. Outbound frames carry no
/// checksum. Bodies longer than 24 bits are rejected earlier by the
/// session.
pub fn encode_frame(command_id: u16, sequence: u32, body: &[u8]) -> Vec<u8> {
    let header = Header::new(command_id, sequence, 0, body.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

/// Try to decode one frame starting at `offset`.
///
/// Lengths are untrusted; nothing is indexed before the declared total has
/// been checked against the available bytes.
///
/// # Errors
///
/// `InvalidFrame` if the sync marker is absent at `offset`. The stream
/// cannot be resumed from this position.
pub fn try_decode(buffer: &[u8], offset: usize) -> Result<Decoded> {
    let available = buffer.get(offset..).unwrap_or_default();
    let header = match Header::decode(available)? {
        Some(header) => header,
        None => return Ok(Decoded::NeedMoreData),
    };

    let total = header.frame_length();
    if available.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    let body_end = HEADER_SIZE + header.body_length as usize;
    let body = Bytes::copy_from_slice(&available[HEADER_SIZE..body_end]);
    Ok(Decoded::Message(
        Message::new(header.command_id, header.sequence, body),
        total,
    ))
}
