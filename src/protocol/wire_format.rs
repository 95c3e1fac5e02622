//! Wire format encoding and decoding.
//!
//! Implements the 12-byte header format:
//! ```text
//! ┌──────────┬──────────┬──────────┬───────┬──────────┐
//! │ Sync     │ Command  │ Sequence │ Flags │ Body len │
//! │ 2 bytes  │ 2 bytes  │ 4 bytes  │ 1 byte│ 3 bytes  │
//! │ 0x12 0x34│ uint16 BE│ uint32 BE│       │ uint24 BE│
//! └──────────┴──────────┴──────────┴───────┴──────────┘
//! ```
//!
//! The body follows the header, then `flags` trailing checksum bytes.
//! All multi-byte integers are Big Endian.

use crate::error::{JensenError, Result};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Two-byte marker that starts every frame.
pub const SYNC_MARKER: [u8; 2] = [0x12, 0x34];

/// Largest body the 24-bit length field can describe.
pub const MAX_BODY_LENGTH: u32 = 0x00FF_FFFF;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Command identifier.
    pub command_id: u16,
    /// Per-session sequence number.
    pub sequence: u32,
    /// Checksum length selector (high byte of the length word).
    pub flags: u8,
    /// Body length in bytes (low 24 bits of the length word).
    pub body_length: u32,
}

impl Header {
    /// Create a new header. `body_length` is truncated to 24 bits.
    pub fn new(command_id: u16, sequence: u32, flags: u8, body_length: u32) -> Self {
        Self {
            command_id,
            sequence,
            flags,
            body_length: body_length & MAX_BODY_LENGTH,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use jensen_client::protocol::Header;
    ///
    /// let bytes = Header::new(6, 1, 0, 0).encode();
    /// assert_eq!(bytes, [0x12, 0x34, 0, 6, 0, 0, 0, 1, 0, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&SYNC_MARKER);
        buf[2..4].copy_from_slice(&self.command_id.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        let word = (u32::from(self.flags) << 24) | (self.body_length & MAX_BODY_LENGTH);
        buf[8..12].copy_from_slice(&word.to_be_bytes());
    }

    /// Decode a header from bytes (Big Endian).
    ///
    /// Returns `Ok(None)` if fewer than 12 bytes are available and
    /// `InvalidFrame` if the sync marker is missing.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() >= 2 && buf[0..2] != SYNC_MARKER {
            return Err(JensenError::InvalidFrame(format!(
                "expected sync marker 12 34, found {:02x} {:02x}",
                buf[0], buf[1]
            )));
        }
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let word = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        Ok(Some(Self {
            command_id: u16::from_be_bytes([buf[2], buf[3]]),
            sequence: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            flags: (word >> 24) as u8,
            body_length: word & MAX_BODY_LENGTH,
        }))
    }

    /// Number of trailing checksum bytes after the body.
    #[inline]
    pub fn checksum_length(&self) -> usize {
        self.flags as usize
    }

    /// Total bytes this frame occupies on the wire.
    #[inline]
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.body_length as usize + self.checksum_length()
    }
}
