//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` as a rolling buffer. Bytes are appended as they
//! arrive; [`FrameBuffer::drain`] repeatedly runs [`try_decode`] at the
//! buffer head and compacts consumed bytes out.
//!
//! # Example
//!
//! ```
//! use jensen_client::protocol::{encode_frame, FrameBuffer};
//!
//! let bytes = encode_frame(1, 1, b"hello");
//! let mut buffer = FrameBuffer::new();
//!
//! buffer.extend(&bytes[..7]);
//! assert!(buffer.drain().messages.is_empty());
//!
//! buffer.extend(&bytes[7..]);
//! let drained = buffer.drain();
//! assert!(drained.error.is_none());
//! let messages = drained.messages;
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].body(), b"hello");
//! ```

use bytes::BytesMut;

use super::frame::{try_decode, Decoded, Message};
use super::wire_format::{Header, MAX_BODY_LENGTH};
use crate::error::{JensenError, Result};

/// Default initial capacity of the receive buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Everything one [`FrameBuffer::drain`] pass produced.
///
/// Messages decoded before a sync loss are kept; `error` reports the loss.
#[derive(Debug, Default)]
pub struct Drained {
    pub messages: Vec<Message>,
    pub error: Option<JensenError>,
}

impl Drained {
    /// Treat a sync loss as failing the whole pass.
    pub fn into_result(self) -> Result<Vec<Message>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.messages),
        }
    }
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Largest body accepted before the stream is treated as corrupt.
    max_body_length: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting any 24-bit body length.
    pub fn new() -> Self {
        Self::with_max_body(MAX_BODY_LENGTH)
    }

    /// Create a new frame buffer with a custom body length limit.
    pub fn with_max_body(max_body_length: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            max_body_length,
        }
    }

    /// Append data to the buffer without extracting messages.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract every complete message currently buffered.
    ///
    /// Stops at the first incomplete frame, leaving it buffered. On sync loss
    /// or an oversize length the remaining bytes are discarded and the
    /// `InvalidFrame` error is returned next to the messages decoded before it.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();

        loop {
            if let Err(e) = self.check_length() {
                self.clear();
                drained.error = Some(e);
                return drained;
            }

            match try_decode(&self.buffer, 0) {
                Ok(Decoded::Message(message, consumed)) => {
                    let _ = self.buffer.split_to(consumed);
                    drained.messages.push(message);
                }
                Ok(Decoded::NeedMoreData) => return drained,
                Err(e) => {
                    self.clear();
                    drained.error = Some(e);
                    return drained;
                }
            }
        }
    }

    /// Append data and extract all complete messages in one call.
    ///
    /// Strict form of [`drain`](Self::drain): any sync loss fails the call.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.extend(data);
        self.drain().into_result()
    }

    fn check_length(&self) -> Result<()> {
        if let Ok(Some(header)) = Header::decode(&self.buffer) {
            if header.body_length > self.max_body_length {
                return Err(JensenError::InvalidFrame(format!(
                    "body length {} exceeds maximum {}",
                    header.body_length, self.max_body_length
                )));
            }
        }
        Ok(())
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
