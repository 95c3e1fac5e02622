//! Receive-side reassembly with a quiet-period debounce.
//!
//! USB bulk reads can split one logical message over several transfers.
//! Bytes are appended as they arrive and decoding waits until no new data
//! has arrived for the quiet period.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::protocol::{Drained, FrameBuffer};

/// Cancellable delayed deadline, re-armed on every call to [`arm`](Self::arm).
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Push the deadline out to `now + delay`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve at the deadline. Never resolves while disarmed.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// Rolling receive buffer plus quiet-period timer.
pub struct ReceiveAssembler {
    buffer: FrameBuffer,
    quiet: Debounce,
}

impl ReceiveAssembler {
    pub fn new(quiet_period: Duration, max_body_length: u32) -> Self {
        Self {
            buffer: FrameBuffer::with_max_body(max_body_length),
            quiet: Debounce::new(quiet_period),
        }
    }

    /// Append one transport read and re-arm the quiet timer.
    pub fn on_read(&mut self, data: &[u8], now: Instant) {
        self.buffer.extend(data);
        self.quiet.arm(now);
    }

    /// Resolves when the burst has settled.
    pub async fn settled(&self) {
        self.quiet.elapsed().await
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.quiet.is_armed()
    }

    /// Quiet period elapsed: decode everything complete in the buffer.
    ///
    /// When the pass reports `InvalidFrame` the rest of the buffer has
    /// already been discarded.
    pub fn flush(&mut self) -> Drained {
        self.quiet.cancel();
        self.buffer.drain()
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.quiet.cancel();
        self.buffer.clear();
    }
}
