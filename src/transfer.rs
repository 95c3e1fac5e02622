//! Streaming file transfer.
//!
//! A download is one request answered by many frames under the same command
//! id. Bytes are counted against the expected length, every chunk is
//! reported to the progress sink, and the transfer completes once the count
//! reaches the expected length. Uploads send one body and complete on the
//! device's acknowledgement.
//!
//! A transfer reports exactly one terminal event: `Completed` or `Failed`.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::error::JensenError;
use crate::handler::{Outcome, Response, Step};

/// Progress notification delivered to the caller's sink.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferProgress {
    /// Downloaded bytes, in arrival order.
    Chunk {
        data: Bytes,
        received: u64,
        total: u64,
    },
    /// Upload body handed to the transport.
    Sent { sent: u64, total: u64 },
    Completed { bytes: u64 },
    Failed {
        received: u64,
        total: u64,
        reason: String,
    },
}

/// Receives progress for one transfer.
pub type ProgressSink = Box<dyn FnMut(TransferProgress) + Send>;

/// Result of a finished transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub file_name: String,
    pub bytes: u64,
    pub elapsed: Duration,
    /// Downloaded bytes, when the caller asked for them to be kept.
    pub data: Option<Bytes>,
}

/// Bookkeeping for one transfer.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub file_name: String,
    pub expected: u64,
    pub transferred: u64,
    pub started: Instant,
}

impl TransferState {
    fn new(file_name: impl Into<String>, expected: u64) -> Self {
        Self {
            file_name: file_name.into(),
            expected,
            transferred: 0,
            started: Instant::now(),
        }
    }
}

#[derive(Debug)]
enum Direction {
    Download { keep: Option<BytesMut> },
    Upload,
}

/// Accumulation and completion contract shared by every transfer variant.
pub struct StreamingTransfer {
    state: TransferState,
    direction: Direction,
    sink: Option<ProgressSink>,
    finished: bool,
}

impl fmt::Debug for StreamingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingTransfer")
            .field("state", &self.state)
            .field("direction", &self.direction)
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamingTransfer {
    /// Receive `expected` bytes of `file_name`.
    ///
    /// With `keep_data` the bytes are also collected into the summary.
    pub fn download(
        file_name: impl Into<String>,
        expected: u64,
        keep_data: bool,
        sink: Option<ProgressSink>,
    ) -> Self {
        let keep = keep_data.then(|| BytesMut::with_capacity(expected.min(1 << 24) as usize));
        Self {
            state: TransferState::new(file_name, expected),
            direction: Direction::Download { keep },
            sink,
            finished: false,
        }
    }

    /// Send `total` bytes as `file_name`.
    pub fn upload(file_name: impl Into<String>, total: u64, sink: Option<ProgressSink>) -> Self {
        Self {
            state: TransferState::new(file_name, total),
            direction: Direction::Upload,
            sink,
            finished: false,
        }
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn emit(&mut self, progress: TransferProgress) {
        if let Some(sink) = self.sink.as_mut() {
            sink(progress);
        }
    }

    /// Restart the clock when the request actually leaves.
    pub fn on_started(&mut self) {
        self.state.started = Instant::now();
    }

    /// Upload body written to the transport.
    pub fn on_sent(&mut self, sent: u64) {
        if self.finished {
            return;
        }
        self.state.transferred = sent;
        let total = self.state.expected;
        self.emit(TransferProgress::Sent { sent, total });
    }

    /// One downloaded frame. `None` is the device signalling failure.
    pub fn on_chunk(&mut self, chunk: Option<&Bytes>) -> Step {
        let Some(data) = chunk else {
            return Step::Done(Err(self.fail("device aborted the transfer")));
        };
        if self.finished {
            return Step::Continue;
        }

        self.state.transferred += data.len() as u64;
        if let Direction::Download { keep: Some(buffer) } = &mut self.direction {
            buffer.extend_from_slice(data);
        }
        let received = self.state.transferred;
        let total = self.state.expected;
        self.emit(TransferProgress::Chunk {
            data: data.clone(),
            received,
            total,
        });

        if received >= total {
            Step::Done(Ok(self.complete()))
        } else {
            Step::Continue
        }
    }

    /// Device acknowledgement of an upload.
    pub fn on_ack(&mut self, outcome: Outcome) -> Step {
        if outcome.is_success() {
            self.state.transferred = self.state.expected;
            Step::Done(Ok(self.complete()))
        } else {
            Step::Done(Err(self.fail(format!("device answered {outcome:?}"))))
        }
    }

    fn complete(&mut self) -> Response {
        self.finished = true;
        let bytes = self.state.transferred;
        self.emit(TransferProgress::Completed { bytes });

        let data = match &mut self.direction {
            Direction::Download { keep } => keep.take().map(BytesMut::freeze),
            Direction::Upload => None,
        };
        Response::Transfer(TransferSummary {
            file_name: self.state.file_name.clone(),
            bytes,
            elapsed: self.state.started.elapsed(),
            data,
        })
    }

    /// Mark the transfer failed and tell the sink. Only the first call reports.
    pub fn fail(&mut self, reason: impl Into<String>) -> JensenError {
        let reason = reason.into();
        let received = self.state.transferred;
        let total = self.state.expected;
        if !self.finished {
            self.finished = true;
            tracing::warn!(
                file = %self.state.file_name,
                received,
                total,
                %reason,
                "Transfer failed"
            );
            self.emit(TransferProgress::Failed {
                received,
                total,
                reason: reason.clone(),
            });
        }
        JensenError::TransferFailed {
            file_name: self.state.file_name.clone(),
            received,
            expected: total,
            reason,
        }
    }
}
