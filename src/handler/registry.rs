//! Response dispatch by command.
//!
//! The registry turns each inbound body for the in-flight operation into
//! either a final [`Response`] or [`Step::Continue`]. Dispatch is a closed
//! match over [`ResponseKind`] and [`Command`], so a command without a
//! decoder is a compile error rather than a silent drop.

use bytes::Bytes;

use super::decode::{decode_outcome, decode_single, Response};
use super::file_list::FileListAccumulator;
use crate::error::{JensenError, Result};
use crate::protocol::Command;
use crate::transfer::StreamingTransfer;

/// Outcome of feeding one frame to a handler.
#[derive(Debug)]
pub enum Step {
    /// More frames belong to this operation.
    Continue,
    /// The operation is finished.
    Done(Result<Response>),
}

/// How the response to an operation is shaped.
#[derive(Debug)]
pub enum ResponseKind {
    /// One frame, one decode.
    Single,
    /// Streamed listing. `total` is a count queried beforehand, if any.
    FileList { total: Option<u32> },
    /// Download or upload with progress reporting.
    Transfer(StreamingTransfer),
}

/// Per-session decode state.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    file_list: Option<FileListAccumulator>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one body belonging to the in-flight `command`.
    pub fn decode(&mut self, command: Command, body: &Bytes, kind: &mut ResponseKind) -> Step {
        match kind {
            ResponseKind::Single => Step::Done(decode_single(command, body)),
            ResponseKind::FileList { total } => {
                let accumulator = self
                    .file_list
                    .get_or_insert_with(|| FileListAccumulator::new(*total));
                if !accumulator.push(body) {
                    return Step::Continue;
                }
                let entries = self.file_list.take().map(FileListAccumulator::finish);
                Step::Done(Ok(Response::FileList(entries.unwrap_or_default())))
            }
            ResponseKind::Transfer(transfer) => match command {
                Command::TransferFile | Command::GetFileBlock => {
                    let chunk = (!body.is_empty()).then_some(body);
                    transfer.on_chunk(chunk)
                }
                Command::FirmwareUpload => match decode_outcome(command, body) {
                    Ok(outcome) => transfer.on_ack(outcome),
                    Err(err) => {
                        transfer.fail(err.to_string());
                        Step::Done(Err(err))
                    }
                },
                other => Step::Done(Err(JensenError::malformed(
                    other,
                    "command does not carry a transfer",
                ))),
            },
        }
    }

    /// Whether a multi-frame listing is partially accumulated.
    pub fn is_accumulating(&self) -> bool {
        self.file_list.is_some()
    }

    /// Drop partial state after the operation ended some other way.
    pub fn reset(&mut self) {
        self.file_list = None;
    }
}
