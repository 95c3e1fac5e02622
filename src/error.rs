//! Error types for jensen-client.

use thiserror::Error;

use crate::device::DeviceModel;
use crate::protocol::Command;
use crate::transport::TransportError;

/// Main error type for all device operations.
#[derive(Debug, Error)]
pub enum JensenError {
    /// Bulk read/write failed or the device went away.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Sync marker mismatch or corrupt length. The receive buffer has been discarded.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// A response body could not be interpreted.
    #[error("Malformed {command:?} response: {reason}")]
    MalformedResponse {
        /// Command whose response failed to decode.
        command: Command,
        /// What was wrong with the body.
        reason: String,
    },

    /// Operation is not available for this model/firmware. Resolved without contacting the device.
    #[error("{operation} is not supported on {model} firmware {firmware}")]
    Unsupported {
        /// Operation name.
        operation: &'static str,
        /// Connected model.
        model: DeviceModel,
        /// Firmware version string.
        firmware: String,
    },

    /// Operation was cancelled because the session closed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Session is no longer running.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No reply where one is mandatory (connect handshake).
    #[error("No response to {command:?}")]
    Timeout {
        /// Command that went unanswered.
        command: Command,
    },

    /// A streaming transfer stopped before all bytes were moved.
    #[error("Transfer of {file_name} failed after {received} of {expected} bytes: {reason}")]
    TransferFailed {
        /// Recording or image name.
        file_name: String,
        /// Bytes moved before the failure.
        received: u64,
        /// Bytes the transfer was expected to move.
        expected: u64,
        /// What stopped it.
        reason: String,
    },

    /// Caller supplied a value the wire format cannot carry.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl JensenError {
    pub(crate) fn malformed(command: Command, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            command,
            reason: reason.into(),
        }
    }
}

/// Result type alias using JensenError.
pub type Result<T> = std::result::Result<T, JensenError>;
