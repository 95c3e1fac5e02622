//! Handler module - response decoding and multi-frame accumulation.
//!
//! Provides:
//! - [`HandlerRegistry`] - routes each inbound body to its decoder
//! - [`decode`](self::decode) - fixed-layout decoders for single-frame replies
//! - [`FileListAccumulator`] - incremental recording list parser
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use jensen_client::handler::{HandlerRegistry, Outcome, Response, ResponseKind, Step};
//! use jensen_client::protocol::Command;
//!
//! let mut registry = HandlerRegistry::new();
//! let step = registry.decode(
//!     Command::DeleteFile,
//!     &Bytes::from_static(&[0x02]),
//!     &mut ResponseKind::Single,
//! );
//! assert!(matches!(step, Step::Done(Ok(Response::Ack(Outcome::NotExists)))));
//! ```

pub mod decode;
mod file_list;
mod registry;

pub use decode::{
    BluetoothDevice, BluetoothStatus, CardInfo, DeviceInfo, DeviceSettings, DeviceTime, Outcome,
    RecordingState, Response, SettingsUpdate,
};
pub use file_list::{
    decode_file_list, parse_filename_timestamp, recording_duration, FileListAccumulator,
    RecordingEntry,
};
pub use registry::{HandlerRegistry, ResponseKind, Step};
