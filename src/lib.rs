//! # jensen-client
//!
//! Async client for the Jensen USB protocol spoken by HiDock H1, H1E and P1
//! recorders.
//!
//! The crate is the protocol engine only. The USB backend is supplied by the
//! caller through the [`UsbTransport`](transport::UsbTransport) trait.
//!
//! ## Architecture
//!
//! - **Framing**: 12-byte header, Big Endian fields, optional trailing checksum
//! - **Engine**: one task owns the queue, the receive buffer and all decode state
//! - **Single-flight**: one command on the wire at a time, FIFO order
//! - **Gating**: model/firmware restrictions are checked before anything is sent
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jensen_client::DeviceSession;
//! use jensen_client::transport::MockTransport;
//!
//! #[tokio::main]
//! async fn main() -> jensen_client::Result<()> {
//!     let transport = Arc::new(MockTransport::new(0xAF0C));
//!     let session = DeviceSession::connect(transport).await?;
//!
//!     println!("{} firmware {}", session.identity().model, session.identity().firmware);
//!     if let Some(time) = session.device_time().await? {
//!         println!("device clock: {:?}", time.time);
//!     }
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod queue;
pub mod schedule;
pub mod transfer;
pub mod transport;

mod engine;
mod monitor;
mod session;

pub use config::SessionConfig;
pub use device::{Capability, CapabilityGate, DeviceIdentity, DeviceModel, FirmwareVersion};
pub use error::{JensenError, Result};
pub use handler::{Outcome, RecordingEntry, Response};
pub use monitor::DisconnectCallback;
pub use session::{DeviceSession, SessionBuilder};
pub use transfer::{ProgressSink, TransferProgress, TransferSummary};
