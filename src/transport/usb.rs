//! Bulk-transfer transport trait.
//!
//! # Example
//!
//! ```ignore
//! use jensen_client::transport::UsbTransport;
//!
//! transport.open().await?;
//! transport.select_configuration(1).await?;
//! transport.claim_interface(0).await?;
//! transport.write(DEFAULT_OUT_ENDPOINT, &frame).await?;
//! let bytes = transport.read(DEFAULT_IN_ENDPOINT, 51200).await?;
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;

/// Endpoint carrying command frames to the device.
pub const DEFAULT_OUT_ENDPOINT: u8 = 0x01;

/// Endpoint carrying responses and streamed data from the device.
pub const DEFAULT_IN_ENDPOINT: u8 = 0x02;

/// Failures reported by a transport backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Handle was closed or the device was unplugged.
    #[error("device disconnected")]
    Disconnected,

    /// Operation attempted before `open`.
    #[error("device not open")]
    NotOpen,

    /// Endpoint stalled.
    #[error("endpoint {0:#04x} stalled")]
    Stall(u8),

    /// Fewer bytes written than requested.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Narrow USB capability set used by the session.
///
/// Methods take `&self`: the reader task and the engine task share one
/// handle through an `Arc`, each using a different endpoint.
#[async_trait]
pub trait UsbTransport: Send + Sync + 'static {
    /// USB vendor id from the device descriptor.
    fn vendor_id(&self) -> u16;

    /// USB product id from the device descriptor.
    fn product_id(&self) -> u16;

    /// Open the device handle.
    async fn open(&self) -> Result<(), TransportError>;

    /// Select a configuration value.
    async fn select_configuration(&self, configuration: u8) -> Result<(), TransportError>;

    /// Claim an interface.
    async fn claim_interface(&self, interface: u8) -> Result<(), TransportError>;

    /// Bulk OUT transfer. Returns bytes written.
    async fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError>;

    /// Bulk IN transfer of at most `max_len` bytes.
    async fn read(&self, endpoint: u8, max_len: usize) -> Result<Bytes, TransportError>;

    /// Release the handle. Pending reads fail with `Disconnected`.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the underlying handle is still open. Polled by the health monitor.
    fn is_open(&self) -> bool;

    /// Open-state channel that flips to `false` when the device goes away.
    ///
    /// Backends with hotplug events return a receiver so the health monitor
    /// reacts without waiting for its next poll. The default is `None` and
    /// leaves detection to [`is_open`](Self::is_open).
    fn open_state(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}
