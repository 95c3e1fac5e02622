//! Transport module - the bulk-transfer capability the session depends on.
//!
//! The session owns exactly one [`UsbTransport`]. Nothing else reads from or
//! writes to it. Real backends (WebUSB, libusb, nusb, ...) live outside this
//! crate; [`MockTransport`] is an in-memory device for tests and demos.

mod mock;
mod usb;

pub use mock::{MockResponder, MockTransport};
pub use usb::{TransportError, UsbTransport, DEFAULT_IN_ENDPOINT, DEFAULT_OUT_ENDPOINT};
