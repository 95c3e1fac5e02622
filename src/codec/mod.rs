//! Codec module - helpers for the fixed binary body layouts.
//!
//! - [`Bcd`] - packed binary-coded decimal, used for device timestamps
//! - [`BodyReader`] - bounds-checked Big Endian cursor over a response body
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects.
//! Decoders never index a body directly; every read goes through
//! [`BodyReader`], which returns `None` instead of panicking on short input.
//!
//! # Example
//!
//! ```
//! use jensen_client::codec::{Bcd, BodyReader};
//!
//! assert_eq!(Bcd::encode_digits("2024").unwrap(), vec![0x20, 0x24]);
//!
//! let mut reader = BodyReader::new(&[0x00, 0x00, 0x01, 0x00]);
//! assert_eq!(reader.u32_be(), Some(256));
//! assert_eq!(reader.u8(), None);
//! ```

mod bcd;
mod reader;

pub use bcd::Bcd;
pub use reader::BodyReader;
pub(crate) use reader::device_text;
