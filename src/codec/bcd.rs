//! Packed BCD codec.
//!
//! Each byte carries two decimal digits, high nibble first. Device clocks
//! travel as 7 bytes: `YYYY MM DD hh mm ss`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Length of an encoded timestamp.
pub const BCD_TIMESTAMP_LEN: usize = 7;

/// Packed binary-coded decimal codec.
pub struct Bcd;

impl Bcd {
    /// Pack a string of decimal digits. Odd-length input gets a leading zero.
    ///
    /// Returns `None` if any character is not an ASCII digit.
    pub fn encode_digits(digits: &str) -> Option<Vec<u8>> {
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{digits}")
        } else {
            digits.to_string()
        };
        Some(
            padded
                .as_bytes()
                .chunks(2)
                .map(|pair| ((pair[0] - b'0') << 4) | (pair[1] - b'0'))
                .collect(),
        )
    }

    /// Unpack bytes into a digit string.
    ///
    /// Nibbles above 9 are rendered as hex digits; callers validate the
    /// result when they need a number.
    pub fn decode_digits(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Encode a timestamp as 7 BCD bytes.
    pub fn encode_timestamp(time: &NaiveDateTime) -> [u8; BCD_TIMESTAMP_LEN] {
        let digits = format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            time.year().clamp(0, 9999),
            time.month(),
            time.day(),
            time.hour(),
            time.minute(),
            time.second()
        );
        let mut out = [0u8; BCD_TIMESTAMP_LEN];
        if let Some(packed) = Self::encode_digits(&digits) {
            out.copy_from_slice(&packed[..BCD_TIMESTAMP_LEN]);
        }
        out
    }

    /// Decode 7 BCD bytes into a timestamp.
    ///
    /// Returns `None` for short input, the all-zero "unset" clock, or a
    /// date that does not exist.
    pub fn decode_timestamp(bytes: &[u8]) -> Option<NaiveDateTime> {
        let bytes = bytes.get(..BCD_TIMESTAMP_LEN)?;
        if bytes.iter().all(|&b| b == 0) {
            return None;
        }
        let digits = Self::decode_digits(bytes);
        let field = |range: std::ops::Range<usize>| digits.get(range)?.parse::<u32>().ok();

        NaiveDate::from_ymd_opt(field(0..4)? as i32, field(4..6)?, field(6..8)?)?.and_hms_opt(
            field(8..10)?,
            field(10..12)?,
            field(12..14)?,
        )
    }
}
