//! Recording list decoding.
//!
//! The device streams the listing over several frames under one command id.
//! [`FileListAccumulator`] parses entries as their bytes arrive so that the
//! running count can be compared against the announced total.
//!
//! Entry layout:
//!
//! ```text
//! [version:u8][name_len:u24 BE][name][length:u32 BE][reserved:6][signature:16]
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::codec::{device_text, BodyReader};

/// Marker that opens the first frame on firmware announcing its total.
const TOTAL_MARKER: [u8; 2] = [0xFF, 0xFF];
const TOTAL_PREFIX_LEN: usize = 6;
/// Bytes in an entry besides the name.
const ENTRY_FIXED_LEN: usize = 1 + 3 + 4 + 6 + 16;

/// One stored recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub name: String,
    /// Parsed from the file name. Entries without one never leave the decoder.
    pub created: Option<NaiveDateTime>,
    pub duration: Duration,
    /// Payload length in bytes.
    pub length: u32,
    /// Codec/version tag.
    pub version: u8,
    pub signature: [u8; 16],
}

impl RecordingEntry {
    /// Signature as lowercase hex.
    pub fn signature_hex(&self) -> String {
        self.signature.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Playback length for a payload of `length` bytes recorded with codec `version`.
///
/// Unknown tags yield zero.
pub fn recording_duration(version: u8, length: u32) -> Duration {
    const WAV_HEADER: u32 = 44;
    let seconds = match version {
        0 => length as f64 / 32_000.0,
        1 => length as f64 / 16_000.0,
        2 => length.saturating_sub(WAV_HEADER) as f64 / 96_000.0,
        3 => length.saturating_sub(WAV_HEADER) as f64 / 48_000.0,
        5 => length as f64 / 12_000.0,
        _ => 0.0,
    };
    Duration::from_secs_f64(seconds)
}

fn compact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{14})").expect("valid regex"))
}

fn month_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{2,4})([A-Za-z]{3})(\d{2})-(\d{2})(\d{2})(\d{2})").expect("valid regex")
    })
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = abbrev.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == lower).map(|i| i as u32 + 1)
}

/// Recover the creation time encoded in a recording name.
///
/// Two forms exist: `20240115093000REC001.wav` and `2024Jan15-093000-Rec01.hda`
/// (two-digit years are taken as 20xx).
pub fn parse_filename_timestamp(name: &str) -> Option<NaiveDateTime> {
    if let Some(caps) = compact_pattern().captures(name) {
        return NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S").ok();
    }

    let caps = month_pattern().captures(name)?;
    let mut year: i32 = caps[1].parse().ok()?;
    if caps[1].len() == 2 {
        year += 2000;
    }
    let number = |i: usize| caps[i].parse::<u32>().ok();
    NaiveDate::from_ymd_opt(year, month_number(&caps[2])?, number(3)?)?.and_hms_opt(
        number(4)?,
        number(5)?,
        number(6)?,
    )
}

/// Parse one entry. `None` means the bytes do not hold a complete entry yet.
fn parse_entry(reader: &mut BodyReader<'_>) -> Option<RecordingEntry> {
    let version = reader.u8()?;
    let name_len = reader.u24_be()? as usize;
    let name = device_text(reader.take(name_len)?);
    let length = reader.u32_be()?;
    reader.skip(6)?;
    let mut signature = [0u8; 16];
    signature.copy_from_slice(reader.take(16)?);

    Some(RecordingEntry {
        created: parse_filename_timestamp(&name),
        duration: recording_duration(version, length),
        name,
        length,
        version,
        signature,
    })
}

/// Decode a complete listing in one pass.
///
/// Trailing bytes that do not form a whole entry are ignored.
pub fn decode_file_list(body: &[u8]) -> Vec<RecordingEntry> {
    let mut accumulator = FileListAccumulator::new(None);
    accumulator.push(body);
    accumulator.finish()
}

/// Multi-frame file list state.
#[derive(Debug, Default)]
pub struct FileListAccumulator {
    pending: BytesMut,
    total: Option<u32>,
    seen_first: bool,
    parsed: u32,
    entries: Vec<RecordingEntry>,
}

impl FileListAccumulator {
    /// `total` is the count from a prior `GetFileCount`, if one was made.
    pub fn new(total: Option<u32>) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Announced or previously queried entry count.
    pub fn total(&self) -> Option<u32> {
        self.total
    }

    /// Entries parsed so far, including ones without a timestamp.
    pub fn parsed(&self) -> u32 {
        self.parsed
    }

    /// Append one frame body. Returns `true` once the listing is complete.
    ///
    /// An empty body always terminates. Otherwise the listing is complete
    /// when the parsed count reaches the known total.
    pub fn push(&mut self, body: &[u8]) -> bool {
        if body.is_empty() {
            return true;
        }

        let mut body = body;
        if !self.seen_first {
            self.seen_first = true;
            if body.len() >= TOTAL_PREFIX_LEN && body[..2] == TOTAL_MARKER {
                self.total = Some(u32::from_be_bytes([body[2], body[3], body[4], body[5]]));
                body = &body[TOTAL_PREFIX_LEN..];
            }
        }

        self.pending.extend_from_slice(body);
        self.parse_pending();
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.total.is_some_and(|total| self.parsed >= total)
    }

    fn parse_pending(&mut self) {
        loop {
            if self.pending.len() < ENTRY_FIXED_LEN {
                return;
            }
            let mut reader = BodyReader::new(&self.pending);
            let Some(entry) = parse_entry(&mut reader) else {
                return;
            };
            let consumed = reader.position();
            self.pending.advance(consumed);
            self.parsed += 1;
            if entry.created.is_some() {
                self.entries.push(entry);
            } else {
                tracing::debug!(name = %entry.name, "Skipping recording without a timestamp");
            }
        }
    }

    /// Entries with a resolved timestamp, in device order.
    pub fn finish(self) -> Vec<RecordingEntry> {
        if !self.pending.is_empty() {
            tracing::warn!(
                bytes = self.pending.len(),
                "File list ended inside an entry"
            );
        }
        self.entries
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry_bytes(name: &str, version: u8, length: u32) -> Vec<u8> {
        let mut out = vec![version];
        out.extend_from_slice(&(name.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&[0xAB; 16]);
        out
    }

    #[test]
    fn test_spec_example_entry() {
        let entries = decode_file_list(&entry_bytes("20240115093000REC001.wav", 0, 1024));
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.name, "20240115093000REC001.wav");
        assert_eq!(
            entry.created.unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-01-15 09:30:00"
        );
        assert_eq!(entry.duration, recording_duration(0, 1024));
        assert_eq!(entry.duration, Duration::from_secs_f64(1024.0 / 32_000.0));
        assert_eq!(entry.signature_hex(), "ab".repeat(16));
    }

    #[test]
    fn test_month_form_timestamp() {
        let time = parse_filename_timestamp("2024Mar05-142233-Rec07.hda").unwrap();
        assert_eq!(time.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-05 14:22:33");

        let short = parse_filename_timestamp("24Dec31-235959-Rec01.hda").unwrap();
        assert_eq!(short.format("%Y").to_string(), "2024");

        assert_eq!(parse_filename_timestamp("2024Foo05-142233.hda"), None);
        assert_eq!(parse_filename_timestamp("notes.txt"), None);
    }

    #[test]
    fn test_duration_per_tag() {
        assert_eq!(recording_duration(1, 16_000), Duration::from_secs(1));
        assert_eq!(recording_duration(2, 96_044), Duration::from_secs(1));
        assert_eq!(recording_duration(3, 48_044), Duration::from_secs(1));
        assert_eq!(recording_duration(5, 24_000), Duration::from_secs(2));
        assert_eq!(recording_duration(2, 10), Duration::ZERO);
        assert_eq!(recording_duration(9, 1_000_000), Duration::ZERO);
    }

    #[test]
    fn test_untimestamped_entries_are_dropped() {
        let mut body = Vec::new();
        body.extend(entry_bytes("20240115093000REC001.wav", 0, 10));
        body.extend(entry_bytes("scratch.wav", 0, 10));
        body.extend(entry_bytes("2023Nov02-080000-Rec02.hda", 1, 10));

        let entries = decode_file_list(&body);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.created.is_some()));
    }

    #[test]
    fn test_entry_split_across_frames() {
        let bytes = entry_bytes("20240115093000REC001.wav", 0, 1024);
        let mut acc = FileListAccumulator::new(Some(1));

        assert!(!acc.push(&bytes[..9]));
        assert_eq!(acc.parsed(), 0);
        assert!(acc.push(&bytes[9..]));
        assert_eq!(acc.finish().len(), 1);
    }

    #[test]
    fn test_total_prefix_terminates_on_count() {
        let mut first = vec![0xFF, 0xFF, 0, 0, 0, 2];
        first.extend(entry_bytes("20240115093000REC001.wav", 0, 1));
        let second = entry_bytes("no-time.wav", 0, 1);

        let mut acc = FileListAccumulator::new(None);
        assert!(!acc.push(&first));
        assert_eq!(acc.total(), Some(2));
        assert!(acc.push(&second));
        assert_eq!(acc.finish().len(), 1);
    }

    #[test]
    fn test_empty_body_terminates_without_total() {
        let mut acc = FileListAccumulator::new(None);
        assert!(!acc.push(&entry_bytes("20240115093000REC001.wav", 0, 1)));
        assert!(acc.push(&[]));
        assert_eq!(acc.finish().len(), 1);
    }

    #[test]
    fn test_total_marker_only_checked_on_first_frame() {
        let mut acc = FileListAccumulator::new(Some(5));
        acc.push(&entry_bytes("20240115093000REC001.wav", 0, 1));
        acc.push(&[0xFF, 0xFF, 0, 0, 0, 1]);
        assert_eq!(acc.total(), Some(5));
    }
}
