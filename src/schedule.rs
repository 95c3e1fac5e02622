//! Meeting schedule and shortcut encoding.
//!
//! The recorder can press a meeting app's "join"/"mute" shortcut on the host
//! when a scheduled meeting starts. Each entry carries a start and end time
//! plus one key chord for Windows and one for macOS.
//!
//! Entry layout (32 bytes):
//!
//! ```text
//! [start:7 BCD][end:7 BCD][reserved:2][windows chord:8][mac chord:8]
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::codec::Bcd;

/// Encoded size of one schedule entry.
pub const SCHEDULE_ENTRY_LEN: usize = 32;

/// HID modifier bits.
pub mod modifiers {
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    /// Windows key / Command.
    pub const LEFT_GUI: u8 = 0x08;
}

/// HID usage ids for the keys the presets use.
pub mod keys {
    pub const A: u8 = 0x04;
    pub const D: u8 = 0x07;
    pub const M: u8 = 0x10;
}

/// One key combination in HID boot keyboard report form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyChord {
    pub modifiers: u8,
    /// Up to six simultaneous keys; zero means unused.
    pub keys: [u8; 6],
}

impl KeyChord {
    pub fn new(modifiers: u8, key: u8) -> Self {
        Self {
            modifiers,
            keys: [key, 0, 0, 0, 0, 0],
        }
    }

    /// `[modifiers][reserved][key × 6]`
    pub fn encode(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0] = self.modifiers;
        out[2..].copy_from_slice(&self.keys);
        out
    }
}

/// Meeting apps with a known shortcut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeetingShortcut {
    Zoom,
    Teams,
    GoogleMeet,
    Webex,
    /// Caller-supplied chords.
    Custom { windows: KeyChord, mac: KeyChord },
}

impl MeetingShortcut {
    /// Windows and macOS chords for this app.
    pub fn chords(self) -> (KeyChord, KeyChord) {
        use keys::*;
        use modifiers::*;

        match self {
            MeetingShortcut::Zoom => (
                KeyChord::new(LEFT_ALT, A),
                KeyChord::new(LEFT_GUI | LEFT_SHIFT, A),
            ),
            MeetingShortcut::Teams => (
                KeyChord::new(LEFT_CTRL | LEFT_SHIFT, M),
                KeyChord::new(LEFT_GUI | LEFT_SHIFT, M),
            ),
            MeetingShortcut::GoogleMeet => (
                KeyChord::new(LEFT_CTRL, D),
                KeyChord::new(LEFT_GUI, D),
            ),
            MeetingShortcut::Webex => (
                KeyChord::new(LEFT_CTRL, M),
                KeyChord::new(LEFT_GUI | LEFT_SHIFT, M),
            ),
            MeetingShortcut::Custom { windows, mac } => (windows, mac),
        }
    }
}

/// One scheduled meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingSchedule {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub shortcut: MeetingShortcut,
}

impl MeetingSchedule {
    pub fn encode(&self) -> [u8; SCHEDULE_ENTRY_LEN] {
        let (windows, mac) = self.shortcut.chords();
        let mut out = [0u8; SCHEDULE_ENTRY_LEN];
        out[0..7].copy_from_slice(&Bcd::encode_timestamp(&self.start));
        out[7..14].copy_from_slice(&Bcd::encode_timestamp(&self.end));
        out[16..24].copy_from_slice(&windows.encode());
        out[24..32].copy_from_slice(&mac.encode());
        out
    }
}

/// Body for `SendScheduleInfo`. An empty slice clears the schedule.
pub fn encode_schedule(meetings: &[MeetingSchedule]) -> Vec<u8> {
    meetings.iter().flat_map(|m| m.encode()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_zoom_entry_layout() {
        let meeting = MeetingSchedule {
            start: at("2024-01-15 09:30"),
            end: at("2024-01-15 10:00"),
            shortcut: MeetingShortcut::Zoom,
        };
        let bytes = meeting.encode();

        assert_eq!(&bytes[0..7], &[0x20, 0x24, 0x01, 0x15, 0x09, 0x30, 0x00]);
        assert_eq!(&bytes[7..14], &[0x20, 0x24, 0x01, 0x15, 0x10, 0x00, 0x00]);
        assert_eq!(&bytes[14..16], &[0, 0]);
        assert_eq!(&bytes[16..24], &[0x04, 0, 0x04, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[24..32], &[0x0A, 0, 0x04, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_custom_chords_pass_through() {
        let windows = KeyChord::new(modifiers::LEFT_CTRL | modifiers::LEFT_ALT, 0x1E);
        let mac = KeyChord::default();
        assert_eq!(
            MeetingShortcut::Custom { windows, mac }.chords(),
            (windows, mac)
        );
    }

    #[test]
    fn test_schedule_body_concatenates() {
        let meeting = MeetingSchedule {
            start: at("2024-01-15 09:30"),
            end: at("2024-01-15 10:00"),
            shortcut: MeetingShortcut::Teams,
        };
        assert_eq!(encode_schedule(&[meeting.clone(), meeting]).len(), 64);
        assert!(encode_schedule(&[]).is_empty());
    }
}
