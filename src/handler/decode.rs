//! Fixed-layout response decoders.
//!
//! Every decoder takes an untrusted body and returns a structured value or
//! `MalformedResponse`. None of them panic on short or oversized input.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::file_list::{parse_filename_timestamp, RecordingEntry};
use crate::codec::{device_text, Bcd, BodyReader};
use crate::device::FirmwareVersion;
use crate::error::{JensenError, Result};
use crate::protocol::Command;
use crate::transfer::TransferSummary;

/// Named result of an acknowledgement-style command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    /// Firmware upgrade request accepted.
    Accepted,
    NotExists,
    WrongVersion,
    Busy,
    CardFull,
    CardError,
    /// Any status byte without a specific meaning for the command.
    Failed,
}

impl Outcome {
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success | Outcome::Accepted)
    }

    /// Status byte table for `command`. Unknown bytes map to `Failed`.
    pub fn from_status(command: Command, status: u8) -> Self {
        match (command, status) {
            (Command::DeleteFile, 0) => Outcome::Success,
            (Command::DeleteFile, 2) => Outcome::NotExists,
            (Command::RequestFirmwareUpgrade, 0) => Outcome::Accepted,
            (Command::RequestFirmwareUpgrade, 1) => Outcome::WrongVersion,
            (Command::RequestFirmwareUpgrade, 2) => Outcome::Busy,
            (Command::RequestFirmwareUpgrade, 3) => Outcome::CardFull,
            (Command::RequestFirmwareUpgrade, 4) => Outcome::CardError,
            (_, 0) => Outcome::Success,
            _ => Outcome::Failed,
        }
    }
}

/// Firmware version and serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware: FirmwareVersion,
    pub serial_number: String,
}

/// Device clock as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTime {
    /// BCD digits as sent, e.g. `"20240115093000"`.
    pub raw: String,
    /// `None` when the clock was never set.
    pub time: Option<NaiveDateTime>,
}

/// Recorder behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub auto_record: bool,
    pub auto_play: bool,
    /// Absent on firmware that predates the setting.
    pub notification: Option<bool>,
    pub bluetooth_tone: Option<bool>,
}

/// Partial settings write. `None` leaves the device value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub auto_record: Option<bool>,
    pub auto_play: Option<bool>,
    pub notification: Option<bool>,
    pub bluetooth_tone: Option<bool>,
}

/// Offsets of the four flags inside the 16-byte settings block.
const SETTINGS_OFFSETS: [usize; 4] = [3, 7, 11, 15];
const SETTINGS_LEN: usize = 16;

impl SettingsUpdate {
    /// Encode as the 16-byte block: 1 = on, 2 = off, 0 = unchanged.
    pub fn encode(&self) -> [u8; SETTINGS_LEN] {
        let mut body = [0u8; SETTINGS_LEN];
        let values = [
            self.auto_record,
            self.auto_play,
            self.notification,
            self.bluetooth_tone,
        ];
        for (offset, value) in SETTINGS_OFFSETS.iter().zip(values) {
            body[*offset] = match value {
                Some(true) => 1,
                Some(false) => 2,
                None => 0,
            };
        }
        body
    }
}

/// Storage usage in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInfo {
    pub used_mib: u32,
    pub capacity_mib: u32,
    pub status: u32,
}

impl CardInfo {
    pub fn free_mib(&self) -> u32 {
        self.capacity_mib.saturating_sub(self.used_mib)
    }
}

/// What the recorder is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Idle,
    Recording {
        name: String,
        created: Option<NaiveDateTime>,
    },
}

/// Headset found by a Bluetooth scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothDevice {
    pub name: String,
    pub mac: String,
}

/// Current Bluetooth link.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BluetoothStatus {
    /// `None` when no headset is connected.
    pub device: Option<BluetoothDevice>,
    pub a2dp: bool,
    pub hfp: bool,
    pub avrcp: bool,
    /// Percent, when the headset reports it.
    pub battery: Option<u8>,
}

/// Decoded response to one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    DeviceInfo(DeviceInfo),
    DeviceTime(DeviceTime),
    FileCount(u32),
    FileList(Vec<RecordingEntry>),
    Transfer(TransferSummary),
    Ack(Outcome),
    Settings(DeviceSettings),
    CardInfo(CardInfo),
    Recording(RecordingState),
    BluetoothDevices(Vec<BluetoothDevice>),
    BluetoothStatus(BluetoothStatus),
}

/// Decode a single-frame response body for `command`.
///
/// Multi-frame commands are handled by the registry and never reach here.
pub fn decode_single(command: Command, body: &[u8]) -> Result<Response> {
    match command {
        Command::GetDeviceInfo => decode_device_info(body).map(Response::DeviceInfo),
        Command::GetDeviceTime => decode_device_time(body).map(Response::DeviceTime),
        Command::GetFileCount => decode_file_count(body).map(Response::FileCount),
        Command::GetSettings => decode_settings(body).map(Response::Settings),
        Command::ReadCardInfo => decode_card_info(body).map(Response::CardInfo),
        Command::GetRecordingFile => Ok(Response::Recording(decode_recording(body))),
        Command::BluetoothScan => decode_bluetooth_scan(body).map(Response::BluetoothDevices),
        Command::BluetoothStatus => decode_bluetooth_status(body).map(Response::BluetoothStatus),
        Command::SetDeviceTime
        | Command::DeleteFile
        | Command::RequestFirmwareUpgrade
        | Command::FirmwareUpload
        | Command::BncTest
        | Command::SetSettings
        | Command::FormatCard
        | Command::RestoreFactorySettings
        | Command::SendScheduleInfo
        | Command::BluetoothCmd
        | Command::RecordTestStart
        | Command::RecordTestEnd
        | Command::FactoryReset => decode_outcome(command, body).map(Response::Ack),
        Command::GetFileList | Command::TransferFile | Command::GetFileBlock => Err(
            JensenError::malformed(command, "multi-frame response decoded as single frame"),
        ),
    }
}

/// Single status byte → [`Outcome`].
pub fn decode_outcome(command: Command, body: &[u8]) -> Result<Outcome> {
    let status = BodyReader::new(body)
        .u8()
        .ok_or_else(|| JensenError::malformed(command, "empty acknowledgement"))?;
    Ok(Outcome::from_status(command, status))
}

/// 4-byte version code followed by a 16-byte serial number.
pub fn decode_device_info(body: &[u8]) -> Result<DeviceInfo> {
    let command = Command::GetDeviceInfo;
    let mut reader = BodyReader::new(body);
    let version = reader
        .take(4)
        .ok_or_else(|| JensenError::malformed(command, format!("{} byte body", body.len())))?;
    let serial = reader.take(16.min(reader.remaining())).unwrap_or_default();

    let serial_number: String = serial
        .iter()
        .filter(|b| b.is_ascii_graphic())
        .map(|&b| b as char)
        .collect();

    Ok(DeviceInfo {
        firmware: FirmwareVersion::from_bytes([version[0], version[1], version[2], version[3]]),
        serial_number,
    })
}

pub fn decode_device_time(body: &[u8]) -> Result<DeviceTime> {
    let bytes = BodyReader::new(body).take(7).ok_or_else(|| {
        JensenError::malformed(Command::GetDeviceTime, format!("{} byte body", body.len()))
    })?;
    Ok(DeviceTime {
        raw: Bcd::decode_digits(bytes),
        time: Bcd::decode_timestamp(bytes),
    })
}

/// Empty body means no recordings.
pub fn decode_file_count(body: &[u8]) -> Result<u32> {
    if body.is_empty() {
        return Ok(0);
    }
    BodyReader::new(body).u32_be().ok_or_else(|| {
        JensenError::malformed(Command::GetFileCount, format!("{} byte body", body.len()))
    })
}

pub fn decode_settings(body: &[u8]) -> Result<DeviceSettings> {
    if body.len() < 8 {
        return Err(JensenError::malformed(
            Command::GetSettings,
            format!("{} byte body", body.len()),
        ));
    }
    let flag = |offset: usize| body.get(offset).map(|&b| b == 1);
    Ok(DeviceSettings {
        auto_record: body[3] == 1,
        auto_play: body[7] == 1,
        notification: flag(11),
        bluetooth_tone: flag(15),
    })
}

pub fn decode_card_info(body: &[u8]) -> Result<CardInfo> {
    let mut reader = BodyReader::new(body);
    let mut field = || {
        reader.u32_be().ok_or_else(|| {
            JensenError::malformed(Command::ReadCardInfo, format!("{} byte body", body.len()))
        })
    };
    Ok(CardInfo {
        used_mib: field()?,
        capacity_mib: field()?,
        status: field()?,
    })
}

pub fn decode_recording(body: &[u8]) -> RecordingState {
    let name = device_text(body);
    if name.is_empty() {
        return RecordingState::Idle;
    }
    RecordingState::Recording {
        created: parse_filename_timestamp(&name),
        name,
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn read_peer(reader: &mut BodyReader<'_>) -> Option<BluetoothDevice> {
    let name_len = reader.u16_be()? as usize;
    let name = device_text(reader.take(name_len)?);
    let mac = format_mac(reader.take(6)?);
    Some(BluetoothDevice { name, mac })
}

/// `count:u16` then `count` × (`name_len:u16`, name, 6-byte MAC).
pub fn decode_bluetooth_scan(body: &[u8]) -> Result<Vec<BluetoothDevice>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let truncated = || JensenError::malformed(Command::BluetoothScan, "truncated device list");
    let mut reader = BodyReader::new(body);
    let count = reader.u16_be().ok_or_else(truncated)?;
    (0..count)
        .map(|_| read_peer(&mut reader).ok_or_else(truncated))
        .collect()
}

/// Empty body or status 0 means nothing connected.
pub fn decode_bluetooth_status(body: &[u8]) -> Result<BluetoothStatus> {
    let mut reader = BodyReader::new(body);
    match reader.u8() {
        None | Some(0) => return Ok(BluetoothStatus::default()),
        Some(_) => {}
    }
    let device = read_peer(&mut reader)
        .ok_or_else(|| JensenError::malformed(Command::BluetoothStatus, "truncated peer"))?;
    let mut profile = || reader.u8().map(|b| b == 1).unwrap_or(false);
    let (a2dp, hfp, avrcp) = (profile(), profile(), profile());
    let battery = reader.u8().filter(|&b| b <= 100);

    Ok(BluetoothStatus {
        device: Some(device),
        a2dp,
        hfp,
        avrcp,
        battery,
    })
}
