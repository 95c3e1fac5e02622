//! Device identity, model table, and firmware capability gating.
//!
//! The model is derived from the USB product id; the firmware version comes
//! from `GetDeviceInfo`. [`CapabilityGate`] is a pure function of both and is
//! consulted before any restricted command is queued.

use std::fmt;

use serde::{Deserialize, Serialize};

/// USB vendor id shared by every supported recorder.
pub const VENDOR_ID: u16 = 0x10D6;

/// Product id → model, as reported in the USB device descriptor.
///
/// Two id ranges are in the field for the same three families.
pub const PRODUCT_IDS: [(u16, DeviceModel); 6] = [
    (0xAF0C, DeviceModel::H1),
    (0xAF0D, DeviceModel::H1E),
    (0xAF0E, DeviceModel::P1),
    (0xB00C, DeviceModel::H1),
    (0xB00D, DeviceModel::H1E),
    (0xB00E, DeviceModel::P1),
];

/// Recorder family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceModel {
    H1,
    H1E,
    P1,
    Unknown,
}

impl DeviceModel {
    /// Derive the model from a USB product id.
    pub fn from_product_id(product_id: u16) -> Self {
        PRODUCT_IDS
            .iter()
            .find(|(id, _)| *id == product_id)
            .map(|(_, model)| *model)
            .unwrap_or(DeviceModel::Unknown)
    }

    /// Whether this is one of the H1/H1E desk docks.
    pub fn is_h1_family(self) -> bool {
        matches!(self, DeviceModel::H1 | DeviceModel::H1E)
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceModel::H1 => "hidock-h1",
            DeviceModel::H1E => "hidock-h1e",
            DeviceModel::P1 => "hidock-p1",
            DeviceModel::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Firmware version as numeric code and dotted string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Big Endian interpretation of the four version bytes.
    pub number: u32,
    /// Dotted form of the low three bytes, e.g. `"5.0.42"`.
    pub text: String,
}

impl FirmwareVersion {
    /// Build from the raw 4-byte version code.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            number: u32::from_be_bytes(bytes),
            text: format!("{}.{}.{}", bytes[1], bytes[2], bytes[3]),
        }
    }

    /// Build from a numeric version code.
    pub fn from_number(number: u32) -> Self {
        Self::from_bytes(number.to_be_bytes())
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Everything known about the connected device. Re-derived on every connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub model: DeviceModel,
    pub firmware: FirmwareVersion,
    pub serial_number: String,
}

/// Operations that are restricted by model or firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Auto-record / auto-play settings.
    Settings,
    /// Notification setting.
    Notification,
    /// Bluetooth prompt tone setting.
    BluetoothTone,
    CardInfo,
    FormatCard,
    RecordingFile,
    RestoreFactorySettings,
    ScheduleInfo,
    /// Bluetooth headset pairing, scan and status.
    Bluetooth,
}

impl Capability {
    /// Human-readable operation name used in `Unsupported` errors.
    pub fn name(self) -> &'static str {
        match self {
            Capability::Settings => "settings",
            Capability::Notification => "notification setting",
            Capability::BluetoothTone => "bluetooth prompt tone",
            Capability::CardInfo => "card info",
            Capability::FormatCard => "format card",
            Capability::RecordingFile => "current recording query",
            Capability::RestoreFactorySettings => "restore factory settings",
            Capability::ScheduleInfo => "meeting schedule",
            Capability::Bluetooth => "bluetooth",
        }
    }
}

/// Firmware codes at which restricted features appeared on the H1 family.
pub mod thresholds {
    /// Restore factory settings.
    pub const H1_RESTORE: u32 = 0x0005_0019;
    /// Auto-record, auto-play and notification settings.
    pub const H1_SETTINGS: u32 = 0x0005_0022;
    /// First firmware that prefixes the file list with its total count.
    pub const FILE_LIST_HEADER: u32 = 0x0005_002A;
    /// Card info, format and current-recording queries.
    pub const H1_STORAGE: u32 = 0x0005_0035;
    /// Bluetooth tone and meeting schedule on H1.
    pub const H1_EXTENDED: u32 = 0x0005_0104;
    /// Bluetooth tone and meeting schedule on H1E.
    pub const H1E_EXTENDED: u32 = 0x0006_0104;
}

/// Pure model/firmware feature table.
pub struct CapabilityGate;

impl CapabilityGate {
    /// Whether `capability` may be sent to this device.
    pub fn supports(model: DeviceModel, firmware: u32, capability: Capability) -> bool {
        use thresholds::*;

        if capability == Capability::Bluetooth {
            return model == DeviceModel::P1;
        }
        if !model.is_h1_family() {
            return true;
        }

        let minimum = match capability {
            Capability::Settings | Capability::Notification => H1_SETTINGS,
            Capability::CardInfo | Capability::FormatCard | Capability::RecordingFile => {
                H1_STORAGE
            }
            Capability::RestoreFactorySettings => H1_RESTORE,
            Capability::BluetoothTone | Capability::ScheduleInfo => match model {
                DeviceModel::H1E => H1E_EXTENDED,
                _ => H1_EXTENDED,
            },
            Capability::Bluetooth => return false,
        };
        firmware >= minimum
    }

    /// Whether the file count must be queried before listing files.
    ///
    /// Older firmware streams the list without announcing its length.
    pub fn requires_file_count(firmware: u32) -> bool {
        firmware < thresholds::FILE_LIST_HEADER
    }
}
