//! Command identifier table.

use std::fmt;

/// Every command the client issues or recognises on the wire.
///
/// Identifiers are fixed by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    GetDeviceInfo = 1,
    GetDeviceTime = 2,
    SetDeviceTime = 3,
    GetFileList = 4,
    TransferFile = 5,
    GetFileCount = 6,
    DeleteFile = 7,
    RequestFirmwareUpgrade = 8,
    FirmwareUpload = 9,
    BncTest = 10,
    GetSettings = 11,
    SetSettings = 12,
    GetFileBlock = 13,
    ReadCardInfo = 16,
    FormatCard = 17,
    GetRecordingFile = 18,
    RestoreFactorySettings = 19,
    SendScheduleInfo = 20,
    BluetoothScan = 4097,
    BluetoothCmd = 4098,
    BluetoothStatus = 4099,
    RecordTestStart = 61448,
    RecordTestEnd = 61449,
    FactoryReset = 61451,
}

impl Command {
    /// All known commands, in identifier order.
    pub const ALL: [Command; 24] = [
        Command::GetDeviceInfo,
        Command::GetDeviceTime,
        Command::SetDeviceTime,
        Command::GetFileList,
        Command::TransferFile,
        Command::GetFileCount,
        Command::DeleteFile,
        Command::RequestFirmwareUpgrade,
        Command::FirmwareUpload,
        Command::BncTest,
        Command::GetSettings,
        Command::SetSettings,
        Command::GetFileBlock,
        Command::ReadCardInfo,
        Command::FormatCard,
        Command::GetRecordingFile,
        Command::RestoreFactorySettings,
        Command::SendScheduleInfo,
        Command::BluetoothScan,
        Command::BluetoothCmd,
        Command::BluetoothStatus,
        Command::RecordTestStart,
        Command::RecordTestEnd,
        Command::FactoryReset,
    ];

    /// Wire identifier.
    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Look up a command by wire identifier.
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.id() == id)
    }

    /// Whether the device answers this command with a stream of frames.
    pub fn is_multi_frame(self) -> bool {
        matches!(
            self,
            Command::GetFileList | Command::TransferFile | Command::GetFileBlock
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.id())
    }
}
