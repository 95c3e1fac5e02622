//! Device session builder and public API.
//!
//! The [`SessionBuilder`] provides a fluent API for configuring the session
//! and connecting. A [`DeviceSession`] manages the lifecycle:
//! 1. Open the transport, select the configuration and claim the interface
//! 2. Start the protocol engine (fresh queue, sequence from 0)
//! 3. Read the device identity with `GetDeviceInfo`
//! 4. Start health polling
//!
//! Every operation returns `Ok(None)` when the device did not answer in
//! time. Operations the connected model or firmware cannot perform fail
//! with [`JensenError::Unsupported`] without anything being sent.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use jensen_client::{DeviceSession, transport::MockTransport};
//!
//! # async fn run() -> jensen_client::Result<()> {
//! let transport = Arc::new(MockTransport::new(0xAF0D));
//! let session = DeviceSession::builder()
//!     .command_timeout(std::time::Duration::from_secs(3))
//!     .on_disconnect(|identity| eprintln!("{} went away", identity.model))
//!     .connect(transport)
//!     .await?;
//!
//! if let Some(files) = session.list_files().await? {
//!     for file in files {
//!         println!("{} {:?}", file.name, file.duration);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::NaiveDateTime;

use crate::codec::Bcd;
use crate::config::SessionConfig;
use crate::device::{Capability, CapabilityGate, DeviceIdentity, DeviceModel};
use crate::engine::{spawn_engine, EngineHandle, ShutdownReason};
use crate::error::{JensenError, Result};
use crate::handler::{
    BluetoothDevice, BluetoothStatus, CardInfo, DeviceInfo, DeviceSettings, DeviceTime, Outcome,
    RecordingEntry, RecordingState, Response, ResponseKind, SettingsUpdate,
};
use crate::monitor::{DisconnectCallback, HealthMonitor};
use crate::protocol::{Command, MAX_BODY_LENGTH};
use crate::queue::OperationRequest;
use crate::schedule::{encode_schedule, MeetingSchedule};
use crate::transfer::{ProgressSink, StreamingTransfer, TransferSummary};
use crate::transport::{TransportError, UsbTransport};

/// Confirmation bytes the device expects with destructive commands.
const CONFIRM_BODY: [u8; 4] = [1, 2, 3, 4];

/// Builder for configuring and connecting a [`DeviceSession`].
pub struct SessionBuilder {
    config: SessionConfig,
    on_disconnect: Option<DisconnectCallback>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            on_disconnect: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// USB configuration value. Default: 1
    pub fn configuration(mut self, value: u8) -> Self {
        self.config.configuration = value;
        self
    }

    /// Interface to claim. Default: 0
    pub fn interface(mut self, interface: u8) -> Self {
        self.config.interface = interface;
        self
    }

    /// Bulk endpoints. Default: OUT 1, IN 2
    pub fn endpoints(mut self, out_endpoint: u8, in_endpoint: u8) -> Self {
        self.config.out_endpoint = out_endpoint;
        self.config.in_endpoint = in_endpoint;
        self
    }

    /// Bytes requested per bulk read. Default: 51200
    pub fn read_size(mut self, size: usize) -> Self {
        self.config.read_size = size;
        self
    }

    /// Quiet period before buffered reads are decoded. Default: 10 ms
    pub fn quiet_period(mut self, period: Duration) -> Self {
        self.config.quiet_period_ms = period.as_millis() as u64;
        self
    }

    /// Timeout for ordinary commands. Default: 5 seconds
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Timeout for format and reset commands. Default: 30 seconds
    pub fn slow_command_timeout(mut self, timeout: Duration) -> Self {
        self.config.slow_command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Inactivity limit for listings and transfers. Default: 10 seconds
    pub fn transfer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.transfer_idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Health poll interval. Default: 100 ms
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Called once when the device is found disconnected.
    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DeviceIdentity) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Open `transport` and perform the connect handshake.
    pub async fn connect(self, transport: Arc<dyn UsbTransport>) -> Result<DeviceSession> {
        self.config.validate()?;
        let link = Link::establish(&transport, &self.config, &self.on_disconnect).await?;
        Ok(DeviceSession {
            transport,
            config: self.config,
            on_disconnect: self.on_disconnect,
            link,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection state, rebuilt on every (re)connect.
struct Link {
    engine: EngineHandle,
    monitor: Mutex<Option<HealthMonitor>>,
    identity: DeviceIdentity,
}

impl Link {
    async fn establish(
        transport: &Arc<dyn UsbTransport>,
        config: &SessionConfig,
        on_disconnect: &Option<DisconnectCallback>,
    ) -> Result<Self> {
        transport.open().await?;
        if let Err(err) = Self::prepare(transport, config).await {
            if let Err(close_err) = transport.close().await {
                tracing::debug!("Transport close failed: {}", close_err);
            }
            return Err(err.into());
        }

        let product_id = transport.product_id();
        let model = DeviceModel::from_product_id(product_id);
        let engine = spawn_engine(transport.clone(), config);

        let request = OperationRequest::new(Command::GetDeviceInfo, Bytes::new())
            .with_timeout(config.command_timeout());
        let info = match engine.submit(request).await {
            Ok(Some(Response::DeviceInfo(info))) => info,
            Ok(Some(_)) => {
                engine.shutdown(ShutdownReason::Closed).await;
                return Err(JensenError::malformed(
                    Command::GetDeviceInfo,
                    "unexpected response type",
                ));
            }
            Ok(None) => {
                engine.shutdown(ShutdownReason::Closed).await;
                return Err(JensenError::Timeout {
                    command: Command::GetDeviceInfo,
                });
            }
            Err(err) => {
                engine.shutdown(ShutdownReason::Closed).await;
                return Err(err);
            }
        };

        let identity = DeviceIdentity {
            vendor_id: transport.vendor_id(),
            product_id,
            model,
            firmware: info.firmware,
            serial_number: info.serial_number,
        };
        tracing::debug!(
            model = %identity.model,
            firmware = %identity.firmware,
            serial = %identity.serial_number,
            "Connected"
        );

        let monitor = HealthMonitor::spawn(
            transport.clone(),
            engine.clone(),
            identity.clone(),
            config.health_interval(),
            on_disconnect.clone(),
        );

        Ok(Self {
            engine,
            monitor: Mutex::new(Some(monitor)),
            identity,
        })
    }

    async fn prepare(
        transport: &Arc<dyn UsbTransport>,
        config: &SessionConfig,
    ) -> std::result::Result<(), TransportError> {
        transport.select_configuration(config.configuration).await?;
        transport.claim_interface(config.interface).await
    }

    fn stop_monitor(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.stop();
        }
    }

    async fn close(&self) {
        self.stop_monitor();
        self.engine.shutdown(ShutdownReason::Closed).await;
    }
}

/// A connected recorder.
///
/// All operations take `&self` and may be called concurrently; they are
/// sent to the device one at a time in call order.
pub struct DeviceSession {
    transport: Arc<dyn UsbTransport>,
    config: SessionConfig,
    on_disconnect: Option<DisconnectCallback>,
    link: Link,
}

impl DeviceSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Connect with default configuration.
    pub async fn connect(transport: Arc<dyn UsbTransport>) -> Result<Self> {
        SessionBuilder::new().connect(transport).await
    }

    /// Tear down the current connection and connect again over the same transport.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.link.close().await;
        self.link = Link::establish(&self.transport, &self.config, &self.on_disconnect).await?;
        Ok(())
    }

    /// Cancel every pending operation and release the transport.
    pub async fn close(&self) {
        self.link.close().await;
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.link.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        !self.link.engine.is_closed() && self.transport.is_open()
    }

    // Plumbing

    fn ensure(&self, capability: Capability) -> Result<()> {
        let identity = &self.link.identity;
        if CapabilityGate::supports(identity.model, identity.firmware.number, capability) {
            return Ok(());
        }
        tracing::debug!(
            operation = capability.name(),
            model = %identity.model,
            firmware = %identity.firmware,
            "Refusing unsupported operation"
        );
        Err(JensenError::Unsupported {
            operation: capability.name(),
            model: identity.model,
            firmware: identity.firmware.text.clone(),
        })
    }

    fn request(&self, command: Command, body: impl Into<Bytes>) -> OperationRequest {
        OperationRequest::new(command, body).with_timeout(self.config.command_timeout())
    }

    async fn submit<T>(
        &self,
        request: OperationRequest,
        extract: fn(Response) -> Option<T>,
    ) -> Result<Option<T>> {
        let command = request.command;
        match self.link.engine.submit(request).await? {
            None => Ok(None),
            Some(response) => extract(response)
                .map(Some)
                .ok_or_else(|| JensenError::malformed(command, "unexpected response type")),
        }
    }

    async fn acknowledged(&self, request: OperationRequest) -> Result<Option<Outcome>> {
        self.submit(request, |r| match r {
            Response::Ack(outcome) => Some(outcome),
            _ => None,
        })
        .await
    }

    fn transfer_summary(response: Response) -> Option<TransferSummary> {
        match response {
            Response::Transfer(summary) => Some(summary),
            _ => None,
        }
    }

    // Generic

    /// Send a single-frame command with a raw body.
    ///
    /// `timeout` defaults to the configured command timeout.
    pub async fn send(
        &self,
        command: Command,
        body: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Option<Response>> {
        if command.is_multi_frame() {
            return Err(JensenError::InvalidArgument(format!(
                "{command} streams its response; use the dedicated operation"
            )));
        }
        let request = OperationRequest::new(command, body)
            .with_timeout(timeout.unwrap_or_else(|| self.config.command_timeout()));
        self.link.engine.submit(request).await
    }

    // Identity and clock

    /// Query firmware version and serial number again.
    pub async fn query_device_info(&self) -> Result<Option<DeviceInfo>> {
        let request = self.request(Command::GetDeviceInfo, Bytes::new());
        self.submit(request, |r| match r {
            Response::DeviceInfo(info) => Some(info),
            _ => None,
        })
        .await
    }

    pub async fn device_time(&self) -> Result<Option<DeviceTime>> {
        let request = self.request(Command::GetDeviceTime, Bytes::new());
        self.submit(request, |r| match r {
            Response::DeviceTime(time) => Some(time),
            _ => None,
        })
        .await
    }

    pub async fn set_device_time(&self, time: NaiveDateTime) -> Result<Option<Outcome>> {
        let body = Bcd::encode_timestamp(&time).to_vec();
        self.acknowledged(self.request(Command::SetDeviceTime, body))
            .await
    }

    // Recordings

    pub async fn file_count(&self) -> Result<Option<u32>> {
        let request = self.request(Command::GetFileCount, Bytes::new());
        self.submit(request, |r| match r {
            Response::FileCount(count) => Some(count),
            _ => None,
        })
        .await
    }

    /// Every recording with a parseable timestamp, in device order.
    ///
    /// Older firmware does not announce the list length, so the count is
    /// queried first. A count of zero returns without listing.
    pub async fn list_files(&self) -> Result<Option<Vec<RecordingEntry>>> {
        let total = if CapabilityGate::requires_file_count(self.link.identity.firmware.number) {
            match self.file_count().await? {
                None => return Ok(None),
                Some(0) => return Ok(Some(Vec::new())),
                Some(count) => Some(count),
            }
        } else {
            None
        };

        let request = OperationRequest::new(Command::GetFileList, Bytes::new())
            .with_timeout(self.config.transfer_idle_timeout())
            .with_kind(ResponseKind::FileList { total });
        self.submit(request, |r| match r {
            Response::FileList(entries) => Some(entries),
            _ => None,
        })
        .await
    }

    fn file_name_body(name: &str) -> Result<Bytes> {
        if name.is_empty() || name.len() > MAX_BODY_LENGTH as usize {
            return Err(JensenError::InvalidArgument(format!(
                "invalid file name {name:?}"
            )));
        }
        Ok(Bytes::copy_from_slice(name.as_bytes()))
    }

    fn download_request(
        &self,
        command: Command,
        body: Bytes,
        transfer: StreamingTransfer,
    ) -> OperationRequest {
        OperationRequest::new(command, body)
            .with_timeout(self.config.transfer_idle_timeout())
            .with_kind(ResponseKind::Transfer(transfer))
    }

    /// Stream `name` to `sink`. `length` comes from the file list.
    pub async fn download(
        &self,
        name: &str,
        length: u32,
        sink: ProgressSink,
    ) -> Result<Option<TransferSummary>> {
        let body = Self::file_name_body(name)?;
        let transfer = StreamingTransfer::download(name, length as u64, false, Some(sink));
        let request = self.download_request(Command::TransferFile, body, transfer);
        self.submit(request, Self::transfer_summary).await
    }

    /// Download `name` into memory.
    pub async fn download_to_memory(
        &self,
        name: &str,
        length: u32,
        sink: Option<ProgressSink>,
    ) -> Result<Option<Bytes>> {
        let body = Self::file_name_body(name)?;
        let transfer = StreamingTransfer::download(name, length as u64, true, sink);
        let request = self.download_request(Command::TransferFile, body, transfer);
        Ok(self
            .submit(request, Self::transfer_summary)
            .await?
            .map(|summary| summary.data.unwrap_or_default()))
    }

    /// Fetch `length` bytes of `name` starting at `offset`.
    pub async fn read_block(
        &self,
        name: &str,
        offset: u32,
        length: u32,
        sink: Option<ProgressSink>,
    ) -> Result<Option<Bytes>> {
        if length == 0 {
            return Ok(Some(Bytes::new()));
        }
        let name_bytes = Self::file_name_body(name)?;
        let mut body = BytesMut::with_capacity(8 + name_bytes.len());
        body.put_u32(offset);
        body.put_u32(length);
        body.put_slice(&name_bytes);

        let transfer = StreamingTransfer::download(name, length as u64, true, sink);
        let request = self.download_request(Command::GetFileBlock, body.freeze(), transfer);
        Ok(self
            .submit(request, Self::transfer_summary)
            .await?
            .map(|summary| summary.data.unwrap_or_default()))
    }

    pub async fn delete_file(&self, name: &str) -> Result<Option<Outcome>> {
        let body = Self::file_name_body(name)?;
        self.acknowledged(self.request(Command::DeleteFile, body))
            .await
    }

    /// Name of the file being recorded right now.
    pub async fn recording_file(&self) -> Result<Option<RecordingState>> {
        self.ensure(Capability::RecordingFile)?;
        let request = self.request(Command::GetRecordingFile, Bytes::new());
        self.submit(request, |r| match r {
            Response::Recording(state) => Some(state),
            _ => None,
        })
        .await
    }

    // Settings and storage

    pub async fn settings(&self) -> Result<Option<DeviceSettings>> {
        self.ensure(Capability::Settings)?;
        let request = self.request(Command::GetSettings, Bytes::new());
        self.submit(request, |r| match r {
            Response::Settings(settings) => Some(settings),
            _ => None,
        })
        .await
    }

    pub async fn set_settings(&self, update: SettingsUpdate) -> Result<Option<Outcome>> {
        self.ensure(Capability::Settings)?;
        if update.notification.is_some() {
            self.ensure(Capability::Notification)?;
        }
        if update.bluetooth_tone.is_some() {
            self.ensure(Capability::BluetoothTone)?;
        }
        let body = update.encode().to_vec();
        self.acknowledged(self.request(Command::SetSettings, body))
            .await
    }

    pub async fn card_info(&self) -> Result<Option<CardInfo>> {
        self.ensure(Capability::CardInfo)?;
        let request = self.request(Command::ReadCardInfo, Bytes::new());
        self.submit(request, |r| match r {
            Response::CardInfo(info) => Some(info),
            _ => None,
        })
        .await
    }

    /// Erase every recording.
    pub async fn format_card(&self) -> Result<Option<Outcome>> {
        self.ensure(Capability::FormatCard)?;
        let request = OperationRequest::new(Command::FormatCard, CONFIRM_BODY.to_vec())
            .with_timeout(self.config.slow_command_timeout());
        self.acknowledged(request).await
    }

    pub async fn restore_factory_settings(&self) -> Result<Option<Outcome>> {
        self.ensure(Capability::RestoreFactorySettings)?;
        let request = OperationRequest::new(Command::RestoreFactorySettings, CONFIRM_BODY.to_vec())
            .with_timeout(self.config.slow_command_timeout());
        self.acknowledged(request).await
    }

    /// Wipe settings and storage.
    pub async fn factory_reset(&self) -> Result<Option<Outcome>> {
        let request = OperationRequest::new(Command::FactoryReset, CONFIRM_BODY.to_vec())
            .with_timeout(self.config.slow_command_timeout());
        self.acknowledged(request).await
    }

    // Firmware

    /// Ask whether an image of `size` bytes for `version` may be uploaded.
    pub async fn request_firmware_upgrade(
        &self,
        version: u32,
        size: u32,
    ) -> Result<Option<Outcome>> {
        let mut body = BytesMut::with_capacity(8);
        body.put_u32(version);
        body.put_u32(size);
        self.acknowledged(self.request(Command::RequestFirmwareUpgrade, body.freeze()))
            .await
    }

    /// Send a firmware image after [`request_firmware_upgrade`](Self::request_firmware_upgrade)
    /// was accepted.
    pub async fn upload_firmware(
        &self,
        image: Bytes,
        sink: Option<ProgressSink>,
    ) -> Result<Option<TransferSummary>> {
        if image.is_empty() || image.len() > MAX_BODY_LENGTH as usize {
            return Err(JensenError::InvalidArgument(format!(
                "firmware image of {} bytes",
                image.len()
            )));
        }
        let transfer = StreamingTransfer::upload("firmware", image.len() as u64, sink);
        let request = OperationRequest::new(Command::FirmwareUpload, image)
            .with_timeout(self.config.firmware_timeout())
            .with_kind(ResponseKind::Transfer(transfer));
        self.submit(request, Self::transfer_summary).await
    }

    // Meeting shortcuts

    /// Replace the meeting schedule. An empty slice clears it.
    pub async fn send_schedule(&self, meetings: &[MeetingSchedule]) -> Result<Option<Outcome>> {
        self.ensure(Capability::ScheduleInfo)?;
        let body = encode_schedule(meetings);
        self.acknowledged(self.request(Command::SendScheduleInfo, body))
            .await
    }

    // Bluetooth (P1)

    /// Scan for headsets for `seconds` and return what was found.
    pub async fn bluetooth_scan(&self, seconds: u8) -> Result<Option<Vec<BluetoothDevice>>> {
        self.ensure(Capability::Bluetooth)?;
        let timeout = Duration::from_secs(seconds as u64) + self.config.command_timeout();
        let request = OperationRequest::new(Command::BluetoothScan, vec![seconds])
            .with_timeout(timeout);
        self.submit(request, |r| match r {
            Response::BluetoothDevices(devices) => Some(devices),
            _ => None,
        })
        .await
    }

    /// Pair with the headset at `mac` (`AA:BB:CC:DD:EE:FF`).
    pub async fn bluetooth_connect(&self, mac: &str) -> Result<Option<Outcome>> {
        self.ensure(Capability::Bluetooth)?;
        let mac = normalize_mac(mac)?;
        let body = format!("CONNECT {mac}").into_bytes();
        self.acknowledged(self.request(Command::BluetoothCmd, body))
            .await
    }

    pub async fn bluetooth_disconnect(&self) -> Result<Option<Outcome>> {
        self.ensure(Capability::Bluetooth)?;
        self.acknowledged(self.request(Command::BluetoothCmd, &b"DISCONNECT"[..]))
            .await
    }

    pub async fn bluetooth_status(&self) -> Result<Option<BluetoothStatus>> {
        self.ensure(Capability::Bluetooth)?;
        let request = self.request(Command::BluetoothStatus, Bytes::new());
        self.submit(request, |r| match r {
            Response::BluetoothStatus(status) => Some(status),
            _ => None,
        })
        .await
    }

    // Test modes

    /// Start or stop the BNC demo.
    pub async fn bnc_test(&self, start: bool) -> Result<Option<Outcome>> {
        self.acknowledged(self.request(Command::BncTest, vec![u8::from(start)]))
            .await
    }

    /// Start or end a test recording.
    pub async fn record_test(&self, start: bool) -> Result<Option<Outcome>> {
        let command = if start {
            Command::RecordTestStart
        } else {
            Command::RecordTestEnd
        };
        self.acknowledged(self.request(command, Bytes::new())).await
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        // Without the monitor's handle clone the engine sees its channel close.
        self.link.stop_monitor();
    }
}

/// Validate a MAC address and render it as upper-case colon-separated hex.
fn normalize_mac(mac: &str) -> Result<String> {
    let parts: Vec<&str> = mac.split([':', '-']).collect();
    let valid = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(JensenError::InvalidArgument(format!(
            "invalid MAC address {mac:?}"
        )));
    }
    Ok(parts.join(":").to_ascii_uppercase())
}
