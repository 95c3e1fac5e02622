//! Integration tests for jensen-client.
//!
//! These tests drive a full session against the in-memory recorder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use jensen_client::handler::SettingsUpdate;
use jensen_client::protocol::{encode_frame, Command, Message};
use jensen_client::transport::{MockTransport, TransportError, UsbTransport};
use jensen_client::{
    DeviceModel, DeviceSession, JensenError, Outcome, ProgressSink, TransferProgress,
};

const H1: u16 = 0xAF0C;
const H1E: u16 = 0xAF0D;
const P1: u16 = 0xB00E;

const MODERN_FIRMWARE: u32 = 0x0006_0104;
const LEGACY_FIRMWARE: u32 = 0x0005_0020;

fn info_body(firmware: u32) -> Vec<u8> {
    let mut body = firmware.to_be_bytes().to_vec();
    let mut serial = b"HD-TEST-0001".to_vec();
    serial.resize(16, 0);
    body.extend(serial);
    body
}

fn entry(name: &str, version: u8, length: u32) -> Vec<u8> {
    let mut out = vec![version];
    out.extend_from_slice(&(name.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&[0; 6]);
    out.extend_from_slice(&[0x5A; 16]);
    out
}

/// Recorder that answers `GetDeviceInfo` and defers everything else to `rest`.
fn recorder<F>(product_id: u16, firmware: u32, rest: F) -> MockTransport
where
    F: Fn(&Message) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    MockTransport::new(product_id).with_responder(move |m| match m.command() {
        Some(Command::GetDeviceInfo) => vec![MockTransport::reply(m, &info_body(firmware))],
        _ => rest(m),
    })
}

async fn connect(mock: MockTransport) -> (Arc<MockTransport>, DeviceSession) {
    let mock = Arc::new(mock);
    let session = DeviceSession::builder()
        .command_timeout(Duration::from_millis(500))
        .connect(mock.clone())
        .await
        .unwrap();
    (mock, session)
}

fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<TransferProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = events.clone();
    let sink: ProgressSink = Box::new(move |p| captured.lock().unwrap().push(p));
    (sink, events)
}

async fn commands(mock: &MockTransport) -> Vec<Option<Command>> {
    mock.written().await.iter().map(Message::command).collect()
}

#[tokio::test(start_paused = true)]
async fn test_connect_reads_identity() {
    let (mock, session) = connect(recorder(H1E, MODERN_FIRMWARE, |_| vec![])).await;

    let identity = session.identity();
    assert_eq!(identity.model, DeviceModel::H1E);
    assert_eq!(identity.firmware.text, "6.1.4");
    assert_eq!(identity.serial_number, "HD-TEST-0001");
    assert!(session.is_connected());

    let written = mock.written().await;
    assert_eq!(written[0].command(), Some(Command::GetDeviceInfo));
    assert_eq!(written[0].sequence, 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_requires_device_info() {
    let mock = Arc::new(MockTransport::new(H1));
    let result = DeviceSession::builder()
        .command_timeout(Duration::from_millis(200))
        .connect(mock.clone())
        .await;

    assert!(matches!(
        result,
        Err(JensenError::Timeout {
            command: Command::GetDeviceInfo
        })
    ));
    assert!(!mock.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_list_files_with_announced_total() {
    let (mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |m| {
        if m.command() != Some(Command::GetFileList) {
            return vec![];
        }
        let mut first = vec![0xFF, 0xFF, 0, 0, 0, 2];
        first.extend(entry("20240115093000REC001.wav", 0, 1024));
        vec![
            MockTransport::reply(m, &first),
            MockTransport::reply(m, &entry("untitled.wav", 0, 2048)),
        ]
    }))
    .await;

    let files = session.list_files().await.unwrap().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "20240115093000REC001.wav");
    assert_eq!(
        files[0].created.unwrap().format("%Y-%m-%d %H:%M:%S").to_string(),
        "2024-01-15 09:30:00"
    );
    assert_eq!(files[0].duration, Duration::from_secs_f64(1024.0 / 32_000.0));
    assert_eq!(files[0].length, 1024);

    assert_eq!(
        commands(&mock).await,
        vec![Some(Command::GetDeviceInfo), Some(Command::GetFileList)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_legacy_firmware_queries_count_first() {
    let (mock, session) = connect(recorder(H1, LEGACY_FIRMWARE, |m| match m.command() {
        Some(Command::GetFileCount) => vec![MockTransport::reply(m, &[0, 0, 0, 2])],
        Some(Command::GetFileList) => {
            let mut body = entry("20240115093000REC001.wav", 0, 1024);
            body.extend(entry("2024Jan16-101500-Rec02.hda", 1, 32_000));
            vec![MockTransport::reply(m, &body)]
        }
        _ => vec![],
    }))
    .await;

    let files = session.list_files().await.unwrap().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].duration, Duration::from_secs(2));
    assert_eq!(
        commands(&mock).await,
        vec![
            Some(Command::GetDeviceInfo),
            Some(Command::GetFileCount),
            Some(Command::GetFileList)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_legacy_firmware_zero_count_skips_listing() {
    let (mock, session) = connect(recorder(H1, LEGACY_FIRMWARE, |m| match m.command() {
        Some(Command::GetFileCount) => vec![MockTransport::reply(m, &[0, 0, 0, 0])],
        _ => vec![],
    }))
    .await;

    assert_eq!(session.list_files().await.unwrap(), Some(vec![]));
    assert!(!commands(&mock).await.contains(&Some(Command::GetFileList)));
}

#[tokio::test(start_paused = true)]
async fn test_delete_not_exists() {
    let (mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |m| {
        vec![MockTransport::reply(m, &[0x02])]
    }))
    .await;

    assert_eq!(
        session.delete_file("20240115093000REC001.wav").await.unwrap(),
        Some(Outcome::NotExists)
    );
    let written = mock.written().await;
    assert_eq!(written[1].body(), b"20240115093000REC001.wav");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_reply_is_discarded() {
    let (mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |m| match m.command() {
        Some(Command::GetFileCount) => vec![MockTransport::reply(m, &[0, 0, 0, 5])],
        _ => vec![],
    }))
    .await;

    assert_eq!(session.device_time().await.unwrap(), None);

    // The device answers the abandoned request after all.
    mock.inject(encode_frame(
        Command::GetDeviceTime.id(),
        1,
        &[0x20, 0x24, 0x01, 0x15, 0x09, 0x30, 0x00],
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.file_count().await.unwrap(), Some(5));
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_operations_are_sent_in_call_order() {
    let (mock, session) = connect(recorder(P1, MODERN_FIRMWARE, |m| match m.command() {
        Some(Command::GetDeviceTime) => vec![MockTransport::reply(m, &[0; 7])],
        Some(Command::GetFileCount) => vec![MockTransport::reply(m, &[0, 0, 0, 1])],
        Some(Command::GetSettings) => vec![MockTransport::reply(m, &[0, 0, 0, 1, 0, 0, 0, 2])],
        _ => vec![],
    }))
    .await;

    let (time, count, settings) = tokio::join!(
        session.device_time(),
        session.file_count(),
        session.settings()
    );
    assert_eq!(time.unwrap().unwrap().time, None);
    assert_eq!(count.unwrap(), Some(1));
    let settings = settings.unwrap().unwrap();
    assert!(settings.auto_record && !settings.auto_play);

    let written = mock.written().await;
    let order: Vec<_> = written.iter().map(|m| (m.command(), m.sequence)).collect();
    assert_eq!(
        order,
        vec![
            (Some(Command::GetDeviceInfo), 0),
            (Some(Command::GetDeviceTime), 1),
            (Some(Command::GetFileCount), 2),
            (Some(Command::GetSettings), 3),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_gated_operations_never_reach_the_device() {
    let (mock, session) = connect(recorder(H1, 0x0005_0010, |m| {
        vec![MockTransport::reply(m, &[0x00])]
    }))
    .await;

    assert!(matches!(
        session.format_card().await,
        Err(JensenError::Unsupported {
            operation: "format card",
            model: DeviceModel::H1,
            ..
        })
    ));
    assert!(matches!(
        session.bluetooth_scan(5).await,
        Err(JensenError::Unsupported { .. })
    ));
    assert!(matches!(
        session.settings().await,
        Err(JensenError::Unsupported { .. })
    ));

    assert_eq!(commands(&mock).await, vec![Some(Command::GetDeviceInfo)]);
}

#[tokio::test(start_paused = true)]
async fn test_set_settings_layout() {
    let (mock, session) = connect(recorder(H1E, MODERN_FIRMWARE, |m| {
        vec![MockTransport::reply(m, &[0x00])]
    }))
    .await;

    let update = SettingsUpdate {
        auto_record: Some(false),
        bluetooth_tone: Some(true),
        ..SettingsUpdate::default()
    };
    assert_eq!(
        session.set_settings(update).await.unwrap(),
        Some(Outcome::Success)
    );

    let written = mock.written().await;
    let body = written[1].body();
    assert_eq!(body.len(), 16);
    assert_eq!((body[3], body[7], body[11], body[15]), (2, 0, 0, 1));
}

#[tokio::test(start_paused = true)]
async fn test_download_reports_progress() {
    let (_mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |m| {
        if m.command() != Some(Command::TransferFile) {
            return vec![];
        }
        vec![
            MockTransport::reply(m, &[1; 4]),
            MockTransport::reply(m, &[2; 4]),
            MockTransport::reply(m, &[3; 2]),
        ]
    }))
    .await;

    let (sink, events) = recording_sink();
    let summary = session
        .download("20240115093000REC001.wav", 10, sink)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.bytes, 10);
    assert_eq!(summary.data, None);

    let events = events.lock().unwrap();
    let received: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            TransferProgress::Chunk { received, .. } => Some(*received),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec![4, 8, 10]);
    assert_eq!(events.last(), Some(&TransferProgress::Completed { bytes: 10 }));
}

#[tokio::test(start_paused = true)]
async fn test_read_block_request_layout() {
    let (mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |m| {
        if m.command() != Some(Command::GetFileBlock) {
            return vec![];
        }
        vec![MockTransport::reply(m, b"block")]
    }))
    .await;

    let data = session
        .read_block("a.wav", 4096, 5, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&data[..], b"block");

    let written = mock.written().await;
    assert_eq!(&written[1].body()[..8], &[0, 0, 0x10, 0, 0, 0, 0, 5]);
    assert_eq!(&written[1].body()[8..], b"a.wav");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_transfer() {
    let mock = Arc::new(recorder(H1, MODERN_FIRMWARE, |m| {
        if m.command() != Some(Command::TransferFile) {
            return vec![];
        }
        vec![MockTransport::reply(m, &[7; 4])]
    }));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let counter = disconnects.clone();
    let session = DeviceSession::builder()
        .on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .connect(mock.clone())
        .await
        .unwrap();

    let (sink, events) = recording_sink();
    let (result, _) = tokio::join!(
        session.download("20240115093000REC001.wav", 100, sink),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            mock.unplug();
        }
    );

    assert!(matches!(
        result,
        Err(JensenError::Transport(TransportError::Disconnected))
    ));
    {
        let events = events.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(TransferProgress::Failed { received: 4, total: 100, .. })
        ));
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(!session.is_connected());
    assert!(matches!(
        session.file_count().await,
        Err(JensenError::ConnectionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_operations() {
    let (_mock, session) = connect(recorder(P1, MODERN_FIRMWARE, |_| vec![])).await;
    let session = Arc::new(session);

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.card_info().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(5)).await;

    session.close().await;
    for task in pending {
        assert!(matches!(task.await.unwrap(), Err(JensenError::Cancelled)));
    }
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restarts_sequence() {
    let (mock, mut session) = connect(recorder(H1, MODERN_FIRMWARE, |m| {
        vec![MockTransport::reply(m, &[0x00])]
    }))
    .await;
    session.record_test(true).await.unwrap();

    session.reconnect().await.unwrap();
    assert!(session.is_connected());
    assert_eq!(mock.open_count(), 2);

    let written = mock.written().await;
    let infos: Vec<u32> = written
        .iter()
        .filter(|m| m.command() == Some(Command::GetDeviceInfo))
        .map(|m| m.sequence)
        .collect();
    assert_eq!(infos, vec![0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_fails_while_unplugged() {
    let (mock, mut session) = connect(recorder(H1, MODERN_FIRMWARE, |_| vec![])).await;
    mock.unplug();

    assert!(matches!(
        session.reconnect().await,
        Err(JensenError::Transport(TransportError::Disconnected))
    ));

    mock.plug_in();
    session.reconnect().await.unwrap();
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_bluetooth_on_p1() {
    let (mock, session) = connect(recorder(P1, MODERN_FIRMWARE, |m| match m.command() {
        Some(Command::BluetoothScan) => {
            let mut body = vec![0x00, 0x01, 0x00, 0x04];
            body.extend_from_slice(b"Buds");
            body.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
            vec![MockTransport::reply(m, &body)]
        }
        Some(Command::BluetoothCmd) => vec![MockTransport::reply(m, &[0x00])],
        _ => vec![],
    }))
    .await;

    let devices = session.bluetooth_scan(3).await.unwrap().unwrap();
    assert_eq!(devices[0].name, "Buds");

    assert_eq!(
        session.bluetooth_connect(&devices[0].mac).await.unwrap(),
        Some(Outcome::Success)
    );
    let written = mock.written().await;
    assert_eq!(written[1].body(), &[3]);
    assert_eq!(written[2].body(), b"CONNECT AA:BB:CC:DD:EE:FF");
}

#[tokio::test(start_paused = true)]
async fn test_firmware_upgrade_flow() {
    let (mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |m| match m.command() {
        Some(Command::RequestFirmwareUpgrade) => vec![MockTransport::reply(m, &[0x00])],
        Some(Command::FirmwareUpload) => vec![MockTransport::reply(m, &[0x00])],
        _ => vec![],
    }))
    .await;

    assert_eq!(
        session
            .request_firmware_upgrade(0x0006_0200, 64)
            .await
            .unwrap(),
        Some(Outcome::Accepted)
    );

    let (sink, events) = recording_sink();
    let summary = session
        .upload_firmware(vec![0xEE; 64].into(), Some(sink))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.bytes, 64);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            TransferProgress::Sent { sent: 64, total: 64 },
            TransferProgress::Completed { bytes: 64 }
        ]
    );

    let written = mock.written().await;
    assert_eq!(written[1].body(), &[0, 6, 2, 0, 0, 0, 0, 64]);
    assert_eq!(written[2].body().len(), 64);
}

#[tokio::test(start_paused = true)]
async fn test_raw_send_rejects_streaming_commands() {
    let (_mock, session) = connect(recorder(H1, MODERN_FIRMWARE, |_| vec![])).await;

    assert!(matches!(
        session.send(Command::GetFileList, Vec::new(), None).await,
        Err(JensenError::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_transport_is_object_safe() {
    let mock: Arc<dyn UsbTransport> = Arc::new(recorder(H1, MODERN_FIRMWARE, |_| vec![]));
    let session = DeviceSession::connect(mock.clone()).await.unwrap();
    assert_eq!(session.identity().product_id, H1);
    session.close().await;
    assert!(!mock.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_reply_survives_trailing_garbage() {
    let (_mock, session) = connect(recorder(H1E, MODERN_FIRMWARE, |m| {
        let mut burst = MockTransport::reply(m, &[0, 0, 0, 7]);
        burst.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        vec![burst]
    }))
    .await;

    assert_eq!(session.file_count().await.unwrap(), Some(7));
    assert!(session.is_connected());
}

/// Recorder whose interface is held by another process.
struct BusyInterface {
    inner: MockTransport,
}

#[async_trait]
impl UsbTransport for BusyInterface {
    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }

    async fn open(&self) -> Result<(), TransportError> {
        self.inner.open().await
    }

    async fn select_configuration(&self, configuration: u8) -> Result<(), TransportError> {
        self.inner.select_configuration(configuration).await
    }

    async fn claim_interface(&self, _interface: u8) -> Result<(), TransportError> {
        Err(TransportError::Other("busy".into()))
    }

    async fn write(&self, endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        self.inner.write(endpoint, data).await
    }

    async fn read(&self, endpoint: u8, max_len: usize) -> Result<Bytes, TransportError> {
        self.inner.read(endpoint, max_len).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_claim_releases_handle() {
    let transport = Arc::new(BusyInterface {
        inner: recorder(H1, MODERN_FIRMWARE, |_| vec![]),
    });

    let result = DeviceSession::connect(transport.clone()).await;

    assert!(matches!(
        result,
        Err(JensenError::Transport(TransportError::Other(ref reason))) if reason == "busy"
    ));
    assert_eq!(transport.inner.open_count(), 1);
    assert!(!transport.is_open());
    assert!(transport.inner.written().await.is_empty());
}
