//! List Recordings - connect, identify and list stored files.
//!
//! This example demonstrates:
//! - Connecting a session with the builder
//! - Reading the device identity
//! - Listing recordings with parsed timestamps and durations
//!
//! The recorder is simulated with `MockTransport`; swap in a real
//! `UsbTransport` backend to talk to hardware.
//!
//! ```sh
//! RUST_LOG=jensen_client=debug cargo run --example list_recordings
//! ```

use std::sync::Arc;
use std::time::Duration;

use jensen_client::protocol::{Command, Message};
use jensen_client::transport::MockTransport;
use jensen_client::DeviceSession;
use tracing_subscriber::EnvFilter;

fn entry(name: &str, version: u8, length: u32) -> Vec<u8> {
    let mut out = vec![version];
    out.extend_from_slice(&(name.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&[0; 22]);
    out
}

/// Answers like an H1E on firmware 6.1.4 with three recordings.
fn simulated_h1e(message: &Message) -> Vec<Vec<u8>> {
    match message.command() {
        Some(Command::GetDeviceInfo) => {
            let mut body = vec![0x00, 0x06, 0x01, 0x04];
            body.extend_from_slice(b"HD1E-DEMO-000001");
            vec![MockTransport::reply(message, &body)]
        }
        Some(Command::GetFileList) => {
            let mut first = vec![0xFF, 0xFF, 0, 0, 0, 3];
            first.extend(entry("20240115093000REC001.wav", 1, 960_000));
            first.extend(entry("2024Jan16-101500-Rec02.hda", 5, 720_000));
            let second = entry("2024Feb01-080000-Rec03.hda", 5, 1_440_000);
            vec![
                MockTransport::reply(message, &first),
                MockTransport::reply(message, &second),
            ]
        }
        _ => vec![],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let transport = Arc::new(MockTransport::new(0xAF0D).with_responder(simulated_h1e));
    let session = DeviceSession::builder()
        .command_timeout(Duration::from_secs(2))
        .on_disconnect(|identity| eprintln!("{} disconnected", identity.model))
        .connect(transport)
        .await?;

    let identity = session.identity();
    println!(
        "{} firmware {} serial {}",
        identity.model, identity.firmware, identity.serial_number
    );

    match session.list_files().await? {
        Some(files) => {
            for file in files {
                println!(
                    "{:<32} {:>10} bytes {:>8.1}s  {}",
                    file.name,
                    file.length,
                    file.duration.as_secs_f64(),
                    file.created
                        .map(|t| t.to_string())
                        .unwrap_or_default()
                );
            }
        }
        None => println!("device did not answer"),
    }

    session.close().await;
    Ok(())
}
