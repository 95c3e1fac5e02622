//! Download - stream a recording with progress reporting.
//!
//! This example demonstrates:
//! - Downloading with a progress sink
//! - Reading a block at an offset
//! - Handling the device going away mid-transfer
//!
//! ```sh
//! cargo run --example download
//! ```

use std::sync::Arc;

use jensen_client::protocol::{Command, Message};
use jensen_client::transport::MockTransport;
use jensen_client::{DeviceSession, ProgressSink, TransferProgress};

const FILE: &str = "20240115093000REC001.wav";
const LENGTH: usize = 200_000;
const CHUNK: usize = 32_768;

fn simulated_h1(message: &Message) -> Vec<Vec<u8>> {
    match message.command() {
        Some(Command::GetDeviceInfo) => {
            let mut body = vec![0x00, 0x05, 0x01, 0x04];
            body.extend_from_slice(b"HD1-DEMO-0000001");
            vec![MockTransport::reply(message, &body)]
        }
        Some(Command::TransferFile) => {
            let payload = vec![0x55u8; LENGTH];
            payload
                .chunks(CHUNK)
                .map(|chunk| MockTransport::reply(message, chunk))
                .collect()
        }
        Some(Command::GetFileBlock) => {
            let length = u32::from_be_bytes([
                message.body[4],
                message.body[5],
                message.body[6],
                message.body[7],
            ]) as usize;
            vec![MockTransport::reply(message, &vec![0xAA; length])]
        }
        _ => vec![],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = Arc::new(MockTransport::new(0xAF0C).with_responder(simulated_h1));
    let session = DeviceSession::connect(transport).await?;

    let progress: ProgressSink = Box::new(|event| match event {
        TransferProgress::Chunk {
            received, total, ..
        } => println!("{:>6.1}%", received as f64 * 100.0 / total as f64),
        TransferProgress::Completed { bytes } => println!("done, {bytes} bytes"),
        TransferProgress::Failed { reason, .. } => eprintln!("failed: {reason}"),
        TransferProgress::Sent { .. } => {}
    });

    match session.download(FILE, LENGTH as u32, progress).await? {
        Some(summary) => println!("{} in {:?}", summary.file_name, summary.elapsed),
        None => println!("transfer stalled"),
    }

    if let Some(block) = session.read_block(FILE, 1024, 512, None).await? {
        println!("block of {} bytes", block.len());
    }

    session.close().await;
    Ok(())
}
