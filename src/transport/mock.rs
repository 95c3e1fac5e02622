//! In-memory transport for tests.
//!
//! Decodes every frame written to it, records it, and feeds the responder's
//! replies back as inbound reads. Raw bytes can be injected directly and the
//! device can be "unplugged" to exercise disconnect handling.
//!
//! # Example
//!
//! ```
//! use jensen_client::transport::MockTransport;
//!
//! let mock = MockTransport::new(0xAF0C).with_responder(|message| {
//!     vec![MockTransport::reply(message, &[0x00])]
//! });
//! assert!(!mock.is_unplugged());
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};

use super::usb::{TransportError, UsbTransport};
use crate::device::VENDOR_ID;
use crate::protocol::{encode_frame, FrameBuffer, Message};

/// Produces the raw inbound chunks the device sends in reply to a frame.
pub type MockResponder = Box<dyn Fn(&Message) -> Vec<Vec<u8>> + Send + Sync>;

struct Inbound {
    rx: mpsc::UnboundedReceiver<Bytes>,
    leftover: Bytes,
}

/// Scripted in-memory device.
pub struct MockTransport {
    vendor_id: u16,
    product_id: u16,
    open: watch::Sender<bool>,
    present: AtomicBool,
    opens: AtomicUsize,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound: Mutex<Inbound>,
    outbound: Mutex<FrameBuffer>,
    written: Mutex<Vec<Message>>,
    responder: Option<MockResponder>,
}

impl MockTransport {
    /// Create a device with the given product id and the standard vendor id.
    pub fn new(product_id: u16) -> Self {
        let (inbound_tx, rx) = mpsc::unbounded_channel();
        let (open, _) = watch::channel(false);
        Self {
            vendor_id: VENDOR_ID,
            product_id,
            open,
            present: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
            inbound_tx,
            inbound: Mutex::new(Inbound {
                rx,
                leftover: Bytes::new(),
            }),
            outbound: Mutex::new(FrameBuffer::new()),
            written: Mutex::new(Vec::new()),
            responder: None,
        }
    }

    /// Answer every written frame with the chunks `responder` returns.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Message) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Build a reply frame echoing the request's command id and sequence.
    pub fn reply(request: &Message, body: &[u8]) -> Vec<u8> {
        encode_frame(request.command_id, request.sequence, body)
    }

    /// Queue raw bytes as if the device had sent them.
    pub fn inject(&self, data: impl Into<Bytes>) {
        let _ = self.inbound_tx.send(data.into());
    }

    /// Simulate the device being pulled from the port.
    pub fn unplug(&self) {
        self.present.store(false, Ordering::Release);
        self.open.send_replace(false);
    }

    /// Make the device available again.
    pub fn plug_in(&self) {
        self.present.store(true, Ordering::Release);
    }

    /// Whether [`unplug`](Self::unplug) was called without a later `plug_in`.
    pub fn is_unplugged(&self) -> bool {
        !self.present.load(Ordering::Acquire)
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    /// Every frame written so far, decoded.
    pub async fn written(&self) -> Vec<Message> {
        self.written.lock().await.clone()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if !self.present.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        if !*self.open.borrow() {
            return Err(TransportError::NotOpen);
        }
        Ok(())
    }
}

#[async_trait]
impl UsbTransport for MockTransport {
    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    async fn open(&self) -> Result<(), TransportError> {
        if !self.present.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        self.opens.fetch_add(1, Ordering::AcqRel);
        self.open.send_replace(true);
        Ok(())
    }

    async fn select_configuration(&self, _configuration: u8) -> Result<(), TransportError> {
        self.ensure_open()
    }

    async fn claim_interface(&self, _interface: u8) -> Result<(), TransportError> {
        self.ensure_open()
    }

    async fn write(&self, _endpoint: u8, data: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;

        let messages = self
            .outbound
            .lock()
            .await
            .push(data)
            .map_err(|e| TransportError::Other(e.to_string()))?;

        for message in messages {
            if let Some(responder) = &self.responder {
                for chunk in responder(&message) {
                    self.inject(chunk);
                }
            }
            self.written.lock().await.push(message);
        }
        Ok(data.len())
    }

    async fn read(&self, _endpoint: u8, max_len: usize) -> Result<Bytes, TransportError> {
        self.ensure_open()?;
        let mut open_rx = self.open.subscribe();
        let mut inbound = self.inbound.lock().await;

        let mut data = if inbound.leftover.is_empty() {
            let closed = async {
                loop {
                    let open = *open_rx.borrow_and_update();
                    if !open || open_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            tokio::select! {
                data = inbound.rx.recv() => data.ok_or(TransportError::Disconnected)?,
                _ = closed => return Err(TransportError::Disconnected),
            }
        } else {
            std::mem::take(&mut inbound.leftover)
        };

        if data.len() > max_len {
            inbound.leftover = data.split_off(max_len);
        }
        Ok(data)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.send_replace(false);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.present.load(Ordering::Acquire) && *self.open.borrow()
    }

    fn open_state(&self) -> Option<watch::Receiver<bool>> {
        Some(self.open.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_replies_are_readable() {
        let mock = MockTransport::new(0xAF0C)
            .with_responder(|m| vec![MockTransport::reply(m, b"pong")]);
        mock.open().await.unwrap();

        mock.write(1, &encode_frame(2, 7, b"ping")).await.unwrap();
        let bytes = mock.read(2, 1024).await.unwrap();

        let messages = FrameBuffer::new().push(&bytes).unwrap();
        assert_eq!(messages[0].sequence, 7);
        assert_eq!(messages[0].body(), b"pong");
        assert_eq!(mock.written().await.len(), 1);
    }

    #[tokio::test]
    async fn test_open_state_follows_unplug() {
        let mock = MockTransport::new(0xAF0C);
        mock.open().await.unwrap();
        let mut state = mock.open_state().unwrap();
        assert!(*state.borrow_and_update());

        mock.unplug();
        state.changed().await.unwrap();
        assert!(!*state.borrow());
    }

    #[tokio::test]
    async fn test_read_respects_max_len() {
        let mock = MockTransport::new(0xAF0C);
        mock.open().await.unwrap();
        mock.inject(vec![1u8, 2, 3, 4, 5]);

        assert_eq!(&mock.read(2, 2).await.unwrap()[..], &[1, 2]);
        assert_eq!(&mock.read(2, 8).await.unwrap()[..], &[3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unplug_fails_pending_read() {
        let mock = std::sync::Arc::new(MockTransport::new(0xAF0C));
        mock.open().await.unwrap();

        let reader = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.read(2, 64).await })
        };
        tokio::task::yield_now().await;
        mock.unplug();

        assert_eq!(reader.await.unwrap(), Err(TransportError::Disconnected));
        assert!(!mock.is_open());
        assert_eq!(mock.open().await, Err(TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_write_before_open_fails() {
        let mock = MockTransport::new(0xAF0C);
        assert_eq!(
            mock.write(1, &encode_frame(1, 1, b"")).await,
            Err(TransportError::NotOpen)
        );
    }
}
