//! Protocol engine task.
//!
//! One task owns every piece of mutable protocol state: the command queue,
//! the in-flight slot, the receive assembler and the handler registry.
//! Callers talk to it through [`EngineHandle`]; a separate reader task keeps
//! a bulk read outstanding at all times and forwards what it gets.
//!
//! # Architecture
//!
//! ```text
//! caller ─┐                                  ┌─► transport.write (OUT)
//! caller ─┼─► mpsc<EngineRequest> ─► Engine ─┤
//! caller ─┘                            ▲     └─► oneshot per operation
//!                                      │
//! transport.read (IN) ─► reader task ──┘ mpsc<ReadEvent>
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::assembler::ReceiveAssembler;
use crate::config::SessionConfig;
use crate::error::{JensenError, Result};
use crate::handler::{HandlerRegistry, Response, ResponseKind, Step};
use crate::protocol::{encode_frame, Command, Message};
use crate::queue::{CommandQueue, Completion, OperationRequest, Resolution};
use crate::transport::{TransportError, UsbTransport};

/// Capacity of the reader → engine channel.
const READ_CHANNEL_CAPACITY: usize = 64;

/// Why the engine is stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    /// Caller closed the session.
    Closed,
    /// The transport failed or went away.
    Transport(TransportError),
}

impl ShutdownReason {
    fn error(&self) -> JensenError {
        match self {
            ShutdownReason::Closed => JensenError::Cancelled,
            ShutdownReason::Transport(err) => JensenError::Transport(err.clone()),
        }
    }
}

pub(crate) enum EngineRequest {
    Submit {
        request: OperationRequest,
        completion: Completion,
    },
    Shutdown {
        reason: ShutdownReason,
        done: oneshot::Sender<()>,
    },
}

enum ReadEvent {
    Data(Bytes),
    Failed(TransportError),
}

/// Cloneable sender side of the engine.
#[derive(Clone)]
pub(crate) struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Queue an operation and wait for it. `Ok(None)` is a timeout.
    pub async fn submit(&self, request: OperationRequest) -> Result<Option<Response>> {
        let (completion, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(rejected)) = self
            .tx
            .send(EngineRequest::Submit {
                request,
                completion,
            })
            .await
        {
            if let EngineRequest::Submit { mut request, .. } = rejected {
                if let ResponseKind::Transfer(transfer) = &mut request.kind {
                    transfer.fail("connection closed");
                }
            }
            return Err(JensenError::ConnectionClosed);
        }
        rx.await.map_err(|_| JensenError::ConnectionClosed)?
    }

    /// Stop the engine and wait until every operation has been resolved.
    pub async fn shutdown(&self, reason: ShutdownReason) {
        let (done, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineRequest::Shutdown { reason, done })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Whether the engine has stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Start the reader and engine tasks over an opened transport.
pub(crate) fn spawn_engine(
    transport: Arc<dyn UsbTransport>,
    config: &SessionConfig,
) -> EngineHandle {
    let (engine, handle) = Engine::start(transport, config);
    tokio::spawn(engine.run());
    handle
}

/// Re-issue a read as soon as the previous one completes.
async fn read_loop(
    transport: Arc<dyn UsbTransport>,
    endpoint: u8,
    read_size: usize,
    tx: mpsc::Sender<ReadEvent>,
) {
    loop {
        let event = match transport.read(endpoint, read_size).await {
            Ok(data) if data.is_empty() => {
                tokio::task::yield_now().await;
                continue;
            }
            Ok(data) => ReadEvent::Data(data),
            Err(err) => ReadEvent::Failed(err),
        };
        let failed = matches!(event, ReadEvent::Failed(_));
        if tx.send(event).await.is_err() || failed {
            return;
        }
    }
}

struct Engine {
    transport: Arc<dyn UsbTransport>,
    out_endpoint: u8,
    queue: CommandQueue,
    registry: HandlerRegistry,
    assembler: ReceiveAssembler,
    requests: mpsc::Receiver<EngineRequest>,
    reads: mpsc::Receiver<ReadEvent>,
    reader: JoinHandle<()>,
}

impl Engine {
    /// Build the engine and start its reader task.
    fn start(transport: Arc<dyn UsbTransport>, config: &SessionConfig) -> (Self, EngineHandle) {
        let (tx, requests) = mpsc::channel(config.channel_capacity);
        let (read_tx, reads) = mpsc::channel(READ_CHANNEL_CAPACITY);

        let reader = tokio::spawn(read_loop(
            transport.clone(),
            config.in_endpoint,
            config.read_size,
            read_tx,
        ));

        let engine = Engine {
            transport,
            out_endpoint: config.out_endpoint,
            queue: CommandQueue::new(),
            registry: HandlerRegistry::new(),
            assembler: ReceiveAssembler::new(config.quiet_period(), config.max_body_length),
            requests,
            reads,
            reader,
        };
        (engine, EngineHandle { tx })
    }

    async fn run(mut self) {
        loop {
            let deadline = self.queue.timeout_deadline();

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(EngineRequest::Submit { request, completion }) => {
                        let sequence = self.queue.enqueue(request, completion, Instant::now());
                        tracing::trace!(sequence, queued = self.queue.len(), "Operation enqueued");
                        self.pump().await;
                    }
                    Some(EngineRequest::Shutdown { reason, done }) => {
                        self.shutdown(reason).await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.shutdown(ShutdownReason::Closed).await;
                        return;
                    }
                },

                event = self.reads.recv() => match event {
                    Some(ReadEvent::Data(data)) => {
                        self.assembler.on_read(&data, Instant::now());
                    }
                    Some(ReadEvent::Failed(err)) => {
                        tracing::warn!("Bulk read failed: {}", err);
                        self.shutdown(ShutdownReason::Transport(err)).await;
                        return;
                    }
                    None => {
                        self.shutdown(ShutdownReason::Transport(TransportError::Disconnected)).await;
                        return;
                    }
                },

                _ = self.assembler.settled(), if self.assembler.is_pending() => {
                    self.dispatch_buffered();
                    self.pump().await;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.queue.expire_in_flight(Instant::now()) {
                        self.registry.reset();
                    }
                    self.pump().await;
                }
            }
        }
    }

    /// Send queued operations until one is in flight.
    async fn pump(&mut self) {
        while let Some(mut op) = self.queue.pop_ready(Instant::now()) {
            let frame = encode_frame(op.command.id(), op.sequence, &op.body);

            if let Err(err) = self.write_frame(&frame).await {
                tracing::warn!(command = %op.command, "Write failed: {}", err);
                op.resolve(Resolution::Failed(err.into()));
                continue;
            }
            tracing::trace!(command = %op.command, sequence = op.sequence, "Frame sent");

            if let ResponseKind::Transfer(transfer) = &mut op.kind {
                transfer.on_started();
                if op.command == Command::FirmwareUpload {
                    transfer.on_sent(op.body.len() as u64);
                }
            }
            self.queue.set_in_flight(op, Instant::now());
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> std::result::Result<(), TransportError> {
        let written = self.transport.write(self.out_endpoint, frame).await?;
        if written < frame.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        Ok(())
    }

    /// The read burst settled: decode and route everything buffered.
    ///
    /// Frames decoded ahead of a sync loss are routed first; the loss then
    /// fails whatever is still in flight.
    fn dispatch_buffered(&mut self) {
        let drained = self.assembler.flush();
        for message in drained.messages {
            self.on_message(message);
        }

        if let Some(err) = drained.error {
            tracing::warn!("Receive buffer discarded: {}", err);
            self.registry.reset();
            self.queue.resolve_in_flight(Resolution::Failed(err));
        }
    }

    fn on_message(&mut self, message: Message) {
        let Some(command) = message.command() else {
            tracing::debug!(id = message.command_id, "Discarding unknown command id");
            return;
        };
        if !self.queue.correlates(message.command_id) {
            tracing::debug!(
                %command,
                sequence = message.sequence,
                "Discarding reply with no matching operation"
            );
            return;
        }
        let Some(op) = self.queue.in_flight_mut() else {
            return;
        };

        match self.registry.decode(command, &message.body, &mut op.kind) {
            Step::Continue => self.queue.touch(Instant::now()),
            Step::Done(Ok(response)) => {
                self.queue.resolve_in_flight(Resolution::Response(response));
            }
            Step::Done(Err(err)) => {
                tracing::debug!(%command, "Operation failed: {}", err);
                self.queue.resolve_in_flight(Resolution::Failed(err));
            }
        }
    }

    /// Resolve every operation, queued or in flight, and stop reading.
    async fn shutdown(&mut self, reason: ShutdownReason) {
        self.reader.abort();
        self.requests.close();

        let cancelled = self.queue.cancel_all(|| reason.error());
        while let Ok(request) = self.requests.try_recv() {
            match request {
                EngineRequest::Submit {
                    mut request,
                    completion,
                } => {
                    if let ResponseKind::Transfer(transfer) = &mut request.kind {
                        transfer.fail(reason.error().to_string());
                    }
                    let _ = completion.send(Err(reason.error()));
                }
                EngineRequest::Shutdown { done, .. } => {
                    let _ = done.send(());
                }
            }
        }
        self.registry.reset();
        self.assembler.reset();

        if let Err(err) = self.transport.close().await {
            tracing::debug!("Transport close failed: {}", err);
        }
        tracing::debug!(cancelled, ?reason, "Engine stopped");
    }
}
