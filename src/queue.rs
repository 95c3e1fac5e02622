//! Single-flight command queue and correlator.
//!
//! Operations wait in FIFO order; at most one is in flight. An inbound
//! message resolves the in-flight operation only when its command id
//! matches. Every operation is resolved exactly once: by a response, by a
//! timeout, by failure, or by cancellation.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{JensenError, Result};
use crate::handler::{Response, ResponseKind};
use crate::protocol::Command;

/// Caller side of an operation: `Ok(None)` is a timeout.
pub type Completion = oneshot::Sender<Result<Option<Response>>>;

/// What a caller asks the engine to do.
#[derive(Debug)]
pub struct OperationRequest {
    pub command: Command,
    pub body: Bytes,
    /// Per-operation timeout. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub kind: ResponseKind,
}

impl OperationRequest {
    pub fn new(command: Command, body: impl Into<Bytes>) -> Self {
        Self {
            command,
            body: body.into(),
            timeout: None,
            kind: ResponseKind::Single,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }
}

/// How an operation ended.
#[derive(Debug)]
pub enum Resolution {
    Response(Response),
    Timeout,
    Failed(JensenError),
}

/// An enqueued command awaiting its response.
#[derive(Debug)]
pub struct PendingOperation {
    pub command: Command,
    pub sequence: u32,
    pub body: Bytes,
    pub kind: ResponseKind,
    timeout: Option<Duration>,
    /// Absolute expiry while still waiting to be sent.
    expires_at: Option<Instant>,
    /// Response deadline once in flight.
    deadline: Option<Instant>,
    completion: Option<Completion>,
}

impl PendingOperation {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Deliver the result. The caller may have stopped waiting.
    pub fn resolve(mut self, resolution: Resolution) {
        let result = match resolution {
            Resolution::Response(response) => Ok(Some(response)),
            Resolution::Timeout => {
                if let ResponseKind::Transfer(transfer) = &mut self.kind {
                    transfer.fail("timed out");
                }
                Ok(None)
            }
            Resolution::Failed(err) => {
                if let ResponseKind::Transfer(transfer) = &mut self.kind {
                    transfer.fail(err.to_string());
                }
                Err(err)
            }
        };
        if let Some(completion) = self.completion.take() {
            let _ = completion.send(result);
        }
    }
}

/// FIFO queue with a single in-flight slot.
#[derive(Debug, Default)]
pub struct CommandQueue {
    waiting: VecDeque<PendingOperation>,
    in_flight: Option<PendingOperation>,
    next_sequence: u32,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number and append to the queue.
    pub fn enqueue(&mut self, request: OperationRequest, completion: Completion, now: Instant) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.waiting.push_back(PendingOperation {
            command: request.command,
            sequence,
            body: request.body,
            kind: request.kind,
            timeout: request.timeout,
            expires_at: request.timeout.map(|t| now + t),
            deadline: None,
            completion: Some(completion),
        });
        sequence
    }

    /// Next operation to transmit, if nothing is in flight.
    ///
    /// Operations whose expiry passed while queued are resolved with a
    /// timeout and skipped.
    pub fn pop_ready(&mut self, now: Instant) -> Option<PendingOperation> {
        if self.in_flight.is_some() {
            return None;
        }
        while let Some(op) = self.waiting.pop_front() {
            if op.is_expired(now) {
                tracing::debug!(
                    command = %op.command,
                    sequence = op.sequence,
                    "Operation expired before it was sent"
                );
                op.resolve(Resolution::Timeout);
                continue;
            }
            return Some(op);
        }
        None
    }

    /// Record `op` as transmitted and arm its timeout.
    pub fn set_in_flight(&mut self, mut op: PendingOperation, now: Instant) {
        op.deadline = op.timeout.map(|t| now + t);
        self.in_flight = Some(op);
    }

    pub fn in_flight_command(&self) -> Option<Command> {
        self.in_flight.as_ref().map(|op| op.command)
    }

    pub fn in_flight_mut(&mut self) -> Option<&mut PendingOperation> {
        self.in_flight.as_mut()
    }

    /// Whether an inbound message with `command_id` belongs to the in-flight operation.
    pub fn correlates(&self, command_id: u16) -> bool {
        self.in_flight_command()
            .is_some_and(|command| command.id() == command_id)
    }

    /// Push the in-flight deadline out after a continued frame.
    pub fn touch(&mut self, now: Instant) {
        if let Some(op) = self.in_flight.as_mut() {
            op.deadline = op.timeout.map(|t| now + t);
        }
    }

    pub fn timeout_deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().and_then(|op| op.deadline)
    }

    /// Resolve and clear the in-flight slot.
    pub fn resolve_in_flight(&mut self, resolution: Resolution) -> bool {
        match self.in_flight.take() {
            Some(op) => {
                op.resolve(resolution);
                true
            }
            None => false,
        }
    }

    /// Resolve the in-flight operation with a timeout if its deadline passed.
    pub fn expire_in_flight(&mut self, now: Instant) -> bool {
        match self.timeout_deadline() {
            Some(deadline) if deadline <= now => {
                if let Some(op) = self.in_flight.as_ref() {
                    tracing::debug!(
                        command = %op.command,
                        sequence = op.sequence,
                        "Operation timed out"
                    );
                }
                self.resolve_in_flight(Resolution::Timeout)
            }
            _ => false,
        }
    }

    /// Resolve everything, in flight first, with an error built by `error`.
    pub fn cancel_all(&mut self, error: impl Fn() -> JensenError) -> usize {
        let mut cancelled = 0;
        if self.resolve_in_flight(Resolution::Failed(error())) {
            cancelled += 1;
        }
        while let Some(op) = self.waiting.pop_front() {
            op.resolve(Resolution::Failed(error()));
            cancelled += 1;
        }
        cancelled
    }

    /// Restart sequence numbering for a new connection.
    pub fn reset_sequence(&mut self) {
        self.next_sequence = 0;
    }

    /// Operations waiting to be sent.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.waiting.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;

    type Rx = oneshot::Receiver<Result<Option<Response>>>;

    fn push(queue: &mut CommandQueue, command: Command, timeout: Option<u64>, now: Instant) -> Rx {
        let (tx, rx) = oneshot::channel();
        let mut request = OperationRequest::new(command, Bytes::new());
        if let Some(ms) = timeout {
            request = request.with_timeout(Duration::from_millis(ms));
        }
        queue.enqueue(request, tx, now);
        rx
    }

    #[test]
    fn test_fifo_and_monotonic_sequence() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        for command in [Command::GetDeviceInfo, Command::GetDeviceTime, Command::GetFileCount] {
            push(&mut queue, command, None, now);
        }

        let mut sent = Vec::new();
        while let Some(op) = queue.pop_ready(now) {
            sent.push((op.command, op.sequence));
            queue.set_in_flight(op, now);
            assert!(queue.pop_ready(now).is_none(), "second operation in flight");
            queue.resolve_in_flight(Resolution::Response(Response::FileCount(0)));
        }
        assert_eq!(
            sent,
            vec![
                (Command::GetDeviceInfo, 0),
                (Command::GetDeviceTime, 1),
                (Command::GetFileCount, 2)
            ]
        );
    }

    #[test]
    fn test_mismatched_command_does_not_correlate() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        push(&mut queue, Command::DeleteFile, None, now);
        push(&mut queue, Command::GetSettings, None, now);
        let op = queue.pop_ready(now).unwrap();
        queue.set_in_flight(op, now);

        assert!(!queue.correlates(Command::GetSettings.id()));
        assert!(queue.correlates(Command::DeleteFile.id()));
        assert_eq!(queue.in_flight_command(), Some(Command::DeleteFile));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_expired_before_send_resolves_timeout() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        let mut stale = push(&mut queue, Command::GetDeviceTime, Some(5), now);
        push(&mut queue, Command::GetDeviceInfo, None, now);

        let op = queue.pop_ready(now + Duration::from_millis(10)).unwrap();
        assert_eq!(op.command, Command::GetDeviceInfo);
        assert!(matches!(stale.try_recv(), Ok(Ok(None))));
    }

    #[test]
    fn test_timeout_fires_once() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        let mut rx = push(&mut queue, Command::DeleteFile, Some(100), now);
        let op = queue.pop_ready(now).unwrap();
        queue.set_in_flight(op, now);

        assert!(!queue.expire_in_flight(now + Duration::from_millis(50)));
        assert!(queue.expire_in_flight(now + Duration::from_millis(100)));
        assert!(matches!(rx.try_recv(), Ok(Ok(None))));

        // A late reply finds nothing to resolve.
        assert!(!queue.correlates(Command::DeleteFile.id()));
        assert!(!queue.resolve_in_flight(Resolution::Response(Response::Ack(Outcome::Success))));
        assert!(!queue.expire_in_flight(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_touch_rearms_deadline() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        push(&mut queue, Command::GetFileList, Some(100), now);
        let op = queue.pop_ready(now).unwrap();
        queue.set_in_flight(op, now);

        queue.touch(now + Duration::from_millis(80));
        assert_eq!(
            queue.timeout_deadline(),
            Some(now + Duration::from_millis(180))
        );
    }

    #[test]
    fn test_cancel_all_resolves_everything() {
        let mut queue = CommandQueue::new();
        let now = Instant::now();
        let mut first = push(&mut queue, Command::GetDeviceInfo, None, now);
        let mut second = push(&mut queue, Command::GetDeviceTime, None, now);
        let op = queue.pop_ready(now).unwrap();
        queue.set_in_flight(op, now);

        assert_eq!(queue.cancel_all(|| JensenError::Cancelled), 2);
        assert!(matches!(first.try_recv(), Ok(Err(JensenError::Cancelled))));
        assert!(matches!(second.try_recv(), Ok(Err(JensenError::Cancelled))));
        assert!(queue.is_idle());
    }
}
