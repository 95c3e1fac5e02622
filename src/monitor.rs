//! Connection health polling.
//!
//! A task checks `is_open()` on a fixed interval, and also whenever the
//! transport's open-state channel changes if the backend provides one. The
//! first time the handle is found closed it stops the engine, invokes the
//! disconnect callback once and exits. A new monitor is started by the next
//! successful connect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::device::DeviceIdentity;
use crate::engine::{EngineHandle, ShutdownReason};
use crate::transport::{TransportError, UsbTransport};

/// Called with the identity of the device that went away.
pub type DisconnectCallback = Arc<dyn Fn(&DeviceIdentity) + Send + Sync>;

/// Running health poll for one connection.
pub(crate) struct HealthMonitor {
    task: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(
        transport: Arc<dyn UsbTransport>,
        engine: EngineHandle,
        identity: DeviceIdentity,
        period: Duration,
        on_disconnect: Option<DisconnectCallback>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut open_state = transport.open_state();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = state_changed(&mut open_state) => {}
                }
                if transport.is_open() {
                    continue;
                }

                tracing::warn!(
                    model = %identity.model,
                    serial = %identity.serial_number,
                    "Device disconnected"
                );
                engine
                    .shutdown(ShutdownReason::Transport(TransportError::Disconnected))
                    .await;
                if let Some(callback) = &on_disconnect {
                    callback(&identity);
                }
                return;
            }
        });

        Self { task }
    }

    /// Stop polling without reporting anything.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Resolves on the next open-state change. Never resolves without a channel.
async fn state_changed(open_state: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = open_state.as_mut() else {
        return std::future::pending().await;
    };
    if rx.changed().await.is_err() {
        // Sender gone: fall back to polling alone.
        *open_state = None;
    }
}
