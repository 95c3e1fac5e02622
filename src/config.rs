//! Session configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`) is a
//! valid configuration.
//!
//! # Example
//!
//! ```
//! use jensen_client::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{ "command_timeout_ms": 2000 }"#).unwrap();
//! assert_eq!(config.command_timeout().as_millis(), 2000);
//! assert_eq!(config.in_endpoint, 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{JensenError, Result};
use crate::protocol::MAX_BODY_LENGTH;
use crate::transport::{DEFAULT_IN_ENDPOINT, DEFAULT_OUT_ENDPOINT};

/// Default bulk read size.
pub const DEFAULT_READ_SIZE: usize = 51_200;

/// Default quiet period before a burst of reads is decoded.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(10);

/// Default timeout for ordinary commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default health poll interval.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_millis(100);

/// Default request channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for a [`DeviceSession`](crate::DeviceSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// USB configuration value selected on connect.
    pub configuration: u8,
    /// Interface claimed on connect.
    pub interface: u8,
    pub out_endpoint: u8,
    pub in_endpoint: u8,
    /// Maximum bytes requested per bulk read.
    pub read_size: usize,
    pub quiet_period_ms: u64,
    /// Ordinary commands.
    pub command_timeout_ms: u64,
    /// Format, factory reset and other commands the device takes a while over.
    pub slow_command_timeout_ms: u64,
    /// Inactivity limit for file lists and transfers.
    pub transfer_idle_timeout_ms: u64,
    /// Firmware upload acknowledgement.
    pub firmware_timeout_ms: u64,
    pub health_interval_ms: u64,
    /// Largest body length accepted from the device.
    pub max_body_length: u32,
    /// Request channel capacity between callers and the engine.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            configuration: 1,
            interface: 0,
            out_endpoint: DEFAULT_OUT_ENDPOINT,
            in_endpoint: DEFAULT_IN_ENDPOINT,
            read_size: DEFAULT_READ_SIZE,
            quiet_period_ms: DEFAULT_QUIET_PERIOD.as_millis() as u64,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            slow_command_timeout_ms: 30_000,
            transfer_idle_timeout_ms: 10_000,
            firmware_timeout_ms: 120_000,
            health_interval_ms: DEFAULT_HEALTH_INTERVAL.as_millis() as u64,
            max_body_length: MAX_BODY_LENGTH,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(JensenError::InvalidArgument(msg.to_string()));
        if self.read_size == 0 {
            return invalid("read_size must be non-zero");
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity must be non-zero");
        }
        if self.health_interval_ms == 0 {
            return invalid("health_interval_ms must be non-zero");
        }
        if self.max_body_length > MAX_BODY_LENGTH {
            return invalid("max_body_length exceeds the 24-bit length field");
        }
        if self.out_endpoint == self.in_endpoint {
            return invalid("in and out endpoints must differ");
        }
        Ok(())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn slow_command_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_command_timeout_ms)
    }

    pub fn transfer_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_idle_timeout_ms)
    }

    pub fn firmware_timeout(&self) -> Duration {
        Duration::from_millis(self.firmware_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}
