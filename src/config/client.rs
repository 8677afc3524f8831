use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use super::validate_ports;
use crate::constants::DEFAULT_BROADCAST_PORT;
use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::constants::DEFAULT_MAX_FRAME_LENGTH;
use crate::constants::DEFAULT_PUSH_PORT;
use crate::constants::DEFAULT_REQUEST_PORT;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    /// Server host used when no resolver is supplied
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_push_port")]
    pub push_port: u16,

    #[serde(default = "default_request_port")]
    pub request_port: u16,

    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,

    /// Deadline for establishing each TCP connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for a synchronous request to be answered
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectPolicy,

    /// Capacity of the inbound broadcast ring
    #[serde(default = "default_buffer_size")]
    pub subscription_buffer_size: usize,

    /// Capacity of the outbound fire-and-forget ring
    #[serde(default = "default_buffer_size")]
    pub push_buffer_size: usize,

    /// Full resync period of the local mirror
    #[serde(default = "default_mirror_resync_interval_ms")]
    pub mirror_resync_interval_ms: u64,

    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            push_port: default_push_port(),
            request_port: default_request_port(),
            broadcast_port: default_broadcast_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
            subscription_buffer_size: default_buffer_size(),
            push_buffer_size: default_buffer_size(),
            mirror_resync_interval_ms: default_mirror_resync_interval_ms(),
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(config_error("client.host cannot be empty".into()));
        }
        validate_ports("client", [self.push_port, self.request_port, self.broadcast_port])?;
        if self.connect_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(config_error("client timeouts must be > 0".into()));
        }
        if self.subscription_buffer_size == 0 || self.push_buffer_size == 0 {
            return Err(config_error("client buffer sizes must be > 0".into()));
        }
        if self.mirror_resync_interval_ms == 0 {
            return Err(config_error("client.mirror_resync_interval_ms must be > 0".into()));
        }
        if self.max_frame_length == 0 {
            return Err(config_error("client.max_frame_length must be > 0".into()));
        }
        self.reconnect.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn mirror_resync_interval(&self) -> Duration {
        Duration::from_millis(self.mirror_resync_interval_ms)
    }
}

/// Delay between reconnection attempts
///
/// Starts at `base_delay_ms` and doubles after each failure up to
/// `max_delay_ms`. Equal values give a fixed delay. Attempts never stop.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(config_error("client.reconnect.base_delay_ms must be > 0".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(config_error(format!(
                "client.reconnect.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }

    /// Delay before attempt number `attempt` (0-based) after a failure.
    pub fn delay_for(
        &self,
        attempt: u32,
    ) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_push_port() -> u16 {
    DEFAULT_PUSH_PORT
}
fn default_request_port() -> u16 {
    DEFAULT_REQUEST_PORT
}
fn default_broadcast_port() -> u16 {
    DEFAULT_BROADCAST_PORT
}
fn default_connect_timeout_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    2000
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_mirror_resync_interval_ms() -> u64 {
    10_000
}
fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    2000
}
