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

/// Broker settings
///
/// Field-level defaults use helper functions prefixed with `default_`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Interface the three listeners bind to
    ///
    /// Default: `0.0.0.0`
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Fire-and-forget channel port. 0 picks an ephemeral port.
    #[serde(default = "default_push_port")]
    pub push_port: u16,

    /// Request/reply channel port
    #[serde(default = "default_request_port")]
    pub request_port: u16,

    /// Broadcast channel port
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,

    /// Session token rotation period
    ///
    /// Default: 5000 ms
    #[serde(default = "default_session_interval_ms")]
    pub session_interval_ms: u64,

    /// How often connected clients are asked for fresh statistics
    ///
    /// Default: 1000 ms
    #[serde(default = "default_information_interval_ms")]
    pub information_interval_ms: u64,

    /// Outbound queue capacity per broadcast subscriber
    #[serde(default = "default_buffer_size")]
    pub subscriber_buffer_size: usize,

    /// Pause between teardown and rebind on REBOOT_SERVER
    ///
    /// Default: 200 ms
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,

    /// Reported in ServerInfo
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            push_port: default_push_port(),
            request_port: default_request_port(),
            broadcast_port: default_broadcast_port(),
            session_interval_ms: default_session_interval_ms(),
            information_interval_ms: default_information_interval_ms(),
            subscriber_buffer_size: default_buffer_size(),
            restart_delay_ms: default_restart_delay_ms(),
            max_frame_length: default_max_frame_length(),
            version: default_version(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(config_error("server.bind_address cannot be empty".into()));
        }
        validate_ports("server", [self.push_port, self.request_port, self.broadcast_port])?;
        if self.session_interval_ms == 0 {
            return Err(config_error("server.session_interval_ms must be > 0".into()));
        }
        if self.information_interval_ms == 0 {
            return Err(config_error("server.information_interval_ms must be > 0".into()));
        }
        if self.subscriber_buffer_size == 0 {
            return Err(config_error("server.subscriber_buffer_size must be > 0".into()));
        }
        if self.max_frame_length == 0 {
            return Err(config_error("server.max_frame_length must be > 0".into()));
        }
        Ok(())
    }

    pub fn session_interval(&self) -> Duration {
        Duration::from_millis(self.session_interval_ms)
    }

    pub fn information_interval(&self) -> Duration {
        Duration::from_millis(self.information_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Every port 0, loopback only. Used by tests and embedded brokers.
    pub fn ephemeral() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            push_port: 0,
            request_port: 0,
            broadcast_port: 0,
            ..Default::default()
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
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
fn default_session_interval_ms() -> u64 {
    5000
}
fn default_information_interval_ms() -> u64 {
    1000
}
fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}
fn default_restart_delay_ms() -> u64 {
    200
}
fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
