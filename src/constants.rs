// Default server ports, one per logical channel
pub const DEFAULT_PUSH_PORT: u16 = 1735;
pub const DEFAULT_REQUEST_PORT: u16 = 1736;
pub const DEFAULT_BROADCAST_PORT: u16 = 1737;

/// Capacity of client inbound and server per-subscriber rings
pub const DEFAULT_BUFFER_SIZE: usize = 500;

/// Random bytes in a session token
pub const SESSION_TOKEN_LEN: usize = 10;

pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

// Buffer labels reported by the overflow metric
pub(crate) const CLIENT_INBOUND_BUFFER: &str = "client_inbound";
pub(crate) const CLIENT_PUSH_BUFFER: &str = "client_push";
pub(crate) const SUBSCRIBER_BUFFER: &str = "subscriber";
