use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::constants::DEFAULT_BROADCAST_PORT;
use crate::constants::DEFAULT_PUSH_PORT;
use crate::constants::DEFAULT_REQUEST_PORT;
use crate::Result;

/// Where the three server channels listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub push_port: u16,
    pub request_port: u16,
    pub broadcast_port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            push_port: DEFAULT_PUSH_PORT,
            request_port: DEFAULT_REQUEST_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
        }
    }

    pub fn with_ports(
        self,
        push_port: u16,
        request_port: u16,
        broadcast_port: u16,
    ) -> Self {
        Self {
            host: self.host,
            push_port,
            request_port,
            broadcast_port,
        }
    }

    pub fn push_addr(&self) -> String {
        format!("{}:{}", self.host, self.push_port)
    }

    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.host, self.request_port)
    }

    pub fn broadcast_addr(&self) -> String {
        format!("{}:{}", self.host, self.broadcast_port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{} (push {}, request {}, broadcast {})",
            self.host, self.push_port, self.request_port, self.broadcast_port
        )
    }
}

/// Looks up the server before every connection attempt.
///
/// Service discovery lives outside this crate; implementations wrap whatever
/// lookup the deployment uses.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    async fn resolve(&self) -> Result<ServerAddress>;
}

/// Always returns the same address.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    address: ServerAddress,
}

impl StaticResolver {
    pub fn new(address: ServerAddress) -> Self {
        Self { address }
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self) -> Result<ServerAddress> {
        Ok(self.address.clone())
    }
}
