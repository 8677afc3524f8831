//! # treebus
//!
//! A networked, hierarchical key-value table shared in real time between
//! processes. Writers put typed values under dot-separated keys, readers
//! fetch or subscribe to them, and every subscriber hears about changes and
//! deletions as they happen.
//!
//! ## Layout
//! - [`server`] - the broker: a [`TreeStore`](store::TreeStore) behind three
//!   TCP listeners (push, request, broadcast) and a session registry
//! - [`client`] - typed API, reconnecting connection supervisor, callbacks
//!   and the optional [`LocalMirror`](client::LocalMirror)
//! - [`buffer`] - the coalescing ring buffer both sides use for backpressure
//!
//! ## Quick start
//! ```ignore
//! use treebus::client::ClientBuilder;
//! use treebus::server::ServerBuilder;
//!
//! let server = ServerBuilder::new(None)?.start().await?;
//! let client = ClientBuilder::new().build()?;
//! client.wait_until_ready(std::time::Duration::from_secs(5)).await?;
//! client.put("robot.pose.x", 3.5)?;
//! ```

pub mod buffer;
pub mod client;
pub mod config;
pub mod constants;
mod errors;
pub mod metrics;
pub mod network;
pub mod proto;
pub mod server;
pub mod store;
pub(crate) mod utils;
pub mod value;

pub use client::*;
pub use crate::config::*;
pub use errors::*;
pub use server::*;
pub use store::*;
pub use value::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
