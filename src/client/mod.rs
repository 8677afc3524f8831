//! Client runtime
//!
//! Provides the components for talking to a treebus server:
//! - [`Client`] - typed reads, writes, subscriptions and admin requests
//! - [`ClientBuilder`] - configurable construction
//! - [`LocalMirror`] - an optional in-process copy of the whole server store
//!
//! # Basic Usage
//! ```ignore
//! use std::time::Duration;
//! use treebus::client::ClientBuilder;
//!
//! let client = ClientBuilder::new().host("10.0.0.2").build()?;
//! client.wait_until_ready(Duration::from_secs(5)).await?;
//!
//! client.subscribe("robot.pose.x", |update| println!("x = {:?}", update.value))?;
//! client.put("robot.pose.x", 1.5)?;
//!
//! let x: Option<f64> = client.get("robot.pose.x").await?;
//! let children = client.get_tables("robot").await?;
//! ```

mod builder;
#[allow(clippy::module_inception)]
mod client;
mod connection;
mod mirror;
mod subscriptions;

pub use builder::*;
pub use client::*;
pub use mirror::*;
pub use subscriptions::*;

#[cfg(test)]
mod client_test;
