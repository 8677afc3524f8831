//! Transport plumbing shared by server and client
//!
//! Framing of protobuf messages over TCP, per-channel connectivity tracking
//! and the seam through which clients discover the server address.

mod framing;
mod monitor;
mod resolver;

pub use framing::*;
pub use monitor::*;
pub use resolver::*;

#[cfg(test)]
mod resolver_test;
