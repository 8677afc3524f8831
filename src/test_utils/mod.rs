//! Shared helpers for unit tests: in-process servers and raw channel
//! connections that bypass the client runtime.
mod harness;

pub use harness::*;
