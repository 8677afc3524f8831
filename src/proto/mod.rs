//! Protocol buffer messages and their extensions
//!
//! The message types mirror a `.proto` schema but are declared in Rust with
//! prost derives. Constructor helpers and enum names are inherent impls in
//! `message_ext`.

mod message_ext;
mod messages;

pub use messages::*;
