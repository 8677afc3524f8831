//! Table broker
//!
//! Three TCP listeners share one [`ServerContext`]: a push channel for
//! fire-and-forget writes, a request channel with exactly one reply per
//! request, and a broadcast channel that fans filtered events out to
//! subscribers.

mod broadcast;
mod builder;
mod context;
mod dispatcher;
mod listeners;
#[allow(clippy::module_inception)]
mod server;
mod session;

pub use broadcast::*;
pub use builder::*;
pub use context::*;
pub use dispatcher::*;
pub use listeners::BoundPorts;
pub(crate) use listeners::Listeners;
pub use server::*;
pub use session::SessionRegistry;
pub use session::SessionToken;
pub(crate) use session::announce_new_session;
pub(crate) use session::run_session_ticker;

#[cfg(test)]
mod dispatcher_test;
