//! Hierarchical key-value store
//!
//! Keys are dot-separated paths (`robot.pose.x`). Each segment is a
//! [`StoreNode`]; any node may hold a value and any node may have children.

mod key;
mod node;
mod tree_store;

pub use key::*;
pub use node::*;
pub use tree_store::*;
