//! Page layer: the in-memory view of a tree page and its byte layout.

mod node;
mod record;

pub use node::{Node, NodeKind};
pub use record::Record;
