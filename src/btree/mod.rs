//! B+ tree layer: the structural engine and the leaf-chain cursor.

mod cursor;
mod tree;

pub use cursor::LeafCursor;
pub use tree::BTree;
