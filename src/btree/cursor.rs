//! Leaf-chain cursor.
//!
//! Walks the singly-linked chain of leaves from the leftmost leaf,
//! yielding entries in ascending key order. The chain makes this a flat
//! scan; no ancestor bookkeeping is needed.

use crate::error::Result;
use crate::page::{Node, Record};
use crate::storage::Pager;
use std::sync::Arc;

/// Iterator over every `(key, record)` pair of a tree, in key order
pub struct LeafCursor {
    pager: Arc<Pager>,
    leaf: Option<Node>,
    slot: usize,
}

impl LeafCursor {
    /// Start at the given leaf (normally the leftmost); `None` yields an
    /// empty cursor
    pub fn new(pager: Arc<Pager>, first_leaf: Option<Node>) -> Self {
        Self {
            pager,
            leaf: first_leaf,
            slot: 0,
        }
    }

    fn advance(&mut self) -> Result<Option<(i64, Record)>> {
        loop {
            let leaf = match &self.leaf {
                Some(leaf) => leaf,
                None => return Ok(None),
            };

            if self.slot < leaf.num_keys() {
                let entry = (leaf.keys[self.slot], leaf.records()?[self.slot]);
                self.slot += 1;
                return Ok(Some(entry));
            }

            let next = leaf.right_sibling()?;
            self.leaf = if next.is_nil() {
                None
            } else {
                Some(self.pager.load_node(next)?)
            };
            self.slot = 0;
        }
    }
}

impl Iterator for LeafCursor {
    type Item = Result<(i64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                // Stop after surfacing the error once.
                self.leaf = None;
                Some(Err(e))
            }
        }
    }
}
