//! B+ tree core.
//!
//! Operations descend from the root recorded in the file header, loading
//! pages on demand through the pager. Nothing is cached across calls;
//! every mutated page is written back before the operation returns.
//! Insertion splits full pages bottom-up, promoting separators into the
//! parent chain; deletion rebalances undersized pages against a sibling,
//! either coalescing the pair or rotating one entry through the parent.

use crate::error::{Result, TreeError};
use crate::page::{Node, NodeKind, Record};
use crate::storage::{FileHeader, Pager};
use crate::types::PageNo;
use log::debug;
use std::sync::Arc;

/// Split point: the count kept on the left-hand page
fn cut(length: usize) -> usize {
    length.div_ceil(2)
}

/// A disk-resident B+ tree over a pager
pub struct BTree {
    pager: Arc<Pager>,
}

impl BTree {
    pub fn new(pager: Arc<Pager>) -> Self {
        Self { pager }
    }

    pub fn pager(&self) -> &Arc<Pager> {
        &self.pager
    }

    /// Look up a key
    pub fn find(&self, key: i64) -> Result<Option<Record>> {
        let header = self.pager.load_header()?;
        let leaf = match self.find_leaf(header.root_pgn, key)? {
            Some(leaf) => leaf,
            None => return Ok(None),
        };
        match leaf.search(key) {
            Some(idx) => Ok(Some(leaf.records()?[idx])),
            None => Ok(None),
        }
    }

    /// Look up a key, collecting the routing decisions made on the way
    /// down. The trace is returned as printable lines.
    pub fn trace_find(&self, key: i64) -> Result<(Option<Record>, Vec<String>)> {
        let header = self.pager.load_header()?;
        let mut trace = Vec::new();

        if header.root_pgn.is_nil() {
            trace.push("Empty tree.".to_string());
            return Ok((None, trace));
        }

        let mut node = self.pager.load_node(header.root_pgn)?;
        while !node.is_leaf() {
            let idx = node.child_index(key);
            trace.push(format!("page {} {:?} -> slot {}", node.pgn, node.keys, idx));
            node = self.pager.load_node(node.child(idx)?)?;
        }
        trace.push(format!("leaf {} {:?}", node.pgn, node.keys));

        let found = node.search(key).map(|idx| node.records().map(|r| r[idx]));
        Ok((found.transpose()?, trace))
    }

    /// Insert a key-record pair; an existing key has its record replaced
    pub fn insert(&mut self, key: i64, record: Record) -> Result<()> {
        let mut header = self.pager.load_header()?;

        let mut leaf = match self.find_leaf(header.root_pgn, key)? {
            Some(leaf) => leaf,
            None => return self.start_new_tree(&mut header, key, record),
        };

        if let Some(idx) = leaf.search(key) {
            leaf.records_mut()?[idx] = record;
            return self.pager.store_node(&leaf);
        }

        if leaf.num_keys() < header.leaf_order as usize - 1 {
            self.insert_into_leaf(&mut leaf, key, record)
        } else {
            self.insert_into_leaf_after_splitting(&mut header, leaf, key, record)
        }
    }

    /// Delete a key; absent keys are a no-op
    pub fn delete(&mut self, key: i64) -> Result<()> {
        let mut header = self.pager.load_header()?;
        let leaf = match self.find_leaf(header.root_pgn, key)? {
            Some(leaf) => leaf,
            None => return Ok(()),
        };
        if leaf.search(key).is_none() {
            return Ok(());
        }
        self.delete_entry(&mut header, leaf, key, PageNo::NIL)
    }

    /// Free every page reachable from the root and empty the tree.
    /// The file keeps its size; the pages go back on the free chain.
    pub fn destroy(&mut self) -> Result<()> {
        let header = self.pager.load_header()?;
        self.destroy_rec(header.root_pgn)?;

        // Every free_page call above rewrote the header's chain head;
        // reload before clearing the root so those pushes survive.
        let mut header = self.pager.load_header()?;
        header.root_pgn = PageNo::NIL;
        self.pager.store_header(&header)
    }

    /// Leftmost leaf of the tree, the head of the sibling chain
    pub fn first_leaf(&self) -> Result<Option<Node>> {
        let header = self.pager.load_header()?;
        if header.root_pgn.is_nil() {
            return Ok(None);
        }
        let mut node = self.pager.load_node(header.root_pgn)?;
        while !node.is_leaf() {
            node = self.pager.load_node(node.child(0)?)?;
        }
        Ok(Some(node))
    }

    /// Number of levels, counting the root; 0 for an empty tree
    pub fn height(&self) -> Result<usize> {
        let header = self.pager.load_header()?;
        if header.root_pgn.is_nil() {
            return Ok(0);
        }
        let mut levels = 1;
        let mut node = self.pager.load_node(header.root_pgn)?;
        while !node.is_leaf() {
            node = self.pager.load_node(node.child(0)?)?;
            levels += 1;
        }
        Ok(levels)
    }

    // Descent

    fn find_leaf(&self, root_pgn: PageNo, key: i64) -> Result<Option<Node>> {
        if root_pgn.is_nil() {
            return Ok(None);
        }
        let mut node = self.pager.load_node(root_pgn)?;
        while !node.is_leaf() {
            let idx = node.child_index(key);
            node = self.pager.load_node(node.child(idx)?)?;
        }
        Ok(Some(node))
    }

    // Insertion

    fn start_new_tree(&self, header: &mut FileHeader, key: i64, record: Record) -> Result<()> {
        let pgn = self.pager.allocate(header)?;

        let mut root = Node::new_leaf(pgn);
        root.keys.push(key);
        root.kind = NodeKind::Leaf {
            records: vec![record],
            right_sibling: PageNo::NIL,
        };
        self.pager.store_node(&root)?;

        header.root_pgn = pgn;
        self.pager.store_header(header)
    }

    fn insert_into_leaf(&self, leaf: &mut Node, key: i64, record: Record) -> Result<()> {
        let point = leaf.insertion_point(key);
        leaf.keys.insert(point, key);
        leaf.records_mut()?.insert(point, record);
        self.pager.store_node(leaf)
    }

    fn insert_into_leaf_after_splitting(
        &self,
        header: &mut FileHeader,
        mut leaf: Node,
        key: i64,
        record: Record,
    ) -> Result<()> {
        let point = leaf.insertion_point(key);
        let old_sibling = leaf.right_sibling()?;

        let mut temp_keys = leaf.keys.clone();
        let mut temp_records = leaf.records()?.to_vec();
        temp_keys.insert(point, key);
        temp_records.insert(point, record);

        let new_pgn = self.pager.allocate(header)?;

        let split = cut(header.leaf_order as usize - 1);
        let mut new_leaf = Node::new_leaf(new_pgn);
        new_leaf.parent = leaf.parent;
        new_leaf.keys = temp_keys.split_off(split);
        new_leaf.kind = NodeKind::Leaf {
            records: temp_records.split_off(split),
            right_sibling: old_sibling,
        };

        leaf.keys = temp_keys;
        leaf.kind = NodeKind::Leaf {
            records: temp_records,
            right_sibling: new_pgn,
        };

        let promoted = new_leaf.keys[0];
        self.pager.store_node(&new_leaf)?;
        self.pager.store_node(&leaf)?;
        debug!("split leaf {} into {}, promoting {}", leaf.pgn, new_pgn, promoted);

        self.insert_into_parent(header, leaf, promoted, new_leaf)
    }

    fn insert_into_parent(
        &self,
        header: &mut FileHeader,
        left: Node,
        key: i64,
        right: Node,
    ) -> Result<()> {
        if left.parent.is_nil() {
            return self.insert_into_new_root(header, left, key, right);
        }

        let mut parent = self.pager.load_node(left.parent)?;
        let left_index = parent.position_of_child(left.pgn)?;

        if parent.num_keys() < header.internal_order as usize - 1 {
            self.insert_into_node(&mut parent, left_index, key, right)
        } else {
            self.insert_into_node_after_splitting(header, parent, left_index, key, right)
        }
    }

    fn insert_into_new_root(
        &self,
        header: &mut FileHeader,
        mut left: Node,
        key: i64,
        mut right: Node,
    ) -> Result<()> {
        let root_pgn = self.pager.allocate(header)?;

        let mut root = Node::new_internal(root_pgn);
        root.keys = vec![key];
        root.kind = NodeKind::Internal {
            children: vec![left.pgn, right.pgn],
        };
        self.pager.store_node(&root)?;

        left.parent = root_pgn;
        right.parent = root_pgn;
        self.pager.store_node(&left)?;
        self.pager.store_node(&right)?;

        debug!("new root {} separating {} | {}", root_pgn, left.pgn, right.pgn);
        header.root_pgn = root_pgn;
        self.pager.store_header(header)
    }

    fn insert_into_node(
        &self,
        parent: &mut Node,
        left_index: usize,
        key: i64,
        mut right: Node,
    ) -> Result<()> {
        parent.keys.insert(left_index, key);
        match &mut parent.kind {
            NodeKind::Internal { children } => children.insert(left_index + 1, right.pgn),
            NodeKind::Leaf { .. } => {
                return Err(TreeError::corruption(format!(
                    "page {}: leaf positioned as a parent",
                    parent.pgn
                )))
            }
        }
        self.pager.store_node(parent)?;

        right.parent = parent.pgn;
        self.pager.store_node(&right)
    }

    fn insert_into_node_after_splitting(
        &self,
        header: &mut FileHeader,
        mut old: Node,
        left_index: usize,
        key: i64,
        right: Node,
    ) -> Result<()> {
        let mut temp_keys = old.keys.clone();
        let mut temp_children = old.children()?.to_vec();
        temp_keys.insert(left_index, key);
        temp_children.insert(left_index + 1, right.pgn);

        let new_pgn = self.pager.allocate(header)?;

        // The middle key is promoted, not kept in either half.
        let split = cut(header.internal_order as usize);
        let promoted = temp_keys[split - 1];

        let mut new_node = Node::new_internal(new_pgn);
        new_node.parent = old.parent;
        new_node.keys = temp_keys.split_off(split);
        new_node.kind = NodeKind::Internal {
            children: temp_children.split_off(split),
        };

        temp_keys.pop();
        old.keys = temp_keys;
        old.kind = NodeKind::Internal {
            children: temp_children,
        };

        self.pager.store_node(&new_node)?;
        self.pager.store_node(&old)?;

        for &child_pgn in new_node.children()? {
            let mut child = self.pager.load_node(child_pgn)?;
            child.parent = new_pgn;
            self.pager.store_node(&child)?;
        }
        debug!(
            "split internal {} into {}, promoting {}",
            old.pgn, new_pgn, promoted
        );

        self.insert_into_parent(header, old, promoted, new_node)
    }

    // Deletion

    fn delete_entry(
        &self,
        header: &mut FileHeader,
        mut node: Node,
        key: i64,
        child_pgn: PageNo,
    ) -> Result<()> {
        self.remove_entry(&mut node, key, child_pgn)?;
        self.pager.store_node(&node)?;

        if node.pgn == header.root_pgn {
            return self.adjust_root(header, node);
        }

        let min_keys = if node.is_leaf() {
            cut(header.leaf_order as usize - 1)
        } else {
            cut(header.internal_order as usize) - 1
        };
        if node.num_keys() >= min_keys {
            return Ok(());
        }

        let parent = self.pager.load_node(node.parent)?;
        let position = parent.position_of_child(node.pgn)?;

        // The neighbor is the left sibling, except for the leftmost child
        // which pairs with its right sibling instead.
        let k_prime_index = position.saturating_sub(1);
        let k_prime = parent.keys[k_prime_index];
        let neighbor_pgn = if position == 0 {
            parent.child(1)?
        } else {
            parent.child(position - 1)?
        };
        let neighbor = self.pager.load_node(neighbor_pgn)?;

        let capacity = if node.is_leaf() {
            header.leaf_order as usize
        } else {
            header.internal_order as usize - 1
        };
        if neighbor.num_keys() + node.num_keys() < capacity {
            self.coalesce(header, node, neighbor, position, k_prime)
        } else {
            self.redistribute(node, neighbor, position, k_prime_index, k_prime)
        }
    }

    fn remove_entry(&self, node: &mut Node, key: i64, child_pgn: PageNo) -> Result<()> {
        let idx = node.search(key).ok_or_else(|| {
            TreeError::corruption(format!("page {}: key {} vanished", node.pgn, key))
        })?;
        node.keys.remove(idx);

        match &mut node.kind {
            NodeKind::Leaf { records, .. } => {
                records.remove(idx);
            }
            NodeKind::Internal { children } => {
                let cidx = children.iter().position(|&c| c == child_pgn).ok_or_else(|| {
                    TreeError::corruption(format!(
                        "page {} not found among children of page {}",
                        child_pgn, node.pgn
                    ))
                })?;
                children.remove(cidx);
            }
        }
        Ok(())
    }

    fn adjust_root(&self, header: &mut FileHeader, root: Node) -> Result<()> {
        if root.num_keys() > 0 {
            return Ok(());
        }

        // An empty internal root hands the tree to its only child; an
        // empty leaf root leaves the tree empty.
        let new_root_pgn = if root.is_leaf() {
            PageNo::NIL
        } else {
            let promoted = root.child(0)?;
            let mut new_root = self.pager.load_node(promoted)?;
            new_root.parent = PageNo::NIL;
            self.pager.store_node(&new_root)?;
            promoted
        };

        debug!("root {} retired, new root {}", root.pgn, new_root_pgn);
        header.root_pgn = new_root_pgn;
        self.pager.store_header(header)?;
        self.pager.free_page(root.pgn)
    }

    fn coalesce(
        &self,
        header: &mut FileHeader,
        node: Node,
        neighbor: Node,
        position: usize,
        k_prime: i64,
    ) -> Result<()> {
        // The left page of the pair always survives.
        let (mut survivor, deleted) = if position == 0 {
            (node, neighbor)
        } else {
            (neighbor, node)
        };

        let Node {
            pgn: deleted_pgn,
            keys: deleted_keys,
            kind: deleted_kind,
            ..
        } = deleted;

        let mut moved_children = Vec::new();
        match (&mut survivor.kind, deleted_kind) {
            (
                NodeKind::Leaf {
                    records,
                    right_sibling,
                },
                NodeKind::Leaf {
                    records: deleted_records,
                    right_sibling: deleted_right,
                },
            ) => {
                survivor.keys.extend(deleted_keys);
                records.extend(deleted_records);
                *right_sibling = deleted_right;
            }
            (
                NodeKind::Internal { children },
                NodeKind::Internal {
                    children: deleted_children,
                },
            ) => {
                // The separator comes down between the two key runs.
                survivor.keys.push(k_prime);
                survivor.keys.extend(deleted_keys);
                moved_children = deleted_children;
                children.extend(moved_children.iter().copied());
            }
            _ => {
                return Err(TreeError::corruption(format!(
                    "pages {} and {} are siblings of different kinds",
                    survivor.pgn, deleted_pgn
                )))
            }
        }

        for &child_pgn in &moved_children {
            let mut child = self.pager.load_node(child_pgn)?;
            child.parent = survivor.pgn;
            self.pager.store_node(&child)?;
        }
        self.pager.store_node(&survivor)?;
        debug!("coalesced page {} into {}", deleted_pgn, survivor.pgn);

        let parent = self.pager.load_node(survivor.parent)?;
        self.delete_entry(header, parent, k_prime, deleted_pgn)?;
        self.pager.free_page(deleted_pgn)
    }

    fn redistribute(
        &self,
        mut node: Node,
        mut neighbor: Node,
        position: usize,
        k_prime_index: usize,
        k_prime: i64,
    ) -> Result<()> {
        let mut parent = self.pager.load_node(node.parent)?;
        let mut moved_child = None;

        if position > 0 {
            // Left neighbor: its last entry becomes our first.
            match (&mut node.kind, &mut neighbor.kind) {
                (
                    NodeKind::Leaf { records, .. },
                    NodeKind::Leaf {
                        records: neighbor_records,
                        ..
                    },
                ) => {
                    let key = neighbor.keys.pop().ok_or_else(|| {
                        TreeError::corruption(format!("page {}: empty neighbor", neighbor.pgn))
                    })?;
                    let record = neighbor_records.pop().ok_or_else(|| {
                        TreeError::corruption(format!("page {}: empty neighbor", neighbor.pgn))
                    })?;
                    node.keys.insert(0, key);
                    records.insert(0, record);
                    parent.keys[k_prime_index] = key;
                }
                (
                    NodeKind::Internal { children },
                    NodeKind::Internal {
                        children: neighbor_children,
                    },
                ) => {
                    // The separator rotates down to us and the neighbor's
                    // last key rotates up to replace it.
                    let last_child = neighbor_children.pop().ok_or_else(|| {
                        TreeError::corruption(format!("page {}: empty neighbor", neighbor.pgn))
                    })?;
                    let last_key = neighbor.keys.pop().ok_or_else(|| {
                        TreeError::corruption(format!("page {}: empty neighbor", neighbor.pgn))
                    })?;
                    node.keys.insert(0, k_prime);
                    children.insert(0, last_child);
                    parent.keys[k_prime_index] = last_key;
                    moved_child = Some(last_child);
                }
                _ => {
                    return Err(TreeError::corruption(format!(
                        "pages {} and {} are siblings of different kinds",
                        node.pgn, neighbor.pgn
                    )))
                }
            }
        } else {
            // Right neighbor: its first entry becomes our last.
            match (&mut node.kind, &mut neighbor.kind) {
                (
                    NodeKind::Leaf { records, .. },
                    NodeKind::Leaf {
                        records: neighbor_records,
                        ..
                    },
                ) => {
                    node.keys.push(neighbor.keys[0]);
                    records.push(neighbor_records[0]);
                    // The separator must name the neighbor's first key
                    // after the shift, which is its second key now.
                    parent.keys[k_prime_index] = neighbor.keys[1];
                    neighbor.keys.remove(0);
                    neighbor_records.remove(0);
                }
                (
                    NodeKind::Internal { children },
                    NodeKind::Internal {
                        children: neighbor_children,
                    },
                ) => {
                    let first_child = neighbor_children[0];
                    node.keys.push(k_prime);
                    children.push(first_child);
                    parent.keys[k_prime_index] = neighbor.keys[0];
                    neighbor.keys.remove(0);
                    neighbor_children.remove(0);
                    moved_child = Some(first_child);
                }
                _ => {
                    return Err(TreeError::corruption(format!(
                        "pages {} and {} are siblings of different kinds",
                        node.pgn, neighbor.pgn
                    )))
                }
            }
        }

        if let Some(child_pgn) = moved_child {
            let mut child = self.pager.load_node(child_pgn)?;
            child.parent = node.pgn;
            self.pager.store_node(&child)?;
        }
        debug!(
            "redistributed one entry from page {} to page {}",
            neighbor.pgn, node.pgn
        );
        self.pager.store_node(&node)?;
        self.pager.store_node(&neighbor)?;
        self.pager.store_node(&parent)
    }

    // Teardown

    fn destroy_rec(&self, pgn: PageNo) -> Result<()> {
        if pgn.is_nil() {
            return Ok(());
        }
        let node = self.pager.load_node(pgn)?;
        if let NodeKind::Internal { children } = &node.kind {
            for &child in children {
                self.destroy_rec(child)?;
            }
        }
        self.pager.free_page(pgn)
    }
}
