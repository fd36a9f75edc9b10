//! # diskbpt
//!
//! A single-file, disk-resident B+ tree storing fixed-size records keyed
//! by 64-bit signed integers.
//!
//! ## Architecture
//!
//! The crate is two layers over one regular file:
//!
//! - **Page Layer** (`page`): fixed 4 KiB pages with a bit-exact codec
//! - **Storage Layer** (`storage`): the file header, the intrusive
//!   free-page chain and the pager that owns the file
//! - **B+ Tree Layer** (`btree`): find, upsert, delete with rebalancing,
//!   teardown, and leaf-chain iteration
//!
//! The file is self-describing: page 0 records the free chain, the root
//! and the tree orders. Freed pages are threaded into an in-band chain
//! and reused; the page pool doubles when the chain runs dry.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use diskbpt::{Config, Db};
//!
//! let db = Db::open(Config::new("tree.db"))?;
//!
//! db.insert(42, b"answer")?;
//! let value = db.find(42)?;
//! db.delete(42)?;
//! ```

pub mod btree;
pub mod error;
pub mod page;
pub mod storage;
pub mod types;

pub use btree::{BTree, LeafCursor};
pub use error::{Result, TreeError};
pub use page::{Node, NodeKind, Record};
pub use storage::Pager;
pub use types::{PageNo, TreeConfig, PAGE_SIZE};

use parking_lot::RwLock;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tree file configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the tree file
    pub path: PathBuf,
    /// Orders applied when the file is created; an existing file's header
    /// wins over these
    pub tree: TreeConfig,
}

impl Config {
    /// Create a new configuration with default orders
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            tree: TreeConfig::default(),
        }
    }

    /// Set the leaf order
    pub fn leaf_order(mut self, order: i32) -> Self {
        self.tree.leaf_order = order;
        self
    }

    /// Set the internal order
    pub fn internal_order(mut self, order: i32) -> Self {
        self.tree.internal_order = order;
        self
    }
}

/// Snapshot of one page for display and export
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Page number
    pub page_no: i64,
    /// Whether this is a leaf
    pub is_leaf: bool,
    /// Keys in this page
    pub keys: Vec<i64>,
    /// Record texts (only for leaves)
    pub values: Vec<String>,
    /// Child snapshots (only for internal pages)
    pub children: Vec<TreeNode>,
}

/// Tree statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    /// Total pages reserved in the file, header included
    pub num_pages: i64,
    /// Pages currently on the free chain
    pub free_pages: usize,
    /// Levels in the tree, 0 when empty
    pub height: usize,
}

/// Main handle to one tree file.
///
/// This is the primary public interface. Operations are serialized behind
/// a single lock; the file must not be shared with any other process.
pub struct Db {
    tree: RwLock<BTree>,
    pager: Arc<Pager>,
}

impl Db {
    /// Open or create a tree file at the configured path
    pub fn open(config: Config) -> Result<Self> {
        let pager = Arc::new(Pager::open_or_create(&config.path, config.tree)?);
        let tree = RwLock::new(BTree::new(pager.clone()));
        Ok(Self { tree, pager })
    }

    /// The orders recorded in the file header
    pub fn tree_config(&self) -> Result<TreeConfig> {
        Ok(self.pager.load_header()?.config())
    }

    /// Get the record stored under `key`
    ///
    /// Returns `None` if the key does not exist.
    pub fn find(&self, key: i64) -> Result<Option<Record>> {
        self.tree.read().find(key)
    }

    /// Like [`Db::find`], also reporting the routing path as printable lines
    pub fn trace_find(&self, key: i64) -> Result<(Option<Record>, Vec<String>)> {
        self.tree.read().trace_find(key)
    }

    /// Insert or replace the record under `key`
    pub fn insert(&self, key: i64, value: &[u8]) -> Result<()> {
        let record = Record::new(value)?;
        self.tree.write().insert(key, record)
    }

    /// Delete `key`; absent keys are a no-op
    pub fn delete(&self, key: i64) -> Result<()> {
        self.tree.write().delete(key)
    }

    /// Empty the tree, returning every page to the free chain
    pub fn destroy(&self) -> Result<()> {
        self.tree.write().destroy()
    }

    /// Check if a key exists
    pub fn contains(&self, key: i64) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Every `(key, record)` pair in ascending key order
    pub fn iter(&self) -> Result<Vec<(i64, Record)>> {
        // Hold the lock for the whole walk so no writer reshuffles pages
        // under the cursor.
        let tree = self.tree.read();
        let first = tree.first_leaf()?;
        LeafCursor::new(self.pager.clone(), first).collect()
    }

    /// Statistics about the file and the tree
    pub fn stats(&self) -> Result<DbStats> {
        let tree = self.tree.read();
        let header = self.pager.load_header()?;
        Ok(DbStats {
            num_pages: header.num_pages,
            free_pages: self.pager.free_list_pages()?.len(),
            height: tree.height()?,
        })
    }

    /// Snapshot the whole tree, or `None` when it is empty
    pub fn export_tree(&self) -> Result<Option<TreeNode>> {
        // Held across the recursive export, same as `iter`.
        let _tree = self.tree.read();
        let header = self.pager.load_header()?;
        if header.root_pgn.is_nil() {
            return Ok(None);
        }
        Ok(Some(self.export_node(header.root_pgn)?))
    }

    fn export_node(&self, pgn: PageNo) -> Result<TreeNode> {
        let node = self.pager.load_node(pgn)?;
        match &node.kind {
            NodeKind::Leaf { records, .. } => Ok(TreeNode {
                page_no: pgn.value(),
                is_leaf: true,
                keys: node.keys.clone(),
                values: records.iter().map(|r| r.as_text()).collect(),
                children: Vec::new(),
            }),
            NodeKind::Internal { children } => {
                let children = children
                    .iter()
                    .map(|&child| self.export_node(child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(TreeNode {
                    page_no: pgn.value(),
                    is_leaf: false,
                    keys: node.keys.clone(),
                    values: Vec::new(),
                    children,
                })
            }
        }
    }
}

/// Merge two trees into a brand-new file holding their union.
///
/// The leaf chains of both inputs are walked in lockstep and the merged
/// stream is inserted in ascending order. On a duplicate key the record
/// from `left` wins. The output inherits `left`'s orders; the path must
/// not name an existing file.
pub fn join(left: &Db, right: &Db, output: impl AsRef<Path>) -> Result<Db> {
    let output = output.as_ref();
    if output.exists() {
        return Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("join output {:?} already exists", output),
        )
        .into());
    }

    let out = Db::open(Config {
        path: output.to_path_buf(),
        tree: left.tree_config()?,
    })?;

    // Both inputs stay locked for the whole merge.
    let left_tree = left.tree.read();
    let right_tree = right.tree.read();
    let mut left_iter = LeafCursor::new(left.pager.clone(), left_tree.first_leaf()?);
    let mut right_iter = LeafCursor::new(right.pager.clone(), right_tree.first_leaf()?);

    fn next_entry(iter: &mut LeafCursor) -> Result<Option<(i64, Record)>> {
        iter.next().transpose()
    }

    let mut out_tree = out.tree.write();
    let mut a = next_entry(&mut left_iter)?;
    let mut b = next_entry(&mut right_iter)?;
    loop {
        match (a, b) {
            (None, None) => break,
            (Some((key, record)), None) => {
                out_tree.insert(key, record)?;
                a = next_entry(&mut left_iter)?;
                b = None;
            }
            (None, Some((key, record))) => {
                out_tree.insert(key, record)?;
                a = None;
                b = next_entry(&mut right_iter)?;
            }
            (Some((lk, lr)), Some((rk, rr))) => {
                if lk == rk {
                    out_tree.insert(lk, lr)?;
                    a = next_entry(&mut left_iter)?;
                    b = next_entry(&mut right_iter)?;
                } else if lk < rk {
                    out_tree.insert(lk, lr)?;
                    a = next_entry(&mut left_iter)?;
                    b = Some((rk, rr));
                } else {
                    out_tree.insert(rk, rr)?;
                    a = Some((lk, lr));
                    b = next_entry(&mut right_iter)?;
                }
            }
        }
    }
    drop(out_tree);

    Ok(out)
}
