//! The pager owns the tree file.
//!
//! It reads and writes fixed-size pages, hands out pages from the intrusive
//! free chain (doubling the pool when the chain runs dry) and takes freed
//! pages back. Callers never touch raw bytes; every page crosses this
//! boundary as a decoded value.

use crate::error::{Result, TreeError};
use crate::page::Node;
use crate::storage::{freelist, FileHeader};
use crate::types::{PageNo, TreeConfig, INIT_PAGE_COUNT, PAGE_SIZE};
use log::debug;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// File-backed page store
pub struct Pager {
    file: RwLock<File>,
}

impl Pager {
    /// Open an existing tree file, or create a new one.
    ///
    /// An existing file is opened as-is; its header is authoritative and
    /// `config` is ignored. On the create path the orders are validated,
    /// the file is created world-readable, pages 1..INIT_PAGE_COUNT are
    /// threaded into the free chain and the header is written.
    pub fn open_or_create(path: &Path, config: TreeConfig) -> Result<Self> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => {
                return Ok(Self {
                    file: RwLock::new(file),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        config.validate()?;

        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let file = opts.open(path)?;

        let pager = Self {
            file: RwLock::new(file),
        };

        let (links, _head) = freelist::thread(1, INIT_PAGE_COUNT);
        for (pgn, next) in links {
            pager.write_at(pgn.file_offset(PAGE_SIZE), &next.value().to_le_bytes())?;
        }
        pager.store_header(&FileHeader::new(config))?;

        debug!("created tree file {:?}", path);
        Ok(pager)
    }

    /// Read and decode page 0
    pub fn load_header(&self) -> Result<FileHeader> {
        let mut buf = [0u8; PAGE_SIZE];
        self.read_at(0, &mut buf)?;
        FileHeader::read(&buf)
    }

    /// Encode and write page 0
    pub fn store_header(&self, header: &FileHeader) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        header.write(&mut buf);
        self.write_at(0, &buf)
    }

    /// Read and decode one tree page
    pub fn load_node(&self, pgn: PageNo) -> Result<Node> {
        if pgn.is_nil() {
            return Err(TreeError::PageOutOfBounds(pgn));
        }
        let mut buf = [0u8; PAGE_SIZE];
        self.read_at(pgn.file_offset(PAGE_SIZE), &mut buf)?;
        Node::decode(pgn, &buf)
    }

    /// Encode and write one tree page
    pub fn store_node(&self, node: &Node) -> Result<()> {
        if node.pgn.is_nil() {
            return Err(TreeError::PageOutOfBounds(node.pgn));
        }
        let mut buf = [0u8; PAGE_SIZE];
        node.encode(&mut buf);
        self.write_at(node.pgn.file_offset(PAGE_SIZE), &buf)
    }

    /// Pop a page off the free chain, doubling the pool first if the chain
    /// is empty. The header is persisted before returning; the caller must
    /// fill the page in and `store_node` it.
    pub fn allocate(&self, header: &mut FileHeader) -> Result<PageNo> {
        if header.free_pgn.is_nil() {
            let (links, head) = freelist::thread(header.num_pages, header.num_pages * 2);
            for (pgn, next) in links {
                self.write_at(pgn.file_offset(PAGE_SIZE), &next.value().to_le_bytes())?;
            }
            debug!(
                "free chain exhausted, doubled page pool to {} pages",
                header.num_pages * 2
            );
            header.num_pages *= 2;
            header.free_pgn = head;
        }

        let popped = header.free_pgn;
        let mut next_buf = [0u8; 8];
        self.read_at(popped.file_offset(PAGE_SIZE), &mut next_buf)?;
        header.free_pgn = freelist::next_free(next_buf);
        self.store_header(header)?;

        Ok(popped)
    }

    /// Push a page onto the free chain.
    ///
    /// The chain pointer is written into the freed page before the header
    /// names it as the new head, so a crash between the two writes leaves
    /// the chain intact.
    pub fn free_page(&self, pgn: PageNo) -> Result<()> {
        let mut header = self.load_header()?;
        self.write_at(
            pgn.file_offset(PAGE_SIZE),
            &header.free_pgn.value().to_le_bytes(),
        )?;
        header.free_pgn = pgn;
        self.store_header(&header)
    }

    /// Walk the free chain and collect every page number on it
    pub fn free_list_pages(&self) -> Result<Vec<PageNo>> {
        let header = self.load_header()?;
        let mut pages = Vec::new();
        let mut cur = header.free_pgn;
        while !cur.is_nil() {
            if pages.len() as i64 >= header.num_pages {
                return Err(TreeError::corruption("free chain longer than the file"));
            }
            pages.push(cur);
            let mut next_buf = [0u8; 8];
            self.read_at(cur.file_offset(PAGE_SIZE), &mut next_buf)?;
            cur = freelist::next_free(next_buf);
        }
        Ok(pages)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{NodeKind, Record};
    use tempfile::tempdir;

    fn open(path: &Path, leaf: i32, internal: i32) -> Result<Pager> {
        Pager::open_or_create(path, TreeConfig::new(leaf, internal))
    }

    #[test]
    fn test_create_new_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");

        let pager = open(&path, 4, 4)?;
        let header = pager.load_header()?;

        assert_eq!(header.root_pgn, PageNo::NIL);
        assert_eq!(header.num_pages, INIT_PAGE_COUNT);
        assert_eq!(header.free_pgn, PageNo::new(3));
        assert_eq!(header.leaf_order, 4);
        assert_eq!(header.internal_order, 4);
        assert_eq!(
            pager.free_list_pages()?,
            vec![PageNo::new(3), PageNo::new(2), PageNo::new(1)]
        );
        Ok(())
    }

    #[test]
    fn test_invalid_orders_rejected_on_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        assert!(matches!(
            open(&path, 2, 4),
            Err(TreeError::InvalidOrder { kind: "leaf", .. })
        ));
        assert!(matches!(
            open(&path, 4, 250),
            Err(TreeError::InvalidOrder {
                kind: "internal",
                ..
            })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_open_existing_ignores_orders() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");

        open(&path, 4, 5)?;

        // Reopen with different, even invalid, orders: the header wins.
        let pager = open(&path, 2, 999)?;
        let header = pager.load_header()?;
        assert_eq!(header.leaf_order, 4);
        assert_eq!(header.internal_order, 5);
        Ok(())
    }

    #[test]
    fn test_allocate_pops_in_chain_order() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open(&dir.path().join("t.db"), 4, 4)?;

        let mut header = pager.load_header()?;
        assert_eq!(pager.allocate(&mut header)?, PageNo::new(3));
        assert_eq!(pager.allocate(&mut header)?, PageNo::new(2));
        assert_eq!(pager.allocate(&mut header)?, PageNo::new(1));
        assert_eq!(header.free_pgn, PageNo::NIL);

        // The header is persisted on every pop.
        assert_eq!(pager.load_header()?.free_pgn, PageNo::NIL);
        Ok(())
    }

    #[test]
    fn test_allocate_doubles_when_exhausted() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open(&dir.path().join("t.db"), 4, 4)?;

        let mut header = pager.load_header()?;
        for _ in 0..3 {
            pager.allocate(&mut header)?;
        }
        let grown = pager.allocate(&mut header)?;

        assert_eq!(grown, PageNo::new(7));
        assert_eq!(header.num_pages, 8);
        assert_eq!(header.free_pgn, PageNo::new(6));
        assert_eq!(pager.load_header()?.num_pages, 8);
        Ok(())
    }

    #[test]
    fn test_free_page_is_lifo() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open(&dir.path().join("t.db"), 4, 4)?;

        let mut header = pager.load_header()?;
        let a = pager.allocate(&mut header)?;
        let b = pager.allocate(&mut header)?;

        pager.free_page(a)?;
        pager.free_page(b)?;

        let mut header = pager.load_header()?;
        assert_eq!(pager.allocate(&mut header)?, b);
        assert_eq!(pager.allocate(&mut header)?, a);
        Ok(())
    }

    #[test]
    fn test_node_roundtrip_through_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let pager = open(&dir.path().join("t.db"), 4, 4)?;

        let mut header = pager.load_header()?;
        let pgn = pager.allocate(&mut header)?;

        let mut node = Node::new_leaf(pgn);
        node.keys = vec![1, 2];
        node.kind = NodeKind::Leaf {
            records: vec![Record::new(b"one")?, Record::new(b"two")?],
            right_sibling: PageNo::NIL,
        };
        pager.store_node(&node)?;

        assert_eq!(pager.load_node(pgn)?, node);
        Ok(())
    }

    #[test]
    fn test_nil_page_access_rejected() {
        let dir = tempdir().unwrap();
        let pager = open(&dir.path().join("t.db"), 4, 4).unwrap();
        assert!(matches!(
            pager.load_node(PageNo::NIL),
            Err(TreeError::PageOutOfBounds(_))
        ));
    }
}
