//! Intrusive free-page chain.
//!
//! Free pages store the number of the next free page in their first eight
//! bytes; the head of the chain lives in the file header. There is no
//! separate bitmap. This module holds the pure chain arithmetic; the pager
//! performs the actual I/O.

use crate::types::PageNo;

/// Decode the next-pointer slot of a free page (its first eight bytes)
pub fn next_free(slot: [u8; 8]) -> PageNo {
    PageNo::new(i64::from_le_bytes(slot))
}

/// Thread pages `first..last` into a chain ending at NIL.
///
/// Returns the `(page, next)` pairs in the order they must be written --
/// page `first` points at NIL, every later page at its predecessor -- and
/// the new head of the chain (the last page of the range).
pub fn thread(first: i64, last: i64) -> (Vec<(PageNo, PageNo)>, PageNo) {
    let mut links = Vec::with_capacity((last - first).max(0) as usize);
    let mut next = PageNo::NIL;
    for pgn in first..last {
        links.push((PageNo::new(pgn), next));
        next = PageNo::new(pgn);
    }
    (links, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_initial_pool() {
        let (links, head) = thread(1, 4);
        assert_eq!(
            links,
            vec![
                (PageNo::new(1), PageNo::NIL),
                (PageNo::new(2), PageNo::new(1)),
                (PageNo::new(3), PageNo::new(2)),
            ]
        );
        assert_eq!(head, PageNo::new(3));
    }

    #[test]
    fn test_thread_doubling() {
        let (links, head) = thread(4, 8);
        assert_eq!(links.first().unwrap(), &(PageNo::new(4), PageNo::NIL));
        assert_eq!(links.last().unwrap(), &(PageNo::new(7), PageNo::new(6)));
        assert_eq!(head, PageNo::new(7));
    }

    #[test]
    fn test_thread_empty_range() {
        let (links, head) = thread(4, 4);
        assert!(links.is_empty());
        assert_eq!(head, PageNo::NIL);
    }

    #[test]
    fn test_next_free_decoding() {
        assert_eq!(next_free(42i64.to_le_bytes()), PageNo::new(42));
        assert_eq!(next_free((-1i64).to_le_bytes()), PageNo::NIL);
    }
}
