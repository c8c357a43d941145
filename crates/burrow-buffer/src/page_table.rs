//! Page table mapping resident page IDs to their buffer frames.

use crate::frame::FrameId;
use burrow_common::page::PageId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Map from PageId to the frame currently holding that page.
///
/// A plain hash map behind a read-write lock. Access to the pool is
/// single-threaded and cooperative, and a lookup is always followed by
/// parsing the page it found, so the map is never the interesting cost.
pub struct PageTable {
    entries: RwLock<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Returns the frame holding a page, if the page is resident.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.read().get(&page_id).copied()
    }

    /// Maps a page to a frame, returning the frame it displaced, if any.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) -> Option<FrameId> {
        self.entries.write().insert(page_id, frame_id)
    }

    /// Unmaps a page, returning the frame it was in, if any.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.write().remove(&page_id)
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.read().contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no page is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let table = PageTable::new(100);
        let page_id = PageId::new(1, 42);
        let frame_id = FrameId(7);

        assert!(table.insert(page_id, frame_id).is_none());
        assert_eq!(table.get(page_id), Some(frame_id));
        assert!(table.contains(page_id));
    }

    #[test]
    fn test_get_missing() {
        let table = PageTable::new(100);
        assert_eq!(table.get(PageId::new(9, 9)), None);
        assert!(!table.contains(PageId::new(9, 9)));
    }

    #[test]
    fn test_remove() {
        let table = PageTable::new(100);
        let page_id = PageId::new(1, 42);
        let frame_id = FrameId(7);

        table.insert(page_id, frame_id);
        assert_eq!(table.remove(page_id), Some(frame_id));
        assert_eq!(table.get(page_id), None);
        assert_eq!(table.remove(page_id), None);
    }

    #[test]
    fn test_reinsert_after_remove() {
        let table = PageTable::new(100);
        let page_id = PageId::new(2, 5);

        table.insert(page_id, FrameId(1));
        table.remove(page_id);
        assert!(table.insert(page_id, FrameId(9)).is_none());
        assert_eq!(table.get(page_id), Some(FrameId(9)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_len() {
        let table = PageTable::new(100);

        assert_eq!(table.len(), 0);
        assert!(table.is_empty());

        table.insert(PageId::new(0, 1), FrameId(1));
        table.insert(PageId::new(0, 2), FrameId(2));
        table.insert(PageId::new(1, 1), FrameId(3));

        assert_eq!(table.len(), 3);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_update_existing_returns_old_frame() {
        let table = PageTable::new(100);
        let page_id = PageId::new(0, 42);

        table.insert(page_id, FrameId(1));
        assert_eq!(table.insert(page_id, FrameId(2)), Some(FrameId(1)));
        assert_eq!(table.get(page_id), Some(FrameId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_many_entries() {
        let table = PageTable::new(256);
        for i in 0..256 {
            table.insert(PageId::new(3, i), FrameId(i));
        }
        for i in 0..256 {
            assert_eq!(table.get(PageId::new(3, i)), Some(FrameId(i)));
        }
        assert_eq!(table.len(), 256);
    }
}
