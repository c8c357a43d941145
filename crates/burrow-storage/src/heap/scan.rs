//! Sequential scan over a relation heap file.

use crate::disk::DiskManager;
use crate::heap::file::HeapFile;
use crate::heap::page::{HeapPage, SlotId};
use crate::tuple::RecordId;
use burrow_common::page::PageId;
use burrow_common::Result;
use bytes::Bytes;

/// Sequential reader over all records of a heap file.
///
/// Visits pages in allocation order and slots in slot order, which is
/// the order records were inserted. Each call pins and unpins the page
/// it touches; no pins are held between calls.
pub struct HeapScan<'a> {
    heap: &'a HeapFile,
    /// Page the cursor is on.
    page_num: u32,
    /// Next slot to look at within the current page.
    slot: u16,
    /// Page count snapshot taken when the scan was opened.
    num_pages: u32,
}

impl<'a> HeapScan<'a> {
    pub(crate) fn new(heap: &'a HeapFile) -> Result<Self> {
        let num_pages = heap.num_pages()?;
        Ok(Self {
            heap,
            page_num: DiskManager::FIRST_PAGE_NUM,
            slot: 0,
            num_pages,
        })
    }

    /// Returns the next record and its RecordId, or None at end of file.
    pub fn next_record(&mut self) -> Result<Option<(RecordId, Bytes)>> {
        while self.page_num < self.num_pages {
            let page_id = PageId::new(self.heap.file_id(), self.page_num);
            let frame = self.heap.buffer_manager().read_page(page_id)?;

            let found = {
                let data = frame.read_data();
                let slot_count = HeapPage::slot_count(&data[..]);
                let mut found = None;
                while self.slot < slot_count {
                    let slot_id = SlotId(self.slot);
                    self.slot += 1;
                    if let Some(record) = HeapPage::record(&data[..], slot_id) {
                        found = Some((
                            RecordId::new(self.page_num, slot_id.0),
                            Bytes::copy_from_slice(record),
                        ));
                        break;
                    }
                }
                found
            };

            self.heap.buffer_manager().unpin_page(page_id, false);

            if found.is_some() {
                return Ok(found);
            }

            // Page exhausted, move to the next one
            self.page_num += 1;
            self.slot = 0;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManagerConfig;
    use crate::pager::BufferManager;
    use burrow_buffer::{BufferPool, BufferPoolConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn create_test_heap(num_frames: usize) -> (HeapFile, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(BufferPoolConfig { num_frames }));
        let bufmgr = BufferManager::new(disk, pool);
        let heap = HeapFile::create(bufmgr, "rel").unwrap();
        (heap, dir)
    }

    #[test]
    fn test_scan_empty_file() {
        let (heap, _dir) = create_test_heap(16);
        let mut scan = heap.scan().unwrap();
        assert!(scan.next_record().unwrap().is_none());
    }

    #[test]
    fn test_scan_returns_records_in_insert_order() {
        let (mut heap, _dir) = create_test_heap(16);

        let mut expected = Vec::new();
        for i in 0..50u32 {
            let record = format!("record-{i:04}");
            let rid = heap.insert(record.as_bytes()).unwrap();
            expected.push((rid, record));
        }

        let mut scan = heap.scan().unwrap();
        let mut seen = Vec::new();
        while let Some((rid, bytes)) = scan.next_record().unwrap() {
            seen.push((rid, String::from_utf8(bytes.to_vec()).unwrap()));
        }

        assert_eq!(seen, expected);
    }

    #[test]
    fn test_scan_crosses_page_boundaries() {
        let (mut heap, _dir) = create_test_heap(16);

        // 1000-byte records: 4 per page, so 10 records span 3 pages
        let mut expected_rids = Vec::new();
        for i in 0..10u8 {
            let record = vec![i; 1000];
            expected_rids.push(heap.insert(&record).unwrap());
        }

        let mut scan = heap.scan().unwrap();
        let mut count = 0;
        while let Some((rid, bytes)) = scan.next_record().unwrap() {
            assert_eq!(rid, expected_rids[count]);
            assert_eq!(bytes[0], count as u8);
            assert_eq!(bytes.len(), 1000);
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_scan_holds_no_pins_between_calls() {
        let (mut heap, _dir) = create_test_heap(16);
        for i in 0..20u32 {
            heap.insert(&i.to_le_bytes()).unwrap();
        }

        let pool = Arc::clone(heap.buffer_manager().pool());
        let mut scan = heap.scan().unwrap();
        while scan.next_record().unwrap().is_some() {
            assert_eq!(pool.stats().pin_total, 0);
        }
        assert_eq!(pool.stats().pin_total, 0);
    }

    #[test]
    fn test_scan_exhaustion_is_stable() {
        let (mut heap, _dir) = create_test_heap(16);
        heap.insert(b"only").unwrap();

        let mut scan = heap.scan().unwrap();
        assert!(scan.next_record().unwrap().is_some());
        assert!(scan.next_record().unwrap().is_none());
        assert!(scan.next_record().unwrap().is_none());
    }
}
