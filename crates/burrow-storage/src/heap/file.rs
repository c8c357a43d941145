//! HeapFile: relation record storage routed through the buffer manager.
//!
//! Pages are fetched from the pool, modified in memory, marked dirty on
//! unpin, and written back lazily (or on flush).

use crate::disk::{DiskManager, FileId};
use crate::heap::page::HeapPage;
use crate::heap::scan::HeapScan;
use crate::pager::BufferManager;
use crate::tuple::RecordId;
use burrow_common::page::PageId;
use burrow_common::{BurrowError, Result};

/// A relation heap file holding raw byte records in slotted pages.
pub struct HeapFile {
    /// Buffer manager all page access goes through.
    bufmgr: BufferManager,
    /// Disk manager file id of the heap file.
    file_id: FileId,
    /// Relation name (also the file name).
    name: String,
    /// Page currently being filled by inserts, if any.
    fill_page: Option<u32>,
}

impl HeapFile {
    /// Creates a new, empty relation heap file.
    pub fn create(bufmgr: BufferManager, name: &str) -> Result<Self> {
        let file_id = bufmgr.disk().create(name)?;
        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
            fill_page: None,
        })
    }

    /// Opens an existing relation heap file.
    ///
    /// Fails with `RelationNotFound` if no file with that name exists.
    pub fn open(bufmgr: BufferManager, name: &str) -> Result<Self> {
        let file_id = bufmgr
            .disk()
            .open(name)?
            .ok_or_else(|| BurrowError::RelationNotFound(name.to_string()))?;

        let num_pages = bufmgr.disk().num_pages(file_id)?;
        let fill_page = (num_pages > DiskManager::FIRST_PAGE_NUM).then(|| num_pages - 1);

        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
            fill_page,
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the disk manager file id.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Returns the buffer manager this heap file uses.
    pub fn buffer_manager(&self) -> &BufferManager {
        &self.bufmgr
    }

    /// Returns the number of pages in the file (including reserved page 0).
    pub fn num_pages(&self) -> Result<u32> {
        self.bufmgr.disk().num_pages(self.file_id)
    }

    /// Inserts a record, returning its RecordId.
    pub fn insert(&mut self, record: &[u8]) -> Result<RecordId> {
        if record.len() > HeapPage::MAX_RECORD_LEN {
            return Err(BurrowError::TupleTooLarge {
                size: record.len(),
                max: HeapPage::MAX_RECORD_LEN,
            });
        }

        // Try the current fill page first
        if let Some(page_num) = self.fill_page {
            let page_id = PageId::new(self.file_id, page_num);
            let frame = self.bufmgr.read_page(page_id)?;
            let slot = HeapPage::insert_record(&mut frame.write_data()[..], record);
            match slot {
                Some(slot) => {
                    self.bufmgr.unpin_page(page_id, true);
                    return Ok(RecordId::new(page_num, slot.0));
                }
                None => self.bufmgr.unpin_page(page_id, false),
            }
        }

        // Record did not fit (or no page yet): start a fresh page
        let (page_id, frame) = self.bufmgr.alloc_page(self.file_id)?;
        HeapPage::init(&mut frame.write_data()[..], page_id.page_num);
        let slot = HeapPage::insert_record(&mut frame.write_data()[..], record)
            .ok_or_else(|| {
                BurrowError::Internal("record does not fit on an empty page".to_string())
            })?;
        self.bufmgr.unpin_page(page_id, true);

        self.fill_page = Some(page_id.page_num);
        Ok(RecordId::new(page_id.page_num, slot.0))
    }

    /// Opens a sequential scan over all records in the file.
    pub fn scan(&self) -> Result<HeapScan<'_>> {
        HeapScan::new(self)
    }

    /// Writes all dirty buffered pages of this file to disk.
    pub fn flush(&self) -> Result<()> {
        self.bufmgr.flush_file(self.file_id)
    }
}
