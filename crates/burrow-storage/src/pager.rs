//! Buffer manager facade: pool-cached page access over the disk manager.
//!
//! All page I/O of the heap and index layers is routed through here.
//! `read_page` and `alloc_page` pin the returned frame; the caller owns
//! exactly one unpin per pin and reports through the dirty bit whether it
//! modified the page while pinned.

use crate::disk::{DiskManager, DiskManagerConfig, FileId};
use burrow_buffer::{BufferFrame, BufferPool, BufferPoolConfig, EvictedPage};
use burrow_common::page::{PageId, PAGE_SIZE};
use burrow_common::{BurrowError, Result, StorageConfig};
use std::sync::Arc;

/// Combines the disk manager and the buffer pool into the page access
/// surface consumed by HeapFile and BTreeIndex.
#[derive(Clone)]
pub struct BufferManager {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
}

impl BufferManager {
    /// Creates a new buffer manager over the given disk manager and pool.
    pub fn new(disk: Arc<DiskManager>, pool: Arc<BufferPool>) -> Self {
        Self { disk, pool }
    }

    /// Builds a disk manager and buffer pool from one storage config.
    ///
    /// The configured page size must match the compiled-in PAGE_SIZE;
    /// data files are not portable across page sizes.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        if config.page_size != PAGE_SIZE {
            return Err(BurrowError::PageSizeMismatch {
                expected: PAGE_SIZE,
                actual: config.page_size,
            });
        }
        let disk = Arc::new(DiskManager::new(DiskManagerConfig {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        })?);
        let pool = Arc::new(BufferPool::new(BufferPoolConfig {
            num_frames: config.buffer_pool_pages,
        }));
        Ok(Self::new(disk, pool))
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the underlying buffer pool.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Reads a page, loading it from disk on a pool miss. Pins the frame.
    pub fn read_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch_page(page_id) {
            return Ok(frame);
        }

        let data = self.disk.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &data)?;
        self.write_back(evicted)?;
        Ok(frame)
    }

    /// Allocates a new page at the end of the file and installs a zeroed
    /// frame for it. Pins the frame.
    pub fn alloc_page(&self, file_id: FileId) -> Result<(PageId, &BufferFrame)> {
        let page_id = self.disk.allocate_page(file_id)?;
        let (frame, evicted) = self.pool.new_page(page_id)?;
        self.write_back(evicted)?;
        Ok((page_id, frame))
    }

    /// Releases one pin on a page, recording whether its bytes changed
    /// during the pin.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) {
        self.pool.unpin_page(page_id, dirty);
    }

    /// Writes every dirty buffered page of a file back to disk and syncs
    /// the file.
    pub fn flush_file(&self, file_id: FileId) -> Result<()> {
        self.pool.flush_file(file_id, |page_id, data| {
            let mut buf = [0u8; PAGE_SIZE];
            buf.copy_from_slice(data);
            self.disk.write_page(page_id, &buf)
        })?;
        self.disk.flush(file_id)
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.disk.write_page(page.page_id, &page.data)?;
        }
        Ok(())
    }
}
