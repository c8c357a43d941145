//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use burrow_common::page::{PageId, PAGE_SIZE};
use burrow_common::{BurrowError, Result};
use parking_lot::Mutex;

/// A dirty page displaced by eviction.
///
/// The pool has no I/O path of its own; whoever triggered the eviction
/// owns writing these bytes back to disk.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Fixed-size cache of page frames.
///
/// Frames are handed out lazily: a watermark walks the frame array the
/// first time each frame is needed, frames given back by `delete_page`
/// wait on a reclaim list, and once both sources run dry the clock
/// replacer recycles an unpinned resident frame.
pub struct BufferPool {
    /// All frames, allocated up front.
    frames: Box<[BufferFrame]>,
    /// Which frame holds which resident page.
    page_table: PageTable,
    /// Frame hand-out state.
    alloc: Mutex<FrameAllocator>,
    /// Victim selection among resident, unpinned frames.
    replacer: ClockReplacer,
}

/// Tracks the frames that can be handed out without evicting anybody.
struct FrameAllocator {
    /// Frames at or past this index have never held a page.
    next_fresh: usize,
    /// Frames returned by delete_page, ready for reuse.
    reclaimed: Vec<FrameId>,
}

impl FrameAllocator {
    fn take(&mut self, total: usize) -> Option<FrameId> {
        if self.next_fresh < total {
            let frame_id = FrameId(self.next_fresh as u32);
            self.next_fresh += 1;
            return Some(frame_id);
        }
        self.reclaimed.pop()
    }

    fn available(&self, total: usize) -> usize {
        total - self.next_fresh + self.reclaimed.len()
    }
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;
        let frames: Box<[BufferFrame]> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        Self {
            frames,
            page_table: PageTable::new(num_frames),
            alloc: Mutex::new(FrameAllocator {
                next_fresh: 0,
                reclaimed: Vec::new(),
            }),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns how many frames can be handed out without an eviction.
    pub fn free_count(&self) -> usize {
        self.alloc.lock().available(self.frames.len())
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    #[inline]
    fn frame(&self, frame_id: FrameId) -> &BufferFrame {
        &self.frames[frame_id.0 as usize]
    }

    /// Pins and returns the frame of a resident page, or None on a miss.
    #[inline]
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = self.frame(frame_id);
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Detaches a frame from the page it holds, handing the bytes back
    /// when they changed since they were loaded.
    fn detach(&self, frame_id: FrameId) -> Option<EvictedPage> {
        let frame = self.frame(frame_id);
        let page_id = frame.page_id()?;
        self.page_table.remove(page_id);

        if !frame.is_dirty() {
            return None;
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(&frame.read_data()[..]);
        Some(EvictedPage { page_id, data })
    }

    /// Finds a frame for a page about to become resident: fresh and
    /// reclaimed frames first, then a clock victim.
    fn acquire_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.alloc.lock().take(self.frames.len()) {
            return Ok((frame_id, None));
        }

        let victim = self
            .replacer
            .evict(&|fid| {
                let frame = self.frame(fid);
                !frame.is_empty() && frame.pin_count() == 0
            })
            .ok_or(BurrowError::BufferPoolFull)?;
        let spilled = self.detach(victim);
        Ok((victim, spilled))
    }

    /// Makes a page resident in a zeroed frame and pins it.
    ///
    /// An already-resident page is pinned and returned as-is. The second
    /// element is a displaced dirty page the caller must write to disk.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame) = self.fetch_page(page_id) {
            return Ok((frame, None));
        }

        let (frame_id, spilled) = self.acquire_frame()?;
        let frame = self.frame(frame_id);
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);
        self.page_table.insert(page_id, frame_id);

        Ok((frame, spilled))
    }

    /// Makes a page resident with the given on-disk bytes and pins it.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, spilled) = self.new_page(page_id)?;
        frame.write_data().copy_from_slice(data);
        Ok((frame, spilled))
    }

    /// Drops one pin, recording whether the holder changed the bytes.
    ///
    /// A page whose pin count reaches zero becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = self.frame(frame_id);
            if dirty {
                frame.set_dirty(true);
            }
            frame.unpin();
        }
    }

    fn flush_frame(
        &self,
        page_id: PageId,
        frame: &BufferFrame,
        flush_fn: &mut dyn FnMut(PageId, &[u8]) -> Result<()>,
    ) -> Result<bool> {
        if !frame.is_dirty() {
            return Ok(false);
        }
        flush_fn(page_id, &frame.read_data()[..])?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes one page through the callback if it is dirty.
    ///
    /// Returns true if the page was flushed.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        match self.page_table.get(page_id) {
            Some(frame_id) => self.flush_frame(page_id, self.frame(frame_id), &mut flush_fn),
            None => Ok(false),
        }
    }

    /// Writes every dirty resident page of one file through the callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_file<F>(&self, file_id: u32, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut flushed = 0;
        for frame in self.frames.iter() {
            if let Some(page_id) = frame.page_id() {
                if page_id.file_id == file_id && self.flush_frame(page_id, frame, &mut flush_fn)? {
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    /// Writes every dirty resident page through the callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut flushed = 0;
        for frame in self.frames.iter() {
            if let Some(page_id) = frame.page_id() {
                if self.flush_frame(page_id, frame, &mut flush_fn)? {
                    flushed += 1;
                }
            }
        }
        Ok(flushed)
    }

    /// Evicts a page without keeping its contents.
    ///
    /// Returns false when the page is pinned or not resident.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let Some(frame_id) = self.page_table.get(page_id) else {
            return false;
        };
        let frame = self.frame(frame_id);
        if frame.is_pinned() {
            return false;
        }

        self.page_table.remove(page_id);
        self.replacer.remove(frame_id);
        frame.reset();
        self.alloc.lock().reclaimed.push(frame_id);
        true
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut used = 0;
        let mut pinned = 0;
        let mut dirty = 0;
        let mut pin_total = 0;

        for frame in self.frames.iter() {
            if frame.is_empty() {
                continue;
            }
            used += 1;
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
            pin_total += frame.pin_count() as usize;
        }

        BufferPoolStats {
            total_frames: self.frames.len(),
            free_frames: self.free_count(),
            used_frames: used,
            pinned_frames: pinned,
            dirty_frames: dirty,
            pin_total,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of frames never used or reclaimed.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Sum of all pin counts across frames.
    pub pin_total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_existing() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let pool = create_test_pool(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        assert!(frame.is_pinned());

        pool.unpin_page(page_id, false);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_eviction() {
        let pool = create_test_pool(3);

        // Fill the pool
        for i in 1..=3 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }

        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.page_count(), 3);

        // Add one more page, should evict
        let new_page_id = PageId::new(0, 99);
        let (_, evicted) = pool.new_page(new_page_id).unwrap();

        assert!(evicted.is_none()); // Evicted page was clean
        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(new_page_id));
    }

    #[test]
    fn test_buffer_pool_eviction_dirty() {
        let pool = create_test_pool(1);
        let page_id1 = PageId::new(0, 1);

        // Add dirty page with some data
        let (frame, _) = pool.new_page(page_id1).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(page_id1, true);

        // Add another page, should evict the dirty page
        let page_id2 = PageId::new(0, 2);
        let (_, evicted) = pool.new_page(page_id2).unwrap();

        let evicted = evicted.expect("dirty page should be returned on eviction");
        assert_eq!(evicted.page_id, page_id1);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let pool = create_test_pool(2);

        // Fill pool with pinned pages
        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(BurrowError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.contains(page_id));
        assert!(pool.delete_page(page_id));
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        // Don't unpin

        assert!(!pool.delete_page(page_id));
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_reuses_reclaimed_frames() {
        let pool = create_test_pool(2);

        // Use both frames, then free one
        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.unpin_page(PageId::new(0, 1), false);
        pool.new_page(PageId::new(0, 2)).unwrap();
        pool.unpin_page(PageId::new(0, 2), false);
        pool.delete_page(PageId::new(0, 1));
        assert_eq!(pool.free_count(), 1);

        // The next page lands in the reclaimed frame, evicting nothing
        let (_, evicted) = pool.new_page(PageId::new(0, 3)).unwrap();
        assert!(evicted.is_none());
        assert!(pool.contains(PageId::new(0, 2)));
        assert!(pool.contains(PageId::new(0, 3)));
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn test_buffer_pool_load_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);
        let data = [0xABu8; PAGE_SIZE];

        let (frame, _) = pool.load_page(page_id, &data).unwrap();

        let frame_data = frame.read_data();
        assert_eq!(frame_data[0], 0xAB);
        assert_eq!(frame_data[PAGE_SIZE - 1], 0xAB);
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let mut flushed_pages = vec![];
        let result = pool.flush_page(page_id, |pid, _data| {
            flushed_pages.push(pid);
            Ok(())
        });

        assert!(result.unwrap());
        assert_eq!(flushed_pages, vec![page_id]);

        // Page should no longer be dirty
        let frame = pool.fetch_page(page_id).unwrap();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_file() {
        let pool = create_test_pool(10);

        // Dirty pages in two files
        for i in 1..=3 {
            let page_id = PageId::new(7, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }
        let other = PageId::new(8, 1);
        pool.new_page(other).unwrap();
        pool.unpin_page(other, true);

        let mut flushed = vec![];
        let count = pool
            .flush_file(7, |pid, _| {
                flushed.push(pid);
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 3);
        assert!(flushed.iter().all(|pid| pid.file_id == 7));

        // File 8's page remains dirty
        let frame = pool.fetch_page(other).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let pool = create_test_pool(10);

        for i in 1..=5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }

        let mut flushed_count = 0;
        let result = pool.flush_all(|_pid, _data| {
            flushed_count += 1;
            Ok(())
        });

        assert_eq!(result.unwrap(), 5);
        assert_eq!(flushed_count, 5);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = create_test_pool(10);

        for i in 0..5 {
            let page_id = PageId::new(0, i + 1);
            pool.new_page(page_id).unwrap();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true); // Dirty
            }
            // Odd pages remain pinned
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 3);
        assert_eq!(stats.pin_total, 2);
    }

    #[test]
    fn test_buffer_pool_duplicate_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        // Adding same page again returns the existing frame
        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(pool.page_count(), 1);
    }
}
