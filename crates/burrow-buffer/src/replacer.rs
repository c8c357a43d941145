//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// The pool decides which frames are actually evictable (pin count zero);
/// the replacer only decides among them.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction among frames the predicate
    /// accepts. Returns None if no candidate is accepted.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets any replacement state for a frame (frame returned to the
    /// free list).
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm implementation.
///
/// Reference bits are atomics so access recording stays lock-free; only
/// the clock hand is behind a mutex.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits: Vec<AtomicBool> =
            (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();
        let num_frames = self.num_frames;

        // First rotation clears reference bits, second finds the victim.
        for _ in 0..(2 * num_frames) {
            let pos = *hand;
            *hand = (pos + 1) % num_frames;

            let frame_id = FrameId(pos as u32);
            if !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[pos].load(Ordering::Relaxed) {
                self.reference_bits[pos].store(false, Ordering::Relaxed);
            } else {
                return Some(frame_id);
            }
        }

        // Every candidate kept its reference bit refreshed mid-sweep;
        // fall back to the first one the predicate accepts.
        (0..num_frames)
            .map(|i| FrameId(i as u32))
            .find(|&fid| can_evict(fid))
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}
