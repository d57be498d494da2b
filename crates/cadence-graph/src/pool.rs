//! Lock-free pool of reusable audio buffers.
//!
//! Buffers are grouped into buckets by exact [`BufferSize`]. Each bucket is a
//! bounded `crossbeam` [`ArrayQueue`], so any worker can allocate or release
//! concurrently without taking a lock. Buckets are created once (at plan
//! preparation, or on the first release of a new size) and never removed.
//!
//! ```text
//!   allocate(2x512) ──► bucket 2x512 ──pop──► reuse
//!                  └──► smallest bucket that fits ──pop──► reuse
//!                  └──► heap (counted as an allocation)
//!   release(buf)    ──► bucket of buf.size() ──push──► free list
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;

use crate::buffer::{AudioBuffer, BufferSize};

/// Maximum number of distinct buffer sizes the pool tracks.
pub const MAX_BUCKETS: usize = 32;

/// Default number of free buffers held per bucket.
pub const DEFAULT_BUCKET_CAPACITY: usize = 256;

struct Bucket {
    size: BufferSize,
    free: ArrayQueue<AudioBuffer>,
    created: AtomicUsize,
}

impl Bucket {
    fn new(size: BufferSize, capacity: usize) -> Self {
        Self {
            size,
            free: ArrayQueue::new(capacity.max(1)),
            created: AtomicUsize::new(0),
        }
    }
}

/// Snapshot of pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers created on the heap by `allocate` because no free buffer fitted.
    pub allocations: usize,
    /// Allocations served from a free list.
    pub reuses: usize,
    /// Buffers currently sitting in free lists.
    pub free: usize,
}

/// Shared pool of audio buffers, safe to use from any thread.
pub struct AudioBufferPool {
    buckets: Box<[OnceLock<Bucket>]>,
    bucket_capacity: usize,
    allocations: AtomicUsize,
    reuses: AtomicUsize,
}

impl Default for AudioBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_CAPACITY)
    }
}

impl std::fmt::Debug for AudioBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBufferPool")
            .field("buckets", &self.bucket_sizes())
            .field("stats", &self.stats())
            .finish()
    }
}

impl AudioBufferPool {
    /// Creates an empty pool whose buckets hold up to `bucket_capacity` free buffers.
    pub fn new(bucket_capacity: usize) -> Self {
        Self {
            buckets: (0..MAX_BUCKETS).map(|_| OnceLock::new()).collect(),
            bucket_capacity: bucket_capacity.max(1),
            allocations: AtomicUsize::new(0),
            reuses: AtomicUsize::new(0),
        }
    }

    // Buckets are claimed in slot order, so the first empty slot ends the scan.
    fn existing(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter().map_while(OnceLock::get)
    }

    fn bucket_for(&self, size: BufferSize, capacity: usize) -> Option<&Bucket> {
        for slot in self.buckets.iter() {
            let bucket = slot.get_or_init(|| Bucket::new(size, capacity));
            if bucket.size == size {
                return Some(bucket);
            }
        }
        None
    }

    /// Returns a zeroed buffer at least as large as `size`.
    ///
    /// Prefers a free buffer of exactly `size`, then the smallest free buffer
    /// that fits, and only allocates when neither is available.
    pub fn allocate(&self, size: BufferSize) -> AudioBuffer {
        let mut best: Option<&Bucket> = None;
        for bucket in self.existing() {
            if bucket.size == size {
                if let Some(buffer) = bucket.free.pop() {
                    return self.reused(buffer);
                }
            } else if bucket.size.fits(size)
                && !bucket.free.is_empty()
                && best.is_none_or(|b| bucket.size.sample_count() < b.size.sample_count())
            {
                best = Some(bucket);
            }
        }

        if let Some(buffer) = best.and_then(|b| b.free.pop()) {
            return self.reused(buffer);
        }

        self.allocations.fetch_add(1, Ordering::Relaxed);
        if let Some(bucket) = self.existing().find(|b| b.size == size) {
            bucket.created.fetch_add(1, Ordering::Relaxed);
        }
        AudioBuffer::new(size)
    }

    fn reused(&self, mut buffer: AudioBuffer) -> AudioBuffer {
        self.reuses.fetch_add(1, Ordering::Relaxed);
        buffer.clear();
        buffer
    }

    /// Returns a buffer to the free list of its own size.
    ///
    /// The buffer is dropped if that free list is full or the pool already
    /// tracks [`MAX_BUCKETS`] other sizes.
    pub fn release(&self, buffer: AudioBuffer) {
        if let Some(bucket) = self.bucket_for(buffer.size(), self.bucket_capacity) {
            let _ = bucket.free.push(buffer);
        }
    }

    /// Makes sure at least `count` buffers of `size` exist in circulation.
    ///
    /// Called off the audio thread when a plan is prepared so that processing
    /// a block never has to allocate.
    pub fn reserve(&self, size: BufferSize, count: usize) {
        let Some(bucket) = self.bucket_for(size, self.bucket_capacity.max(count)) else {
            #[cfg(feature = "tracing")]
            tracing::warn!("buffer pool: no bucket left for {}x{}", size.channels, size.frames);
            return;
        };
        while bucket.created.load(Ordering::Relaxed) < count {
            if bucket.free.push(AudioBuffer::new(size)).is_err() {
                break;
            }
            bucket.created.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sizes of the buckets created so far, in creation order.
    pub fn bucket_sizes(&self) -> Vec<BufferSize> {
        self.existing().map(|b| b.size).collect()
    }

    /// Returns the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            free: self.existing().map(|b| b.free.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const STEREO: BufferSize = BufferSize::new(2, 512);

    #[test]
    fn test_round_trip_does_not_allocate_twice() {
        let pool = AudioBufferPool::default();
        let buf = pool.allocate(STEREO);
        assert_eq!(pool.stats().allocations, 1);
        pool.release(buf);
        let again = pool.allocate(STEREO);
        assert_eq!(again.size(), STEREO);
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
    }

    #[test]
    fn test_reused_buffer_is_zeroed() {
        let pool = AudioBufferPool::default();
        let mut buf = pool.allocate(STEREO);
        buf.channel_mut(1).fill(0.75);
        pool.release(buf);
        let buf = pool.allocate(STEREO);
        assert!(buf.channel(1).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_prefers_exact_then_smallest_fit() {
        let pool = AudioBufferPool::default();
        pool.release(AudioBuffer::new(BufferSize::new(8, 1024)));
        pool.release(AudioBuffer::new(BufferSize::new(2, 1024)));

        let buf = pool.allocate(BufferSize::new(1, 512));
        assert_eq!(buf.size(), BufferSize::new(2, 1024));
        let buf = pool.allocate(BufferSize::new(1, 512));
        assert_eq!(buf.size(), BufferSize::new(8, 1024));
        assert_eq!(pool.stats().allocations, 0);

        let buf = pool.allocate(BufferSize::new(1, 512));
        assert_eq!(buf.size(), BufferSize::new(1, 512));
        assert_eq!(pool.stats().allocations, 1);
    }

    #[test]
    fn test_reserve_tops_up() {
        let pool = AudioBufferPool::new(8);
        pool.reserve(STEREO, 3);
        assert_eq!(pool.stats().free, 3);
        pool.reserve(STEREO, 3);
        assert_eq!(pool.stats().free, 3);
        pool.reserve(STEREO, 5);
        assert_eq!(pool.stats().free, 5);

        let held: Vec<_> = (0..5).map(|_| pool.allocate(STEREO)).collect();
        assert_eq!(pool.stats().allocations, 0);
        for b in held {
            pool.release(b);
        }
        assert_eq!(pool.stats().free, 5);
    }

    #[test]
    fn test_bucket_table_is_bounded() {
        let pool = AudioBufferPool::new(1);
        for frames in 1..=(MAX_BUCKETS + 4) {
            pool.release(AudioBuffer::new(BufferSize::new(1, frames)));
        }
        assert_eq!(pool.bucket_sizes().len(), MAX_BUCKETS);
    }

    #[test]
    fn test_concurrent_allocate_release() {
        let pool = Arc::new(AudioBufferPool::default());
        pool.reserve(STEREO, 16);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let buf = pool.allocate(STEREO);
                        pool.release(buf);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.stats().allocations, 0);
        assert_eq!(pool.stats().free, 16);
    }
}
