use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Buffers kept per capacity class once they are returned.
const DEFAULT_MAX_RETAINED_PER_CLASS: usize = 16;

/// Counters describing pool traffic since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub rented: u64,
    pub returned: u64,
    pub allocated: u64,
}

impl PoolStats {
    /// Buffers currently borrowed and not yet given back.
    pub fn outstanding(&self) -> u64 {
        self.rented - self.returned
    }
}

/// Shared pool of chunk buffers, safe to borrow from and return to across
/// concurrent transfers.
///
/// Buffers are grouped by capacity class (the next power of two of the
/// requested size), so a borrowed buffer may be larger than requested. Only
/// the requested length is ever exposed through [`ChunkBuffer`].
#[derive(Debug)]
pub struct BufferPool {
    classes: DashMap<usize, Vec<Vec<u8>>>,
    max_retained_per_class: usize,
    rented: AtomicU64,
    returned: AtomicU64,
    allocated: AtomicU64,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETAINED_PER_CLASS)
    }
}

impl BufferPool {
    pub fn new(max_retained_per_class: usize) -> Self {
        Self {
            classes: DashMap::new(),
            max_retained_per_class,
            rented: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Borrows a buffer of at least `len` bytes. It goes back to the pool when
    /// the returned guard is dropped.
    pub fn rent(self: &Arc<Self>, len: usize) -> ChunkBuffer {
        let class = capacity_class(len);
        let reused = self.classes.get_mut(&class).and_then(|mut free| free.pop());
        let bytes = match reused {
            Some(bytes) => bytes,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0; class]
            }
        };
        self.rented.fetch_add(1, Ordering::Relaxed);
        ChunkBuffer { bytes, len, pool: Some(self.clone()) }
    }

    fn give_back(&self, bytes: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        let mut free = self.classes.entry(bytes.len()).or_default();
        if free.len() < self.max_retained_per_class {
            free.push(bytes);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rented: self.rented.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
        }
    }

    /// Number of idle buffers currently held.
    pub fn retained(&self) -> usize {
        self.classes.iter().map(|class| class.value().len()).sum()
    }
}

fn capacity_class(len: usize) -> usize {
    len.max(1).next_power_of_two()
}

/// A fixed-size chunk buffer, either borrowed from a [`BufferPool`] or
/// allocated for a single transfer.
///
/// Derefs to exactly the requested length, whatever the capacity behind it.
/// A pooled buffer is returned to its pool when dropped.
#[derive(Debug)]
pub struct ChunkBuffer {
    bytes: Vec<u8>,
    len: usize,
    pool: Option<Arc<BufferPool>>,
}

impl ChunkBuffer {
    pub fn fresh(len: usize) -> Self {
        Self { bytes: vec![0; len], len, pool: None }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }
}

impl Deref for ChunkBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl DerefMut for ChunkBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }
}

impl Drop for ChunkBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.give_back(std::mem::take(&mut self.bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_exposes_requested_length_only() {
        let pool = BufferPool::shared();
        let buffer = pool.rent(1000);
        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.capacity(), 1024);
        assert!(buffer.is_pooled());
    }

    #[test]
    fn test_drop_returns_and_reuses() {
        let pool = BufferPool::shared();
        {
            let mut buffer = pool.rent(100);
            buffer[..3].copy_from_slice(b"abc");
        }
        assert_eq!(pool.stats(), PoolStats { rented: 1, returned: 1, allocated: 1 });
        assert_eq!(pool.retained(), 1);

        let again = pool.rent(120);
        // residue from the previous borrower is still there, callers only
        // ever send the prefix they filled
        assert_eq!(&again[..3], b"abc");
        assert_eq!(pool.stats().allocated, 1);
        drop(again);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn test_retention_is_bounded() {
        let pool = Arc::new(BufferPool::new(2));
        let held: Vec<ChunkBuffer> = (0..5).map(|_| pool.rent(64)).collect();
        drop(held);
        assert_eq!(pool.retained(), 2);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn test_fresh_buffer_is_not_pooled() {
        let buffer = ChunkBuffer::fresh(10);
        assert!(!buffer.is_pooled());
        assert_eq!(buffer.capacity(), 10);
    }

    #[test]
    fn test_concurrent_borrowers() {
        let pool = BufferPool::shared();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut buffer = pool.rent(4096);
                        buffer[0] = 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.rented, 800);
        assert_eq!(stats.returned, 800);
    }
}
