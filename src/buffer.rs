//! Size-bucketed buffer reuse (spec.md §2 "Buffer pool"). Adapted
//! directly from the teacher's generic `Pool<T>`/`PooledItem<T>`
//! (`pool.rs`), adding size buckets so callers asking for a 512-byte
//! UDP datagram and a 64KiB TCP frame don't fight over the same free
//! list.

use parking_lot::Mutex;
use std::sync::Arc;

/// A free list of `T`s with a factory for new items and a reset hook run
/// before an item is returned to the pool.
pub struct Pool<T> {
    items: Arc<Mutex<Vec<T>>>,
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    reset: Arc<dyn Fn(&mut T) + Send + Sync>,
    max_size: usize,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            factory: Arc::clone(&self.factory),
            reset: Arc::clone(&self.reset),
            max_size: self.max_size,
        }
    }
}

impl<T> Pool<T> {
    pub fn new<F, R>(factory: F, reset: R, max_size: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Self {
            items: Arc::new(Mutex::new(Vec::with_capacity(max_size))),
            factory: Arc::new(factory),
            reset: Arc::new(reset),
            max_size,
        }
    }

    pub fn get(&self) -> PooledItem<T> {
        let item = self.items.lock().pop();
        let item = item.unwrap_or_else(|| (self.factory)());
        PooledItem { item: Some(item), pool: self.clone() }
    }

    fn put(&self, mut item: T) {
        (self.reset)(&mut item);
        let mut items = self.items.lock();
        if items.len() < self.max_size {
            items.push(item);
        }
    }
}

pub struct PooledItem<T> {
    item: Option<T>,
    pool: Pool<T>,
}

impl<T> std::ops::Deref for PooledItem<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.item.as_ref().unwrap()
    }
}

impl<T> std::ops::DerefMut for PooledItem<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.item.as_mut().unwrap()
    }
}

impl<T> Drop for PooledItem<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

/// Buckets of `Pool<Vec<u8>>` keyed by capacity, so a listener can ask
/// for "a buffer big enough for this transport" without every transport
/// sharing (and contending over) one pool.
pub struct BufferPool {
    buckets: Vec<(usize, Pool<Vec<u8>>)>,
}

impl BufferPool {
    /// `sizes` must be ascending; the smallest bucket that fits the
    /// request is used, falling back to an unpooled allocation above the
    /// largest bucket (e.g. a DoH body larger than any configured size).
    pub fn new(sizes: &[usize], max_per_bucket: usize) -> Self {
        let buckets = sizes
            .iter()
            .map(|&size| {
                let pool = Pool::new(move || vec![0u8; size], |buf: &mut Vec<u8>| buf.clear(), max_per_bucket);
                (size, pool)
            })
            .collect();
        Self { buckets }
    }

    pub fn get(&self, min_size: usize) -> PooledItem<Vec<u8>> {
        for (size, pool) in &self.buckets {
            if *size >= min_size {
                return pool.get();
            }
        }
        let pool = Pool::new(move || vec![0u8; min_size], |buf: &mut Vec<u8>| buf.clear(), 0);
        pool.get()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        // 512 covers default UDP, 1232 the common EDNS0 size, 4096/65535
        // cover TCP/DoH/DoQ framing.
        Self::new(&[512, 1232, 4096, 65535], 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_buffer_is_cleared() {
        let pool: Pool<Vec<u8>> = Pool::new(|| Vec::with_capacity(16), |b| b.clear(), 4);
        let mut first = pool.get();
        first.extend_from_slice(b"abcd");
        drop(first);
        let second = pool.get();
        assert!(second.is_empty());
        assert!(second.capacity() >= 16);
    }

    #[test]
    fn buffer_pool_picks_smallest_fitting_bucket() {
        let bp = BufferPool::new(&[512, 4096], 4);
        let buf = bp.get(1000);
        assert_eq!(buf.len(), 4096);
        let small = bp.get(100);
        assert_eq!(small.len(), 512);
    }

    #[test]
    fn buffer_pool_falls_back_above_largest_bucket() {
        let bp = BufferPool::new(&[512], 4);
        let buf = bp.get(10_000);
        assert_eq!(buf.len(), 10_000);
    }
}
