//! Reusable needle buffers for the read/write hot path.
//!
//! Every request borrows a needle record from a process-wide pool instead
//! of allocating a fresh payload buffer. The borrow is scoped: the guard
//! returns the record on drop, on every exit path, so a record is never
//! used by two callers at once.

use std::sync::{Arc, Mutex};

use super::record::Needle;

/// Default cap on pooled records; extras from a burst are simply dropped.
const DEFAULT_POOL_CAPACITY: usize = 128;

/// A shared free list of needle records.
pub struct NeedlePool {
    free: Mutex<Vec<Needle>>,
    capacity: usize,
}

impl NeedlePool {
    /// Create a pool retaining at most `capacity` idle records.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            capacity,
        })
    }

    /// Create a pool with the default retention cap.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Borrow a reset record from the pool, allocating one if it is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledNeedle {
        let needle = {
            let mut free = self.free.lock().expect("needle pool lock poisoned");
            free.pop()
        };
        let mut needle = needle.unwrap_or_default();
        needle.reset();
        PooledNeedle {
            pool: Arc::clone(self),
            needle: Some(needle),
        }
    }

    /// Number of idle records currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().expect("needle pool lock poisoned").len()
    }

    fn release(&self, needle: Needle) {
        let mut free = self.free.lock().expect("needle pool lock poisoned");
        if free.len() < self.capacity {
            free.push(needle);
        }
    }
}

/// Exclusive borrow of a pooled needle record.
///
/// Dereferences to [`Needle`]; the record goes back to the pool when the
/// guard is dropped, keeping its payload buffer's capacity for reuse.
pub struct PooledNeedle {
    pool: Arc<NeedlePool>,
    needle: Option<Needle>,
}

impl std::ops::Deref for PooledNeedle {
    type Target = Needle;

    fn deref(&self) -> &Needle {
        self.needle.as_ref().expect("pooled needle already released")
    }
}

impl std::ops::DerefMut for PooledNeedle {
    fn deref_mut(&mut self) -> &mut Needle {
        self.needle.as_mut().expect("pooled needle already released")
    }
}

impl Drop for PooledNeedle {
    fn drop(&mut self) {
        if let Some(needle) = self.needle.take() {
            self.pool.release(needle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needle::record::Flag;

    #[test]
    fn test_acquire_returns_reset_record() {
        let pool = NeedlePool::new();
        {
            let mut n = pool.acquire();
            n.key = 99;
            n.cookie = 7;
            n.flag = Flag::Deleted;
            n.data.extend_from_slice(b"leftover");
        }
        let n = pool.acquire();
        assert_eq!(n.key, 0);
        assert_eq!(n.cookie, 0);
        assert_eq!(n.flag, Flag::Normal);
        assert!(n.data.is_empty());
    }

    #[test]
    fn test_release_on_drop() {
        let pool = NeedlePool::new();
        assert_eq!(pool.idle(), 0);
        {
            let _n = pool.acquire();
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_buffer_capacity_survives_reuse() {
        let pool = NeedlePool::new();
        {
            let mut n = pool.acquire();
            n.data.extend_from_slice(&[0u8; 4096]);
        }
        let n = pool.acquire();
        assert!(n.data.is_empty());
        assert!(n.data.capacity() >= 4096);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = NeedlePool::with_capacity(2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_concurrent_borrows_are_distinct() {
        let pool = NeedlePool::new();
        let mut a = pool.acquire();
        let mut b = pool.acquire();
        a.key = 1;
        b.key = 2;
        assert_eq!(a.key, 1);
        assert_eq!(b.key, 2);
    }
}
