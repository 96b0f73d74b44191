//! Fixed-size scratch memory shared by decode/process operations.

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::Error;

/// One contiguous reusable byte region with a single logical user at a time.
///
/// This is reset-on-checkout, not an allocator: each checkout discards
/// whatever the previous user left behind, so callers must never assume a
/// prior allocation's contents survive a new one.
pub struct ScratchPool {
    buf: Mutex<Vec<u8>>,
    capacity: usize,
}

/// Live checkout. Holding the guard is holding the pool.
#[derive(Debug)]
pub struct ScratchGuard<'a> {
    buf: MutexGuard<'a, Vec<u8>>,
}

impl ScratchPool {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "scratch pool initialized");
        Self {
            buf: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks the pool out for one operation, sized to `len` bytes (zeroed).
    pub fn checkout(&self, len: usize) -> Result<ScratchGuard<'_>, Error> {
        if len > self.capacity {
            return Err(Error::PoolExhausted {
                requested: len,
                capacity: self.capacity,
            });
        }
        let mut buf = self.buf.lock();
        // Reset for each new checkout: single operation at a time.
        buf.clear();
        buf.resize(len, 0);
        Ok(ScratchGuard { buf })
    }
}

impl ScratchGuard<'_> {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_past_capacity_fails() {
        let pool = ScratchPool::new(16);
        let err = pool.checkout(17).unwrap_err();
        assert!(matches!(
            err,
            Error::PoolExhausted {
                requested: 17,
                capacity: 16
            }
        ));
    }

    #[test]
    fn checkout_resets_previous_contents() {
        let pool = ScratchPool::new(16);
        {
            let mut guard = pool.checkout(4).unwrap();
            guard.as_mut_slice().copy_from_slice(&[9, 9, 9, 9]);
        }
        let guard = pool.checkout(4).unwrap();
        assert_eq!(guard.as_slice(), &[0, 0, 0, 0]);
    }

    #[test]
    fn guard_serializes_access() {
        let pool = ScratchPool::new(8);
        let guard = pool.checkout(8).unwrap();
        assert!(pool.buf.try_lock().is_none());
        drop(guard);
        assert!(pool.buf.try_lock().is_some());
    }
}
