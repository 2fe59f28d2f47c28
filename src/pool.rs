//! A small capacity-keyed free list, shared by the span record iterator and
//! the dBASE IV memo reader for record/block buffers larger than 1 KiB.
//!
//! Buffers are returned to the pool when their [`PooledBuffer`] guard drops,
//! including during unwinding, so a panic mid-iteration does not leak the
//! allocation.

use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    free: Mutex<Vec<Vec<u8>>>,
}

/// Threshold below which callers should just allocate directly; pooling a
/// handful of bytes costs more in locking than it saves in allocation.
pub const POOLING_THRESHOLD: usize = 1024;

#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            inner: Arc::new(Inner::default()),
        }
    }

    /// Rent a zero-filled buffer of exactly `len` bytes.
    pub fn rent(&self, len: usize) -> PooledBuffer {
        let mut free = self.inner.free.lock().unwrap();
        let mut buf = match free.iter().position(|b| b.capacity() >= len) {
            Some(pos) => free.swap_remove(pos),
            None => Vec::with_capacity(len),
        };
        drop(free);
        buf.clear();
        buf.resize(len, 0);
        PooledBuffer {
            pool: self.clone(),
            buf: Some(buf),
        }
    }

    fn give_back(&self, buf: Vec<u8>) {
        let mut free = self.inner.free.lock().unwrap();
        if free.len() < 16 {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An owned, pool-backed buffer. Derefs to `[u8]`; returns itself to the
/// pool on drop.
pub struct PooledBuffer {
    pool: BufferPool,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap()
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}
