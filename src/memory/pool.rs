//! Bounded pool of reusable chunk buffers.
//!
//! The streaming strategy borrows one buffer per copy loop. Releasing the
//! pool drops every idle buffer, which is what a reclamation hint does.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pool of equally sized byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    released: AtomicUsize,
}

impl BufferPool {
    /// Create a pool that keeps at most `max_idle` buffers around.
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            released: AtomicUsize::new(0),
        }
    }

    /// Borrow a zeroed buffer of exactly `size` bytes.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let reused = self.lock().pop();
        match reused {
            Some(mut buf) => {
                buf.clear();
                buf.resize(size, 0);
                buf
            }
            None => vec![0; size],
        }
    }

    /// Return a buffer for reuse.
    pub fn release(&self, buf: Vec<u8>) {
        let mut idle = self.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Drop every idle buffer. Returns the bytes freed.
    pub fn release_all(&self) -> usize {
        let drained: Vec<Vec<u8>> = std::mem::take(&mut *self.lock());
        let bytes = drained.iter().map(Vec::capacity).sum();
        self.released.fetch_add(bytes, Ordering::Relaxed);
        bytes
    }

    /// Buffers currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    /// Total bytes dropped by [`BufferPool::release_all`].
    pub fn released_bytes(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(4)
    }
}
