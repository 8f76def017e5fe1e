//! A process-wide pool of fixed-size scratch buffers for the raw-socket
//! copy path, grounded on the original proxy's `BytePool` (a `sync.Pool`
//! of 32 KiB `[]byte`s): `acquire()` never blocks -- an empty pool just
//! allocates a fresh buffer -- and `release()` returns a buffer for reuse
//! without zeroing it.

use std::sync::Mutex;

const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

pub struct BufferPool {
    buffer_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Acquire a buffer, never blocking. Falls back to a fresh allocation
    /// when the pool is empty.
    pub fn acquire(&self) -> Vec<u8> {
        let mut free = self.free.lock().expect("buffer pool mutex poisoned");
        free.pop().unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    /// Return a buffer to the pool for reuse. Not zeroed.
    pub fn release(&self, buf: Vec<u8>) {
        let mut free = self.free.lock().expect("buffer pool mutex poisoned");
        free.push(buf);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_on_empty_pool_allocates_fresh() {
        let pool = BufferPool::new();
        let buf = pool.acquire();
        assert_eq!(buf.len(), DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn released_buffer_is_reused() {
        let pool = BufferPool::with_buffer_size(16);
        let mut buf = pool.acquire();
        buf[0] = 42;
        pool.release(buf);

        let reused = pool.acquire();
        assert_eq!(reused[0], 42, "released buffers are not zeroed");
        assert_eq!(pool.free.lock().unwrap().len(), 0);
    }
}
