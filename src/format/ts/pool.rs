use super::types::{INPUT_BUFFER_PADDING_SIZE, MAX_PES_PAYLOAD};
use crate::error::{Result, TsError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

const SIZE_CLASSES: usize = 32;
/// Idle buffers kept per size class
const MAX_FREE_PER_CLASS: usize = 8;

#[derive(Default)]
struct FreeLists {
    classes: Vec<Vec<Vec<u8>>>,
}

/// Power-of-two size-class pool for PES assembly buffers.
///
/// Buffers handed out as packet data go back to their class once the last
/// `Bytes` clone is dropped, as long as the pool still exists.
pub struct BufferPool {
    free: Arc<Mutex<FreeLists>>,
}

/// A writable assembly buffer borrowed from a [`BufferPool`].
pub struct PoolBuffer {
    data: Vec<u8>,
    class: usize,
    pool: Weak<Mutex<FreeLists>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free: Arc::new(Mutex::new(FreeLists {
                classes: vec![Vec::new(); SIZE_CLASSES],
            })),
        }
    }

    /// Size class for a payload of `size` bytes plus padding.
    pub fn class_index(size: usize) -> usize {
        let padded = size + INPUT_BUFFER_PADDING_SIZE;
        (usize::BITS - 1 - padded.leading_zeros()) as usize
    }

    /// Capacity of buffers in `class`.
    pub fn class_capacity(class: usize) -> usize {
        (2usize << class).min(MAX_PES_PAYLOAD + INPUT_BUFFER_PADDING_SIZE)
    }

    /// An empty buffer able to hold `size` bytes plus padding.
    pub fn get(&self, size: usize) -> Result<PoolBuffer> {
        let class = Self::class_index(size).min(SIZE_CLASSES - 1);
        let recycled = self.free.lock().classes[class].pop();
        let data = match recycled {
            Some(mut data) => {
                data.clear();
                data
            }
            None => {
                let mut data = Vec::new();
                data.try_reserve_exact(Self::class_capacity(class))
                    .map_err(|_| TsError::OutOfMemory)?;
                data
            }
        };
        Ok(PoolBuffer {
            data,
            class,
            pool: Arc::downgrade(&self.free),
        })
    }

    /// Idle buffers currently held.
    pub fn idle_buffers(&self) -> usize {
        self.free.lock().classes.iter().map(Vec::len).sum()
    }

    /// Frees every idle buffer.
    pub fn drain(&self) {
        for class in self.free.lock().classes.iter_mut() {
            class.clear();
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Room left before the buffer would have to grow.
    pub fn remaining_capacity(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Zero-pads the tail and hands the payload out as shared bytes.
    pub fn freeze(mut self) -> Bytes {
        let len = self.data.len();
        self.data.resize(len + INPUT_BUFFER_PADDING_SIZE, 0);
        Bytes::from_owner(self).slice(..len)
    }
}

impl AsRef<[u8]> for PoolBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut free = pool.lock();
            let class = &mut free.classes[self.class];
            if class.len() < MAX_FREE_PER_CLASS {
                class.push(std::mem::take(&mut self.data));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_class_sizes() {
        assert_eq!(BufferPool::class_index(0), 6);
        assert_eq!(BufferPool::class_capacity(6), 128);
        let class = BufferPool::class_index(1000);
        assert!(BufferPool::class_capacity(class) >= 1000 + INPUT_BUFFER_PADDING_SIZE);
        let class = BufferPool::class_index(MAX_PES_PAYLOAD);
        assert_eq!(
            BufferPool::class_capacity(class),
            MAX_PES_PAYLOAD + INPUT_BUFFER_PADDING_SIZE
        );
    }

    #[test]
    fn test_freeze_pads_and_recycles() {
        let pool = BufferPool::new();
        let mut buf = pool.get(100).unwrap();
        buf.extend_from_slice(&[7u8; 100]);
        let bytes = buf.freeze();
        assert_eq!(bytes.len(), 100);
        assert_eq!(pool.idle_buffers(), 0);

        let clone = bytes.clone();
        drop(bytes);
        assert_eq!(pool.idle_buffers(), 0);
        drop(clone);
        assert_eq!(pool.idle_buffers(), 1);

        let reused = pool.get(100).unwrap();
        assert!(reused.is_empty());
        assert_eq!(pool.idle_buffers(), 0);
    }

    #[test]
    fn test_packets_outlive_pool() {
        let pool = BufferPool::new();
        let mut buf = pool.get(10).unwrap();
        buf.extend_from_slice(b"0123456789");
        let bytes = buf.freeze();
        drop(pool);
        assert_eq!(&bytes[..], b"0123456789");
    }
}
