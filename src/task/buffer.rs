//! Reference-counted media buffers and the recycling pool behind them.
//!
//! A `MediaBuffer` is cheap to clone: fanning one out to several consumers
//! shares the same allocation. Buffers handed out by a `BufferPool` return
//! their storage to the pool when the last reference is dropped.

use crate::task::error::{TaskError, TaskResult};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NO_PTS: i64 = i64::MIN;

struct BufferInner {
    data: Vec<u8>,
    pts: AtomicI64,
    recycle: Option<Sender<Vec<u8>>>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        if let Some(tx) = self.recycle.take() {
            let mut data = std::mem::take(&mut self.data);
            data.clear();
            // The pool may already be gone; storage is simply freed then.
            let _ = tx.try_send(data);
        }
    }
}

/// Opaque media payload shared by reference between producer and consumers.
#[derive(Clone)]
pub struct MediaBuffer {
    inner: Arc<BufferInner>,
}

impl MediaBuffer {
    /// Wrap an owned payload. The buffer is not pooled.
    pub fn new(data: Vec<u8>) -> Self {
        Self::from_parts(data, None)
    }

    /// Wrap a payload and stamp it with a presentation timestamp.
    pub fn with_pts(data: Vec<u8>, pts: i64) -> Self {
        let buffer = Self::new(data);
        buffer.set_pts(pts);
        buffer
    }

    fn from_parts(data: Vec<u8>, recycle: Option<Sender<Vec<u8>>>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                data,
                pts: AtomicI64::new(NO_PTS),
                recycle,
            }),
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Mutable access to the payload, only while this is the sole reference.
    pub fn data_mut(&mut self) -> Option<&mut Vec<u8>> {
        Arc::get_mut(&mut self.inner).map(|inner| &mut inner.data)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    pub fn pts(&self) -> Option<i64> {
        match self.inner.pts.load(Ordering::Acquire) {
            NO_PTS => None,
            pts => Some(pts),
        }
    }

    pub fn set_pts(&self, pts: i64) {
        self.inner.pts.store(pts, Ordering::Release);
    }

    /// Number of live references to this buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether two handles refer to the same allocation.
    pub fn ptr_eq(a: &MediaBuffer, b: &MediaBuffer) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn is_pooled(&self) -> bool {
        self.inner.recycle.is_some()
    }
}

impl std::fmt::Debug for MediaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBuffer")
            .field("len", &self.len())
            .field("pts", &self.pts())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Bounded pool of reusable buffer storage.
///
/// Acquisition is the one place a processing step may block; the wait is
/// bounded by the caller-supplied timeout.
#[derive(Clone)]
pub struct BufferPool {
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers of `buffer_size` bytes each.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (free_tx, free_rx) = bounded(capacity);
        while free_tx.try_send(Vec::with_capacity(buffer_size)).is_ok() {}
        Self {
            free_tx,
            free_rx,
            buffer_size,
            capacity,
        }
    }

    /// Take a buffer from the pool, resized to `size` bytes (`0` = default size).
    ///
    /// With `block`, waits up to `timeout` for a buffer to be recycled.
    pub fn acquire(&self, size: usize, block: bool, timeout: Duration) -> TaskResult<MediaBuffer> {
        let mut data = if block {
            match self.free_rx.recv_timeout(timeout) {
                Ok(data) => data,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(TaskError::BufferUnavailable(format!(
                        "timed out after {:?} waiting for a pooled buffer",
                        timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TaskError::BufferUnavailable("pool disconnected".to_string()))
                }
            }
        } else {
            match self.free_rx.try_recv() {
                Ok(data) => data,
                Err(TryRecvError::Empty) => {
                    return Err(TaskError::BufferUnavailable("pool exhausted".to_string()))
                }
                Err(TryRecvError::Disconnected) => {
                    return Err(TaskError::BufferUnavailable("pool disconnected".to_string()))
                }
            }
        };

        let size = if size == 0 { self.buffer_size } else { size };
        data.resize(size, 0);
        Ok(MediaBuffer::from_parts(data, Some(self.free_tx.clone())))
    }

    /// Buffers currently free for acquisition.
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
