//! Byte ring buffer for streaming audio between a decoder and the output
//!
//! The buffer is deliberately NOT synchronized. When it is shared between
//! threads, wrap it in a [`SharedRingBuffer`] and hold the lock around every
//! call (or around a batch of calls). Keeping the lock outside lets a
//! consumer peek, remove and check the marker in one critical section.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::BufferError;

/// A position marker inside the stream of bytes passing through the buffer.
///
/// Markers are stored by absolute byte position (bytes ever removed plus the
/// offset into the valid region), so a full buffer never makes two positions
/// ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker {
    id: u32,
    abs_pos: u64,
}

/// Fixed-capacity byte ring buffer with deferred shrinking
#[derive(Debug, Default)]
pub struct RingBuffer {
    /// Backing store; empty when unallocated
    buffer: Vec<u8>,
    /// Start of the valid region
    valid_pos: usize,
    /// Number of readable bytes
    valid_bytes: usize,
    /// Capacity to shrink to once enough bytes are drained
    pending_shrink: Option<usize>,
    /// Total bytes ever removed from the front
    removed_total: u64,
    marker: Option<Marker>,
}

impl RingBuffer {
    /// Create an unallocated buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer and allocate `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        let mut buffer = Self::new();
        buffer.allocate(capacity)?;
        Ok(buffer)
    }

    /// (Re-)allocate the backing store and empty the buffer.
    ///
    /// On failure the buffer is left unallocated.
    pub fn allocate(&mut self, capacity: usize) -> Result<(), BufferError> {
        self.pending_shrink = None;

        if self.is_allocated() && self.capacity() == capacity {
            self.empty();
            return Ok(());
        }

        self.free();
        if capacity == 0 {
            return Ok(());
        }

        self.buffer = try_alloc(capacity).map_err(|e| {
            tracing::error!("Ring buffer allocation of {} bytes failed", capacity);
            e
        })?;
        Ok(())
    }

    /// Change the capacity without losing unread data.
    ///
    /// Growing, or shrinking to a size that still holds all valid bytes,
    /// happens immediately. Otherwise the new size is recorded and applied by
    /// the first [`remove_from_beg`](Self::remove_from_beg) or
    /// [`empty`](Self::empty) that drains enough bytes. Until then
    /// [`free_bytes`](Self::free_bytes) reports zero.
    pub fn resize(&mut self, capacity: usize) -> Result<(), BufferError> {
        self.pending_shrink = None;

        if !self.is_allocated() {
            return Err(BufferError::NotAllocated);
        }
        if capacity == 0 {
            return Err(BufferError::InvalidSize(capacity));
        }

        if capacity == self.capacity() {
            Ok(())
        } else if capacity < self.capacity() && self.valid_bytes > capacity {
            tracing::debug!(
                "Ring buffer shrink to {} deferred, {} bytes still valid",
                capacity,
                self.valid_bytes
            );
            self.pending_shrink = Some(capacity);
            Ok(())
        } else {
            self.resize_now(capacity)
        }
    }

    /// Release the backing store
    pub fn free(&mut self) {
        self.pending_shrink = None;
        self.buffer = Vec::new();
        self.empty();
    }

    /// Discard all valid bytes, keeping the allocation
    pub fn empty(&mut self) {
        self.valid_pos = 0;
        self.valid_bytes = 0;
        self.marker = None;
        self.resize_check();
    }

    /// Append bytes at the end.
    ///
    /// Data that does not fit is silently dropped; returns the number of
    /// bytes actually stored.
    pub fn push_to_end(&mut self, src: &[u8]) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0;
        }

        let count = src.len().min(self.free_bytes());
        if count == 0 {
            return 0;
        }

        let dest_pos = (self.valid_pos + self.valid_bytes) % capacity;
        if dest_pos + count > capacity {
            let at_end = capacity - dest_pos;
            self.buffer[dest_pos..].copy_from_slice(&src[..at_end]);
            self.buffer[..count - at_end].copy_from_slice(&src[at_end..count]);
        } else {
            self.buffer[dest_pos..dest_pos + count].copy_from_slice(&src[..count]);
        }

        self.valid_bytes += count;
        count
    }

    /// Copy `dest.len()` bytes starting `offset` bytes into the valid region.
    ///
    /// Bytes beyond the valid region are zero-filled. Returns the id of the
    /// marker lying inside the copied range, if any.
    pub fn peek_from_beg(&self, dest: &mut [u8], offset: usize) -> Option<u32> {
        if dest.is_empty() {
            return None;
        }

        if offset >= self.valid_bytes {
            dest.fill(0);
            return None;
        }

        let count = dest.len().min(self.valid_bytes - offset);
        dest[count..].fill(0);

        let capacity = self.capacity();
        let src_pos = (self.valid_pos + offset) % capacity;
        if src_pos + count > capacity {
            let at_end = capacity - src_pos;
            dest[..at_end].copy_from_slice(&self.buffer[src_pos..]);
            dest[at_end..count].copy_from_slice(&self.buffer[..count - at_end]);
        } else {
            dest[..count].copy_from_slice(&self.buffer[src_pos..src_pos + count]);
        }

        let start = self.removed_total + offset as u64;
        self.marker_in_range(start, count).map(|m| m.id)
    }

    /// Drop up to `count` bytes from the front; returns the bytes removed.
    pub fn remove_from_beg(&mut self, count: usize) -> usize {
        let count = count.min(self.valid_bytes);
        if count > 0 {
            if self.marker_in_range(self.removed_total, count).is_some() {
                self.marker = None;
            }

            self.valid_pos = (self.valid_pos + count) % self.capacity();
            self.valid_bytes -= count;
            self.removed_total += count as u64;
        }

        self.resize_check();
        count
    }

    /// Mark the byte that will be `offset` bytes after the current end.
    ///
    /// A marker id of `0` removes the marker.
    pub fn set_marker(&mut self, id: u32, offset: usize) {
        self.marker = (id != 0).then(|| Marker {
            id,
            abs_pos: self.removed_total + (self.valid_bytes + offset) as u64,
        });
    }

    pub fn remove_marker(&mut self) {
        self.marker = None;
    }

    /// Current marker id, if one is set
    pub fn marker(&self) -> Option<u32> {
        self.marker.map(|m| m.id)
    }

    pub fn is_allocated(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Total bytes of the backing store
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes available for reading
    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes
    }

    /// Bytes that can be pushed without truncation
    pub fn free_bytes(&self) -> usize {
        if self.pending_shrink.is_some() {
            0
        } else {
            self.capacity() - self.valid_bytes
        }
    }

    /// Capacity waiting to be applied, if a shrink was deferred
    pub fn pending_shrink(&self) -> Option<usize> {
        self.pending_shrink
    }

    fn resize_check(&mut self) {
        if let Some(capacity) = self.pending_shrink {
            if self.valid_bytes <= capacity {
                if let Err(e) = self.resize_now(capacity) {
                    // stays pending; retried on the next drain
                    tracing::warn!("Deferred ring buffer shrink failed: {}", e);
                }
            }
        }
    }

    fn resize_now(&mut self, capacity: usize) -> Result<(), BufferError> {
        let mut new_buffer = try_alloc(capacity)?;
        self.peek_from_beg(&mut new_buffer[..self.valid_bytes], 0);

        self.buffer = new_buffer;
        self.valid_pos = 0;
        self.pending_shrink = None;
        Ok(())
    }

    fn marker_in_range(&self, start: u64, count: usize) -> Option<Marker> {
        self.marker
            .filter(|m| m.abs_pos >= start && m.abs_pos < start + count as u64)
    }
}

fn try_alloc(capacity: usize) -> Result<Vec<u8>, BufferError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(capacity)
        .map_err(|_| BufferError::OutOfMemory(capacity))?;
    buffer.resize(capacity, 0);
    Ok(buffer)
}

/// Ring buffer shared between a producer and a consumer thread.
///
/// Lock once per batch of operations.
pub type SharedRingBuffer = Arc<Mutex<RingBuffer>>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> Result<SharedRingBuffer, BufferError> {
    Ok(Arc::new(Mutex::new(RingBuffer::with_capacity(capacity)?)))
}
