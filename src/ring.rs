//! Definition of a lease based byte ring buffer.

use crate::{Memory, OffHeap, OnHeap, ReadLease, WriteLease, lease::Grant};
use std::{io, sync::Arc};
use thiserror::Error;

/// Type alias for a [`RingBuffer`] backed by [`OnHeap`] memory.
pub type OnHeapRing = RingBuffer<OnHeap>;

/// Type alias for a [`RingBuffer`] backed by [`OffHeap`] memory.
pub type OffHeapRing = RingBuffer<OffHeap>;

/// Different types of error that can happen when space is reserved in a [`RingBuffer`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReserveError {
    #[error("Not enough contiguous space for {requested} bytes in a ring of {capacity} bytes")]
    InsufficientSpace { requested: usize, capacity: usize },

    #[error("A write lease is already outstanding")]
    WriteInProgress,
}

/// Book keeping for a lease that has been handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outstanding {
    start: usize,
    end: usize,
    generation: u64,
}

/// A fixed size byte ring buffer for exactly one producer and one consumer.
///
/// Bytes move through the buffer with a lease protocol:
///
/// * Producer: [`RingBuffer::reserve`] → write into the lease → [`RingBuffer::commit`].
/// * Consumer: [`RingBuffer::read`] → use the lease → [`RingBuffer::release`].
///
/// Reads never copy, a [`ReadLease`] dereferences straight into the backing memory.
/// Reservations never wrap around the end of memory. Instead, when the tail is too small,
/// the next reservation starts from the head and the buffer becomes _inverted_. An inverted
/// buffer holds two segments (tail and head), so draining it takes two reads.
///
/// There is no synchronization in here, callers serialize access with `&mut self`.
#[derive(Debug)]
pub struct RingBuffer<M> {
    // Offset where the next reservation starts.
    write: usize,

    // Offset where the next read starts.
    read: usize,

    // End of valid tail data while inverted, capacity otherwise.
    watermark: usize,

    // Leases that have been handed out and not yet returned.
    writing: Option<Outstanding>,
    reading: Option<Outstanding>,

    // Stamped into every lease to detect stale or foreign leases.
    generation: u64,

    // Pre-allocated memory for bytes held in the ring buffer.
    memory: Arc<M>,
}

impl OnHeapRing {
    /// Create a new ring buffer using on-heap memory.
    ///
    /// # Panic
    ///
    /// * Capacity must be > 1.
    /// * Capacity should be <= isize::MAX.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Size of the ring buffer in bytes.
    #[track_caller]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 1, "Capacity must be > 1");
        Self::with_memory(OnHeap::alloc(capacity))
    }
}

impl OffHeapRing {
    /// Create a new ring buffer using off-heap memory.
    ///
    /// Returns an I/O error if memory cannot be mapped.
    ///
    /// # Panic
    ///
    /// * Capacity must be > 1.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Size of the ring buffer in bytes.
    #[track_caller]
    pub fn off_heap(capacity: usize) -> io::Result<Self> {
        assert!(capacity > 1, "Capacity must be > 1");
        Ok(Self::with_memory(OffHeap::alloc(capacity)?))
    }
}

impl<M: Memory> RingBuffer<M> {
    /// Create a new ring buffer on top of some memory.
    ///
    /// All required memory is provided upfront. It is guaranteed that the ring
    /// buffer never allocates after initialization.
    ///
    /// # Panic
    ///
    /// * Memory must hold more than 1 byte.
    ///
    /// # Arguments
    ///
    /// * `memory` - Memory to hold bytes of the ring buffer.
    #[track_caller]
    pub fn with_memory(memory: M) -> Self {
        let capacity = memory.capacity();
        assert!(capacity > 1, "Capacity must be > 1");

        Self {
            write: 0,
            read: 0,
            watermark: capacity,
            writing: None,
            reading: None,
            generation: 0,
            memory: Arc::new(memory),
        }
    }

    /// Size of the ring buffer in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    /// true if the write cursor has wrapped around behind the read cursor.
    #[inline]
    pub fn is_inverted(&self) -> bool {
        self.write < self.read
    }

    /// Number of committed bytes that have not yet been released.
    pub fn len(&self) -> usize {
        if self.is_inverted() {
            (self.watermark - self.read) + self.write
        } else {
            self.write - self.read
        }
    }

    /// true if there are no committed bytes waiting to be released.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve a contiguous range of bytes for writing.
    ///
    /// Reserved bytes are invisible to readers until the lease is committed. At least
    /// one byte is always kept free between unread bytes and the next writable byte,
    /// so a reservation of `capacity` bytes never succeeds.
    ///
    /// # Arguments
    ///
    /// * `size` - Number of bytes to reserve.
    pub fn reserve(&mut self, size: usize) -> Result<WriteLease<M>, ReserveError> {
        // Only one producer at a time.
        if self.writing.is_some() {
            return Err(ReserveError::WriteInProgress);
        }

        let start = if self.is_inverted() {
            // The only free region is between the cursors, we cannot invert again.
            (size < self.read - self.write).then_some(self.write)
        } else if size < self.capacity() - self.write {
            // Enough space in the tail.
            Some(self.write)
        } else {
            // Head is free up to the read cursor, time to invert.
            (size < self.read).then_some(0)
        };

        let Some(start) = start else {
            return Err(ReserveError::InsufficientSpace {
                requested: size,
                capacity: self.capacity(),
            });
        };

        let grant = self.grant(start, start + size);
        self.writing = Some(Outstanding::of(&grant));
        Ok(WriteLease(grant))
    }

    /// Publish bytes of a write lease to readers.
    ///
    /// # Panic
    ///
    /// * Lease must be the outstanding write lease of this ring buffer.
    ///
    /// # Arguments
    ///
    /// * `lease` - Lease returned by the latest reservation.
    #[track_caller]
    pub fn commit(&mut self, lease: WriteLease<M>) {
        self.take_writing(&lease.0, "commit");

        // An inverting reservation ends before the write cursor. Readers need to know
        // where valid data in the tail ends, which is wherever the writer stopped.
        if lease.0.end < self.write {
            self.watermark = self.write;
        }

        self.write = lease.0.end;
    }

    /// Abandon a write lease without publishing any bytes.
    ///
    /// # Panic
    ///
    /// * Lease must be the outstanding write lease of this ring buffer.
    ///
    /// # Arguments
    ///
    /// * `lease` - Lease returned by the latest reservation.
    #[track_caller]
    pub fn rollback(&mut self, lease: WriteLease<M>) {
        self.take_writing(&lease.0, "rollback");
    }

    /// Borrow the next contiguous range of committed bytes.
    ///
    /// Returns None when there are no committed bytes to read. When the buffer is
    /// inverted, this returns the tail segment first and the head segment after the
    /// tail segment is released.
    ///
    /// # Panic
    ///
    /// * There must be no outstanding read lease.
    #[track_caller]
    pub fn read(&mut self) -> Option<ReadLease<M>> {
        assert!(self.reading.is_none(), "read with a read lease outstanding");

        let (mut start, mut end) = (self.read, self.write);
        if self.is_inverted() {
            if self.read < self.watermark {
                // Drain the tail first.
                end = self.watermark;
            } else {
                // Tail is exhausted, skip to the head.
                start = 0;
            }
        }

        if start == end {
            return None;
        }

        let grant = self.grant(start, end);
        self.reading = Some(Outstanding::of(&grant));
        Some(ReadLease(grant))
    }

    /// Return a read lease, making its bytes available for reuse.
    ///
    /// # Panic
    ///
    /// * Lease must be the outstanding read lease of this ring buffer.
    ///
    /// # Arguments
    ///
    /// * `lease` - Lease returned by the latest read.
    #[track_caller]
    pub fn release(&mut self, lease: ReadLease<M>) {
        let grant = &lease.0;
        match self.reading.take() {
            Some(outstanding) if self.owns(grant) && outstanding == Outstanding::of(grant) => {}
            reading => {
                self.reading = reading;
                panic!("release with a foreign or stale read lease: {grant:?}");
            }
        }

        if grant.end == self.write && self.writing.is_none() {
            // Reader caught up with the writer, start over from the very beginning.
            self.read = 0;
            self.write = 0;
            self.watermark = self.capacity();
        } else if grant.end == self.watermark {
            // Tail is fully drained, next read starts from the head.
            self.read = 0;
            self.watermark = self.capacity();
        } else {
            // Reader skipped from an exhausted tail to the head.
            if grant.start < self.read {
                self.watermark = self.capacity();
            }

            self.read = grant.end;
        }
    }

    /// Hand out a new grant over a range of memory.
    fn grant(&mut self, start: usize, end: usize) -> Grant<M> {
        debug_assert!(start <= end && end <= self.capacity());

        self.generation += 1;
        Grant {
            start,
            end,
            generation: self.generation,
            memory: Arc::clone(&self.memory),
        }
    }

    /// true if the grant was handed out by this ring buffer.
    fn owns(&self, grant: &Grant<M>) -> bool {
        Arc::ptr_eq(&self.memory, &grant.memory)
    }

    /// Clear the outstanding write lease, panics if it is not this grant.
    #[track_caller]
    fn take_writing(&mut self, grant: &Grant<M>, op: &str) {
        match self.writing {
            Some(outstanding) if self.owns(grant) && outstanding == Outstanding::of(grant) => {
                self.writing = None;
            }
            _ => panic!("{op} with a foreign or stale write lease: {grant:?}"),
        }
    }
}

impl Outstanding {
    fn of<M>(grant: &Grant<M>) -> Self {
        Self {
            start: grant.start,
            end: grant.end,
            generation: grant.generation,
        }
    }
}
