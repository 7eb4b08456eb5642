//! Definition of leases handed out by a ring buffer.
//!
//! A lease is a capability for a contiguous range of bytes of one specific ring buffer.
//! It holds the range, a generation stamp and a handle to the memory region. The ring
//! buffer never hands out overlapping leases, which is what makes the slices below sound.

use crate::Memory;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    slice::{from_raw_parts, from_raw_parts_mut},
    sync::Arc,
};

/// Shared state of both kinds of leases.
pub(crate) struct Grant<M> {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) generation: u64,
    pub(crate) memory: Arc<M>,
}

impl<M> fmt::Debug for Grant<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Exclusive, uncommitted access to a range of bytes for writing.
///
/// Obtained from [`RingBuffer::reserve`](crate::RingBuffer::reserve) and handed back
/// with [`RingBuffer::commit`](crate::RingBuffer::commit) or
/// [`RingBuffer::rollback`](crate::RingBuffer::rollback).
#[derive(Debug)]
pub struct WriteLease<M>(pub(crate) Grant<M>);

/// Shared access to a range of committed bytes for reading.
///
/// Obtained from [`RingBuffer::read`](crate::RingBuffer::read) and handed back with
/// [`RingBuffer::release`](crate::RingBuffer::release).
#[derive(Debug)]
pub struct ReadLease<M>(pub(crate) Grant<M>);

impl<M> WriteLease<M> {
    /// Offset one past the last byte of this lease.
    #[inline]
    pub fn end(&self) -> usize {
        self.0.end
    }
}

impl<M> ReadLease<M> {
    /// Offset one past the last byte of this lease.
    #[inline]
    pub fn end(&self) -> usize {
        self.0.end
    }
}

impl<M: Memory> Deref for WriteLease<M> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        // Safety
        // * Range is within memory, checked when the lease was granted.
        // * No other lease overlaps this range while it is outstanding.
        unsafe {
            let ptr = self.0.memory.as_ptr().add(self.0.start);
            from_raw_parts(ptr, self.0.end - self.0.start)
        }
    }
}

impl<M: Memory> DerefMut for WriteLease<M> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety
        // * Range is within memory, checked when the lease was granted.
        // * There is at most one write lease and readers never see uncommitted ranges.
        unsafe {
            let ptr = self.0.memory.as_ptr().add(self.0.start);
            from_raw_parts_mut(ptr, self.0.end - self.0.start)
        }
    }
}

impl<M: Memory> Deref for ReadLease<M> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        // Safety
        // * Range is within memory, checked when the lease was granted.
        // * Writers never reserve a range overlapping unreleased bytes.
        unsafe {
            let ptr = self.0.memory.as_ptr().add(self.0.start);
            from_raw_parts(ptr, self.0.end - self.0.start)
        }
    }
}
