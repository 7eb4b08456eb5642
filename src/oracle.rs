//! Reference model of a ring buffer using standard library primitives.

use std::collections::VecDeque;

/// Committed but unreleased bytes of a ring buffer, backed by [`VecDeque`].
///
/// Also hands out a predictable stream of bytes to fill reservations with, so
/// every byte written through the ring buffer is distinguishable.
#[derive(Debug, Default)]
pub(crate) struct Oracle {
    next: u8,
    deque: VecDeque<u8>,
}

impl Oracle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fill a reservation with the next bytes of the stream.
    pub(crate) fn fill(&mut self, bytes: &mut [u8]) {
        for byte in bytes {
            *byte = self.next;
            self.next = self.next.wrapping_add(1);
        }
    }

    /// Bytes became visible to readers.
    pub(crate) fn commit(&mut self, bytes: &[u8]) {
        self.deque.extend(bytes.iter().copied());
    }

    /// Oldest bytes were consumed by readers.
    pub(crate) fn release(&mut self, len: usize) {
        self.deque.drain(..len);
    }

    /// Readers must always see the oldest committed bytes first.
    #[track_caller]
    pub(crate) fn assert_prefix(&self, bytes: &[u8]) {
        assert!(bytes.len() <= self.deque.len());

        let expected: Vec<_> = self.deque.iter().take(bytes.len()).copied().collect();
        assert_eq!(bytes, &expected);
    }

    pub(crate) fn len(&self) -> usize {
        self.deque.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }
}
