//! Definition of options to construct a batching sink.

use crate::MemoryKind;

/// Default size of the ring buffer in a sink, 256 KiB.
pub const DEFAULT_CAPACITY: usize = 256 << 10;

/// What a sink does with a write that does not fit in its ring buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Write straight to the downstream writer, bypassing the ring buffer.
    #[default]
    Flush,

    /// Drop the bytes, only counted in [`BatchingSink::num_overflows`](crate::BatchingSink::num_overflows).
    Discard,
}

/// Options to construct a [`BatchingSink`](crate::BatchingSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Size of the ring buffer in bytes.
    pub capacity: usize,

    /// Behavior when the ring buffer cannot absorb a write.
    pub overflow: Overflow,

    /// Kind of memory backing the ring buffer.
    pub memory: MemoryKind,

    /// Number of extra attempts the flush worker makes for a failing segment.
    pub flush_retries: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: Overflow::default(),
            memory: MemoryKind::default(),
            flush_retries: 0,
        }
    }
}

impl SinkConfig {
    /// Set size of the ring buffer.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Size of the ring buffer in bytes, must be > 1.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set behavior when the ring buffer cannot absorb a write.
    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set kind of memory backing the ring buffer.
    pub fn with_memory(mut self, memory: MemoryKind) -> Self {
        self.memory = memory;
        self
    }

    /// Set number of extra attempts for a failing background flush.
    pub fn with_flush_retries(mut self, flush_retries: u32) -> Self {
        self.flush_retries = flush_retries;
        self
    }
}
