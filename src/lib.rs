//! # Ringsink
//!
//! Ringsink provides a fixed size byte ring buffer for one producer and one consumer,
//! along with a write-behind sink that uses it to batch small writes.
//!
//! ## RingBuffer
//!
//! A [`RingBuffer`] hands out leases over its memory. Producers reserve space, write
//! into the lease and commit it. Consumers read a lease, use the bytes in place and
//! release it. Bytes are never copied on the read side, and a write never overwrites
//! bytes that are still being read.
//!
//! ## BatchingSink
//!
//! A [`BatchingSink`] wraps a slow [`std::io::Write`] implementation. Small writes land
//! in a ring buffer and return right away, while a background thread flushes them
//! downstream in larger batches.
//!
//! ```
//! use ringsink::{BatchingSink, Overflow, SinkConfig};
//!
//! let config = SinkConfig::default()
//!     .with_capacity(8096)
//!     .with_overflow(Overflow::Flush);
//!
//! let sink = BatchingSink::new(Vec::new(), config).expect("Should create sink");
//! sink.write(b"hello").expect("Should buffer payload");
//! sink.sync().expect("Should flush payload");
//! sink.close();
//! ```

pub(crate) mod config;
pub(crate) mod lease;
pub(crate) mod memory;
pub(crate) mod ring;
pub(crate) mod sink;

#[cfg(test)]
pub(crate) mod oracle;

// Externally exposed types.
pub use config::{DEFAULT_CAPACITY, Overflow, SinkConfig};
pub use lease::{ReadLease, WriteLease};
pub use memory::{Memory, MemoryKind, OffHeap, OnHeap};
pub use ring::{OffHeapRing, OnHeapRing, ReserveError, RingBuffer};
pub use sink::{BatchingSink, SinkError};
