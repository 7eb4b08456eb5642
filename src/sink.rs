//! Definition of a write-behind sink built on top of a ring buffer.

use crate::{Memory, Overflow, RingBuffer, SinkConfig};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use std::{
    fmt,
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Maximum number of physically contiguous segments held in a ring buffer.
const MAX_SEGMENTS: usize = 2;

/// Number of wake-ups pushed through the flush worker by [`BatchingSink::sync`].
///
/// Sending a wake-up succeeds only after the worker picked up the previous one, at which
/// point the flush pass before that has completed. The first pass might have started
/// before sync was called, the next `MAX_SEGMENTS` passes drain whatever was committed.
const SYNC_ROUNDS: usize = MAX_SEGMENTS + 2;

/// Ring buffer type used by the sink, memory is picked at runtime.
type Buffer = RingBuffer<Box<dyn Memory>>;

/// Different types of error reported by a [`BatchingSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Background flush dropped a segment after {attempts} attempts: {source}")]
    Flush {
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

impl From<SinkError> for io::Error {
    fn from(error: SinkError) -> Self {
        let kind = match &error {
            SinkError::Flush { source, .. } => source.kind(),
        };

        io::Error::new(kind, error)
    }
}

/// Ring buffer state, only accessed while holding the buffer lock.
struct State {
    ring: Buffer,
    closed: bool,
}

/// State shared between writers and the flush worker.
struct Shared<W> {
    // Buffer lock, never held across downstream I/O.
    state: Mutex<State>,

    // Downstream lock, serializes background flushes with overflow writes.
    downstream: Mutex<W>,

    overflow: Overflow,
    flush_retries: u32,
    overflows: AtomicU64,
    flush_failures: AtomicU64,
    last_error: Mutex<Option<SinkError>>,
}

/// A writer that batches small writes in a ring buffer and flushes them downstream
/// from a background thread.
///
/// Writes that fit in the ring buffer return immediately, a dedicated worker drains
/// the buffer and performs fewer, larger writes to the downstream writer. Writes that
/// do not fit are handled according to the configured [`Overflow`] policy.
///
/// * Buffered bytes reach downstream in the order they were written.
/// * Bytes written through [`Overflow::Flush`] bypass the buffer, so they can reach
///   downstream before bytes that were buffered earlier.
/// * After [`BatchingSink::close`] every write goes through the overflow policy.
pub struct BatchingSink<W> {
    shared: Arc<Shared<W>>,

    // Single slot wake-up, a full slot already guarantees another flush pass.
    pending: Sender<()>,

    // Asks the worker to drain and exit.
    closing: Sender<()>,

    // Disconnects once the worker has exited.
    done: Receiver<()>,

    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<W: Write + Send + 'static> BatchingSink<W> {
    /// Create a new sink and start its flush worker.
    ///
    /// Returns an I/O error if memory cannot be allocated or the worker cannot be spawned.
    ///
    /// # Panic
    ///
    /// * Capacity must be > 1.
    ///
    /// # Arguments
    ///
    /// * `inner` - Downstream writer to flush bytes to.
    /// * `config` - Options for the sink.
    #[track_caller]
    pub fn new(inner: W, config: SinkConfig) -> io::Result<Self> {
        assert!(config.capacity > 1, "Capacity must be > 1");

        let memory = config.memory.alloc(config.capacity)?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ring: RingBuffer::with_memory(memory),
                closed: false,
            }),
            downstream: Mutex::new(inner),
            overflow: config.overflow,
            flush_retries: config.flush_retries,
            overflows: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        });

        let (pending_tx, pending_rx) = bounded(1);
        let (closing_tx, closing_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(0);

        let worker = Worker {
            shared: Arc::clone(&shared),
            pending: pending_rx,
            closing: closing_rx,
            _done: done_tx,
        };

        let handle = thread::Builder::new()
            .name("ringsink-flush".to_string())
            .spawn(move || worker.run())?;

        debug!(capacity = config.capacity, overflow = ?config.overflow, "Started batching sink");
        Ok(Self {
            shared,
            pending: pending_tx,
            closing: closing_tx,
            done: done_rx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Write a payload.
    ///
    /// Payload is copied into the ring buffer when it fits, and flushed later. Otherwise
    /// the overflow policy applies: [`Overflow::Flush`] writes downstream right away and
    /// returns whatever downstream returned, [`Overflow::Discard`] drops the payload and
    /// reports it as written.
    ///
    /// # Arguments
    ///
    /// * `payload` - Bytes to write.
    pub fn write(&self, payload: &[u8]) -> io::Result<usize> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                trace!(len = payload.len(), "Sink is closed, bypassing ring buffer");
            } else if let Ok(mut lease) = state.ring.reserve(payload.len()) {
                lease.copy_from_slice(payload);
                state.ring.commit(lease);

                // Duplicate wake-ups are dropped.
                let _ = self.pending.try_send(());
                return Ok(payload.len());
            }
        }

        trace!(len = payload.len(), policy = ?self.shared.overflow, "Ring buffer overflow");
        match self.shared.overflow {
            Overflow::Flush => self.shared.downstream.lock().write(payload),
            Overflow::Discard => {
                self.shared.overflows.fetch_add(1, Ordering::Relaxed);
                Ok(payload.len())
            }
        }
    }
}

impl<W> BatchingSink<W> {
    /// Block until bytes written before this call have been flushed downstream.
    ///
    /// Returns early if the sink is closed, close already drained the buffer.
    /// Reports the latest segment the flush worker had to drop, if any.
    pub fn sync(&self) -> Result<(), SinkError> {
        for _ in 0..SYNC_ROUNDS {
            select! {
                send(self.pending, ()) -> sent => if sent.is_err() { break },
                recv(self.done) -> _ => break,
            }
        }

        match self.shared.last_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Drain the ring buffer and stop the flush worker.
    ///
    /// Calling close more than once is fine, every call returns after the drain.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.closed {
                debug!("Closing batching sink");
                state.closed = true;
            }
        }

        // Slot may already hold a request from an earlier close.
        let _ = self.closing.try_send(());

        let mut worker = self.worker.lock();
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!("Flush worker panicked before the ring buffer was drained");
            }
        }
    }

    /// Number of writes dropped by the [`Overflow::Discard`] policy.
    pub fn num_overflows(&self) -> u64 {
        self.shared.overflows.load(Ordering::Relaxed)
    }

    /// Number of segments dropped by the flush worker after exhausting retries.
    pub fn num_flush_failures(&self) -> u64 {
        self.shared.flush_failures.load(Ordering::Relaxed)
    }
}

impl<W> Drop for BatchingSink<W> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<W> fmt::Debug for BatchingSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchingSink")
            .field("overflow", &self.shared.overflow)
            .field("overflows", &self.num_overflows())
            .field("flush_failures", &self.num_flush_failures())
            .finish_non_exhaustive()
    }
}

impl<W: Write + Send + 'static> Write for BatchingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BatchingSink::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.sync()?)
    }
}

impl<W: Write + Send + 'static> Write for &BatchingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BatchingSink::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.sync()?)
    }
}

/// Background thread that drains the ring buffer.
struct Worker<W> {
    shared: Arc<Shared<W>>,
    pending: Receiver<()>,
    closing: Receiver<()>,

    // Dropped on exit, which is what waiters on done observe.
    _done: Sender<()>,
}

impl<W: Write> Worker<W> {
    fn run(self) {
        debug!("Flush worker started");

        loop {
            select! {
                recv(self.closing) -> _ => break,
                recv(self.pending) -> signal => {
                    if signal.is_err() {
                        break;
                    }

                    self.shared.flush();
                }
            }
        }

        // Sink is closed, nothing new can be committed. Every pass drains one segment.
        for _ in 0..MAX_SEGMENTS {
            if !self.shared.flush() {
                break;
            }
        }

        debug!("Flush worker exited");
    }
}

impl<W: Write> Shared<W> {
    /// Flush the next segment of the ring buffer, returns false if there was none.
    fn flush(&self) -> bool {
        let Some(lease) = self.state.lock().ring.read() else {
            return false;
        };

        // Buffer lock is not held here, writers keep committing while downstream is slow.
        self.write_segment(&lease);

        self.state.lock().ring.release(lease);
        true
    }

    /// Write a segment downstream, dropping it once retries are exhausted.
    fn write_segment(&self, mut bytes: &[u8]) {
        let attempts = self.flush_retries.saturating_add(1);
        let mut downstream = self.downstream.lock();

        for attempt in 1..=attempts {
            let error = match downstream.write(bytes) {
                Ok(written) if written == bytes.len() => return,

                // Partial success, the next attempt resumes after accepted bytes.
                Ok(written) => {
                    bytes = &bytes[written..];
                    io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short write, {} bytes left", bytes.len()),
                    )
                }

                Err(error) => error,
            };

            if attempt == attempts {
                warn!(attempts, lost = bytes.len(), %error, "Dropping segment after failed flush");
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(SinkError::Flush {
                    attempts,
                    source: error,
                });
                return;
            }

            debug!(attempt, %error, "Retrying failed flush");
        }
    }
}
