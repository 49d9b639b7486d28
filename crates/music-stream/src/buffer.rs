//! Bounded FIFO of compressed-audio chunks shared by the downloader and the player.
//!
//! [`ChunkBuffer`] is the backpressure point of a stream:
//! - the downloader pushes chunks and waits while the byte cap is reached
//! - the player pops chunks and waits while the queue is empty
//! - the controller clears or cancels it from a third thread
//!
//! Producer-finished and cancelled flags live under the same mutex as the queue, and every
//! change is followed by `notify_all`, so no waiter can sleep through a state change.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::worker::lock;

/// One owned block of raw stream bytes.
///
/// Ownership moves into the buffer on [`ChunkBuffer::push`] and out to the consumer on
/// [`ChunkBuffer::pop`]; dropping the chunk releases its memory.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioChunk(Vec<u8>);

impl AudioChunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for AudioChunk {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// Thread-safe bounded byte queue between one producer and one consumer.
pub struct ChunkBuffer {
    inner: Mutex<BufferInner>,
    cv: Condvar,
    max_bytes: usize,
    min_start_bytes: usize,
}

struct BufferInner {
    chunks: VecDeque<AudioChunk>,
    bytes: usize,
    finished: bool,
    cancelled: bool,
}

impl ChunkBuffer {
    /// Create a buffer capped at `max_bytes` that lets playback start at `min_start_bytes`.
    ///
    /// A start threshold above the cap is clamped to the cap, otherwise the player would
    /// wait for bytes the downloader is never allowed to queue.
    pub fn new(max_bytes: usize, min_start_bytes: usize) -> Self {
        let max_bytes = max_bytes.max(1);
        Self {
            inner: Mutex::new(BufferInner {
                chunks: VecDeque::new(),
                bytes: 0,
                finished: false,
                cancelled: false,
            }),
            cv: Condvar::new(),
            max_bytes,
            min_start_bytes: min_start_bytes.min(max_bytes),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes currently queued.
    pub fn len_bytes(&self) -> usize {
        lock(&self.inner).bytes
    }

    /// Chunks currently queued.
    pub fn chunk_count(&self) -> usize {
        lock(&self.inner).chunks.len()
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner).cancelled
    }

    /// Whether the producer has called [`ChunkBuffer::finish`].
    pub fn is_finished(&self) -> bool {
        lock(&self.inner).finished
    }

    /// Queue a chunk, waiting while it would push the byte count past the cap.
    ///
    /// A chunk larger than the cap is admitted once the queue is empty. Returns `false`
    /// (and drops the chunk) if the buffer is cancelled before space frees up.
    pub fn push(&self, chunk: AudioChunk) -> bool {
        let mut g = lock(&self.inner);
        while !g.cancelled
            && !g.chunks.is_empty()
            && g.bytes.saturating_add(chunk.len()) > self.max_bytes
        {
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if g.cancelled {
            return false;
        }

        g.bytes += chunk.len();
        g.chunks.push_back(chunk);
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Take the oldest chunk, waiting while the queue is empty and the producer is active.
    ///
    /// Returns `None` once the producer finished and the queue drained, or immediately after
    /// cancellation.
    pub fn pop(&self) -> Option<AudioChunk> {
        let mut g = lock(&self.inner);
        while g.chunks.is_empty() && !g.finished && !g.cancelled {
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        if g.cancelled {
            return None;
        }

        let chunk = g.chunks.pop_front()?;
        g.bytes -= chunk.len();
        drop(g);
        self.cv.notify_all();
        Some(chunk)
    }

    /// Wait until enough bytes are buffered to start decoding.
    ///
    /// Also returns once the producer finished, so a short stream still plays. Returns
    /// `true` when there is something to decode and the buffer was not cancelled.
    pub fn wait_for_start(&self) -> bool {
        let mut g = lock(&self.inner);
        while !g.cancelled && !g.finished && g.bytes < self.min_start_bytes {
            g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
        !g.cancelled && !g.chunks.is_empty()
    }

    /// Sleep up to `timeout`, returning early (with `true`) if the buffer gets cancelled.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        let g = lock(&self.inner);
        let (g, _) = self
            .cv
            .wait_timeout_while(g, timeout, |inner| !inner.cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        g.cancelled
    }

    /// Mark the producer as done and wake every waiter.
    pub fn finish(&self) {
        let mut g = lock(&self.inner);
        g.finished = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Cancel the stream: pending and future waits return immediately.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        let mut g = lock(&self.inner);
        g.cancelled = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Drop every queued chunk and reset the byte count. Returns the number of chunks freed.
    pub fn clear(&self) -> usize {
        let mut g = lock(&self.inner);
        let freed = g.chunks.len();
        g.chunks.clear();
        g.bytes = 0;
        drop(g);
        self.cv.notify_all();
        if freed > 0 {
            tracing::debug!(chunks = freed, "audio buffer cleared");
        }
        freed
    }
}
