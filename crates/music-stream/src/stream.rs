use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::buffer::ChunkBuffer;
use crate::config::StreamConfig;

/// State of one streaming run, shared by its downloader and player threads.
///
/// A fresh instance is created for every `start_streaming`, so a straggler thread from a
/// previous run can only ever touch its own buffer and flags. The buffer's cancelled flag
/// doubles as the run's cancellation token.
pub(crate) struct StreamState {
    pub(crate) generation: u64,
    pub(crate) buffer: ChunkBuffer,
    pub(crate) downloading: AtomicBool,
    pub(crate) playing: AtomicBool,
    /// Set once the player thread has run its termination step.
    pub(crate) ended: AtomicBool,
    pub(crate) played_ms: AtomicU64,
    pub(crate) frames_decoded: AtomicU64,
    pub(crate) bytes_downloaded: AtomicU64,
}

impl StreamState {
    pub(crate) fn new(generation: u64, cfg: &StreamConfig) -> Self {
        Self {
            generation,
            buffer: ChunkBuffer::new(cfg.max_buffer_bytes, cfg.min_start_bytes),
            downloading: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            played_ms: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.buffer.is_cancelled()
    }

    /// Drop both activity flags and wake every waiter on the buffer.
    pub(crate) fn cancel(&self) {
        self.downloading.store(false, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.buffer.cancel();
    }

    pub(crate) fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::SeqCst)
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}
