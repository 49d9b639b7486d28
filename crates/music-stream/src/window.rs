use anyhow::{Context, Result};

/// Fixed-capacity scratch buffer of undecoded bytes with a moving read cursor.
///
/// Owned by the player thread. Consumed bytes stay in place until the next
/// [`DecodeWindow::append`] compacts the tail to the front.
pub struct DecodeWindow {
    buf: Vec<u8>,
    read: usize,
    capacity: usize,
}

impl DecodeWindow {
    /// Allocate the window up front; failure is reported instead of aborting.
    pub fn new(capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .with_context(|| format!("allocate {capacity} byte decode window"))?;
        Ok(Self {
            buf,
            read: 0,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Undecoded bytes left.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read
    }

    pub fn is_full(&self) -> bool {
        self.remaining() >= self.capacity
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[self.read..]
    }

    /// Advance the read cursor, clamped to the bytes available.
    pub fn consume(&mut self, n: usize) {
        self.read += n.min(self.remaining());
    }

    /// Move the undecoded tail to the front.
    pub fn compact(&mut self) {
        if self.read > 0 {
            self.buf.drain(..self.read);
            self.read = 0;
        }
    }

    /// Compact, then copy as much of `data` as fits. Returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        self.compact();
        let take = data.len().min(self.capacity - self.buf.len());
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Drop every undecoded byte.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.read = 0;
    }
}
