//! Bounded mono sample queue between the output thread and the cpal callback.
//!
//! The output thread blocks in [`SampleQueue::push`] when the queue is full, which is what
//! paces the player to real time. The callback only ever uses the non-blocking
//! [`SampleQueue::pop_up_to`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Capacity in samples for `seconds` of mono audio at `rate_hz`.
///
/// Non-finite or non-positive durations fall back to one second.
pub fn capacity_for(rate_hz: u32, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        1.0
    };
    ((rate_hz as f32 * secs).ceil() as usize).max(1)
}

pub struct SampleQueue {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_samples: usize,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

impl SampleQueue {
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                samples: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            max_samples: max_samples.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append samples, waiting for room. Returns `false` if the queue was closed first.
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let g = self.lock();
            let mut g = self
                .cv
                .wait_while(g, |q| q.samples.len() >= self.max_samples && !q.closed)
                .unwrap_or_else(PoisonError::into_inner);
            if g.closed {
                return false;
            }
            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
        }
        true
    }

    /// Take up to `max` samples without blocking.
    pub fn pop_up_to(&self, max: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take = g.samples.len().min(max);
        if take == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Wait until the queue has drained or `timeout` passes; returns whether it drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let g = self.lock();
        let (g, _) = self
            .cv
            .wait_timeout_while(g, timeout, |q| !q.samples.is_empty() && !q.closed)
            .unwrap_or_else(PoisonError::into_inner);
        g.samples.is_empty()
    }

    /// Drop queued samples and wake a blocked producer.
    pub fn clear(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    /// Refuse further pushes and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }
}
