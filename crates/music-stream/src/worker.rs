//! Named worker threads with bounded joins.
//!
//! Every teardown path (restart, stop, drop) joins the downloader, player and lyric threads
//! through [`Worker::join_within`], so a wedged thread costs a warning and a detached handle, never a
//! hung caller.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot flag that threads can wait on.
#[derive(Default)]
pub struct Latch {
    set: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *lock(&self.set) = true;
        self.cv.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.set)
    }

    /// Block until the latch is set.
    pub fn wait(&self) {
        let g = lock(&self.set);
        let _g = self
            .cv
            .wait_while(g, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block up to `timeout`; returns whether the latch is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let g = lock(&self.set);
        let (g, _) = self
            .cv
            .wait_timeout_while(g, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *g
    }
}

/// Sets the finished latch when the worker body returns or unwinds.
struct FinishGuard(Arc<Latch>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// Handle to a named background thread.
pub struct Worker {
    name: String,
    finished: Arc<Latch>,
    join: JoinHandle<()>,
}

impl Worker {
    /// Spawn `body` on a thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let finished = Arc::new(Latch::new());
        let guard = FinishGuard(finished.clone());
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                body();
            })
            .with_context(|| format!("spawn {name} thread"))?;
        Ok(Self {
            name: name.to_string(),
            finished,
            join,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_set()
    }

    /// Join, giving the thread at most `timeout` to finish.
    ///
    /// `nudge` runs before every wait slice so a thread parked on a condvar is re-signalled.
    /// On timeout the thread is detached with a warning and `false` is returned.
    pub fn join_within(self, timeout: Duration, nudge: impl Fn()) -> bool {
        let deadline = Instant::now() + timeout;
        let slice = Duration::from_millis(100);
        loop {
            nudge();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if self.finished.wait_timeout(slice.min(deadline - now)) {
                self.join_now();
                return true;
            }
        }
        if self.finished.is_set() {
            self.join_now();
            return true;
        }
        tracing::warn!(
            thread = %self.name,
            timeout_ms = timeout.as_millis() as u64,
            "worker did not stop in time; detaching"
        );
        false
    }

    fn join_now(self) {
        if self.join.join().is_err() {
            tracing::warn!(thread = %self.name, "worker panicked");
        }
    }
}
