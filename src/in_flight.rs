//! The in-flight conversion counter used solely for admission control: it
//! tracks how many TTS Drivers are currently running, nothing more.
//!
//! This is a plain count, not a set of cache keys: a cache entry can be
//! evicted while its driver is still running (the buffer survives via the
//! reader/writer's own `Arc`), so a later `start` for the same text can
//! launch a second driver for a key that is, from the counter's point of
//! view, indistinguishable from the first. Counting launches rather than
//! keys keeps every concurrently running driver visible to the admission
//! check.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InFlightCounter {
    inner: Arc<AtomicUsize>,
}

impl InFlightCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.inner.load(Ordering::SeqCst)
    }

    /// Called once per launched driver, under the dispatcher's admission lock.
    pub fn increment(&self) {
        self.inner.fetch_add(1, Ordering::SeqCst);
    }

    /// Called once per driver on its own terminal path (clean or incomplete close).
    pub fn decrement(&self) {
        self.inner.fetch_sub(1, Ordering::SeqCst);
    }
}
