//! Single-writer, many-reader, append-only byte-chunk buffer.
//!
//! A [`StreamBuffer`] caches one conversion's output so it can be replayed, in
//! full, to any number of readers regardless of when they subscribe relative
//! to the writer. States move through a strict lattice:
//! `Start -> Receiving -> (Closed | ClosedIncomplete)`.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use snafu::Snafu;
use tokio::sync::Notify;

#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
pub enum StreamBufferError {
    #[snafu(display("a writer has already been created for this buffer"))]
    WriterAlreadyCreated,
    #[snafu(display("write attempted on a buffer that is not in the receiving state"))]
    NotReceiving,
    #[snafu(display("close attempted on a buffer that is not in the receiving state"))]
    AlreadyClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Receiving,
    Closed,
    ClosedIncomplete,
}

impl State {
    fn is_closed(self) -> bool {
        matches!(self, State::Closed | State::ClosedIncomplete)
    }
}

#[derive(Debug)]
struct Data {
    chunks: Vec<Bytes>,
    state: State,
}

#[derive(Debug)]
struct Inner {
    data: Mutex<Data>,
    notify: Notify,
}

/// The cache payload: an ordered, immutable sequence of byte chunks plus a
/// terminal-state lattice. Cheap to clone; all clones share the same data.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    inner: Arc<Inner>,
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuffer {
    pub fn new() -> Self {
        StreamBuffer {
            inner: Arc::new(Inner {
                data: Mutex::new(Data {
                    chunks: Vec::new(),
                    state: State::Start,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Creates the single writer for this buffer. Fails if a writer has
    /// already been made (the buffer is no longer in `Start`).
    pub fn make_writer(&self) -> Result<Writer, StreamBufferError> {
        let mut data = self.inner.data.lock().unwrap();
        if data.state != State::Start {
            return Err(StreamBufferError::WriterAlreadyCreated);
        }
        data.state = State::Receiving;
        drop(data);
        Ok(Writer {
            inner: self.inner.clone(),
        })
    }

    /// Creates a reader starting at offset 0. Always succeeds, even after the
    /// buffer has closed -- a late reader replays every buffered chunk then
    /// observes end-of-stream, which is the whole point of caching the
    /// stream rather than just relaying it.
    pub fn make_reader(&self) -> Reader {
        Reader {
            inner: self.inner.clone(),
            offset: 0,
        }
    }

    /// True iff this buffer closed incomplete (the upstream conversion
    /// failed partway through). A corrupt buffer must not be reused to
    /// satisfy future cache lookups.
    pub fn corrupted(&self) -> bool {
        self.inner.data.lock().unwrap().state == State::ClosedIncomplete
    }
}

/// The single producer side of a [`StreamBuffer`].
#[derive(Debug)]
pub struct Writer {
    inner: Arc<Inner>,
}

impl Writer {
    /// Appends an immutable chunk and wakes every waiting reader.
    pub fn write(&self, chunk: Bytes) -> Result<(), StreamBufferError> {
        let mut data = self.inner.data.lock().unwrap();
        if data.state != State::Receiving {
            return Err(StreamBufferError::NotReceiving);
        }
        data.chunks.push(chunk);
        drop(data);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Transitions to `Closed` or `ClosedIncomplete` and wakes every waiting
    /// reader. Rejects a second call.
    pub fn close(&self, incomplete: bool) -> Result<(), StreamBufferError> {
        let mut data = self.inner.data.lock().unwrap();
        if data.state != State::Receiving {
            return Err(StreamBufferError::AlreadyClosed);
        }
        data.state = if incomplete {
            State::ClosedIncomplete
        } else {
            State::Closed
        };
        drop(data);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

/// An independent read cursor over a [`StreamBuffer`].
#[derive(Debug)]
pub struct Reader {
    inner: Arc<Inner>,
    offset: usize,
}

impl Reader {
    /// Returns the next chunk, blocking while the cursor is at the end and
    /// the buffer is still `Receiving`. Returns `None` (EOF) once the cursor
    /// is at the end and the buffer has closed. Cancel-safe: dropping an
    /// in-flight `read()` future (e.g. because a surrounding `select!` chose
    /// another branch) never advances the cursor or loses a chunk.
    pub async fn read(&mut self) -> Option<Bytes> {
        loop {
            let notified = {
                let data = self.inner.data.lock().unwrap();
                if self.offset < data.chunks.len() {
                    let chunk = data.chunks[self.offset].clone();
                    drop(data);
                    self.offset += 1;
                    return Some(chunk);
                }
                if data.state.is_closed() {
                    return None;
                }
                // Registering interest while still holding the lock avoids
                // the lost-wakeup race against a concurrent write/close.
                self.inner.notify.notified()
            };
            notified.await;
        }
    }
}
