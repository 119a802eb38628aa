//! Delivery Task: streams one `StreamBuffer` reader to one client TCP
//! socket, cancellable via `stop`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use crate::events::{publish_guarded, EventSink};
use crate::stream_buffer::Reader;

/// A cancellation handle for one in-flight delivery. Calling `cancel` more
/// than once is harmless; the registry guarantees only the first caller
/// observes an effect (see [`DeliveryRegistry::stop`]).
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    cancel: Arc<Notify>,
}

impl DeliveryHandle {
    /// `notify_one`, not `notify_waiters`: this is a single-consumer,
    /// one-shot signal (exactly one task ever calls `cancel.notified()` on
    /// this `Notify`), and `notify_one` stores a permit for a cancel that
    /// arrives before the task is waiting -- `notify_waiters` wakes only
    /// currently registered waiters and would drop a cancel that lands while
    /// the task is elsewhere in its loop (e.g. inside `write_all`).
    fn cancel(&self) {
        self.cancel.notify_one();
    }
}

/// `request_id -> DeliveryHandle`, holding only deliveries that are still
/// cancellable. A delivery removes its own entry on every terminal
/// transition, so a finished delivery never lingers here.
#[derive(Debug, Clone, Default)]
pub struct DeliveryRegistry {
    inner: Arc<Mutex<HashMap<u64, DeliveryHandle>>>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, request_id: u64, handle: DeliveryHandle) {
        self.inner.lock().unwrap().insert(request_id, handle);
    }

    fn remove(&self, request_id: u64) -> Option<DeliveryHandle> {
        self.inner.lock().unwrap().remove(&request_id)
    }

    /// Cancels and deregisters the named delivery. Returns `true` if one was
    /// registered, `false` (idempotently, on a second call) otherwise.
    pub fn stop(&self, request_id: u64) -> bool {
        match self.remove(request_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

enum Outcome {
    Done,
    Cancelled,
    Errored(String),
}

/// Spawns the delivery task and registers it under `request_id`.
pub fn spawn(
    registry: DeliveryRegistry,
    request_id: u64,
    reader: Reader,
    client_address: SocketAddr,
    event_tag: String,
    events: Arc<dyn EventSink>,
) {
    let cancel = Arc::new(Notify::new());
    registry.insert(request_id, DeliveryHandle { cancel: cancel.clone() });
    tokio::spawn(run(registry, request_id, reader, client_address, event_tag, events, cancel));
}

#[instrument(skip(registry, reader, events, cancel), fields(request_id, %client_address))]
async fn run(
    registry: DeliveryRegistry,
    request_id: u64,
    mut reader: Reader,
    client_address: SocketAddr,
    event_tag: String,
    events: Arc<dyn EventSink>,
    cancel: Arc<Notify>,
) {
    let mut stream = match TcpStream::connect(client_address).await {
        Ok(stream) => stream,
        Err(e) => {
            registry.remove(request_id);
            warn!(error = %e, "client connect failed");
            publish_guarded(events.as_ref(), &format!("event: {event_tag}, error: {e}"));
            return;
        }
    };

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.notified() => break Outcome::Cancelled,
            chunk = reader.read() => {
                match chunk {
                    Some(bytes) => {
                        if let Err(e) = stream.write_all(&bytes).await {
                            break Outcome::Errored(e.to_string());
                        }
                    }
                    None => break Outcome::Done,
                }
            }
        }
    };

    let _ = stream.shutdown().await;
    // Idempotent: a `stop` that raced us to the terminal transition already
    // removed this entry, and removing it twice is a no-op.
    registry.remove(request_id);

    match outcome {
        Outcome::Done => {
            info!("delivery done");
            publish_guarded(events.as_ref(), &format!("event: {event_tag}, done"));
        }
        Outcome::Cancelled => {
            info!("delivery cancelled");
            publish_guarded(events.as_ref(), &format!("event: {event_tag}, cancelled"));
        }
        Outcome::Errored(reason) => {
            warn!(reason = %reason, "delivery errored");
            publish_guarded(events.as_ref(), &format!("event: {event_tag}, error: {reason}"));
        }
    }
}
