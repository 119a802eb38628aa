//! Dispatcher: admits `start`/`stop` requests, allocates request ids, and
//! coordinates the cache, TTS driver, and delivery task for each one.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use snafu::Snafu;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument};

use crate::cache::{hash_text, Cache};
use crate::delivery::{self, DeliveryRegistry};
use crate::events::EventSink;
use crate::in_flight::InFlightCounter;
use crate::tts::{self, TtsProvider};

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum DispatchError {
    /// The in-flight conversion count is already at `tts_api_limit` and this
    /// call would have started a new conversion. Caller-side retry is the
    /// expected recovery.
    #[snafu(display("too many requests"))]
    TooManyConversions,
}

/// Coordinates every `start`/`stop` call against one shared `Cache`,
/// `DeliveryRegistry`, and in-flight conversion count.
pub struct Dispatcher {
    cache: Cache,
    registry: DeliveryRegistry,
    in_flight: InFlightCounter,
    counter: AtomicU64,
    /// Guards steps 2-4 of `start` (hash, cache lookup/reservation, and the
    /// admission decision) so two concurrent calls racing on the same novel
    /// key can never both pass the `created` branch, and so request-id
    /// order follows the order in which each call completed that section.
    admission_lock: AsyncMutex<()>,
    tts_api_limit: usize,
    provider: Arc<dyn TtsProvider>,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(tts_api_limit: usize, provider: Arc<dyn TtsProvider>, events: Arc<dyn EventSink>, max_cache_items: std::num::NonZeroUsize) -> Self {
        Dispatcher {
            cache: Cache::new(max_cache_items),
            registry: DeliveryRegistry::new(),
            in_flight: InFlightCounter::new(),
            counter: AtomicU64::new(0),
            admission_lock: AsyncMutex::new(()),
            tts_api_limit,
            provider,
            events,
        }
    }

    #[cfg(test)]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.count()
    }

    /// See `SPEC_FULL.md` §4.5. Returns the assigned request id on every
    /// success path; fails only on admission rejection.
    #[instrument(skip(self, text, event_tag), fields(request_id = tracing::field::Empty))]
    pub async fn start(
        &self,
        text: String,
        host: IpAddr,
        port: u16,
        event_tag: String,
    ) -> Result<u64, DispatchError> {
        let key = hash_text(&text);

        let (request_id, admitted) = {
            let _guard = self.admission_lock.lock().await;
            let request_id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let (buffer, created) = self.cache.get_or_reserve(key);

            if created {
                if self.in_flight.count() >= self.tts_api_limit {
                    self.cache.remove(&key);
                    (request_id, None)
                } else {
                    let writer = buffer
                        .make_writer()
                        .expect("a freshly reserved buffer always yields its one writer");
                    self.in_flight.increment();
                    tokio::spawn(tts::run_driver(
                        self.provider.clone(),
                        key,
                        writer,
                        text.clone(),
                        self.in_flight.clone(),
                    ));
                    (request_id, Some(buffer))
                }
            } else {
                (request_id, Some(buffer))
            }
        };

        let Some(buffer) = admitted else {
            return Err(DispatchError::TooManyConversions);
        };

        tracing::Span::current().record("request_id", request_id);
        let reader = buffer.make_reader();
        delivery::spawn(
            self.registry.clone(),
            request_id,
            reader,
            SocketAddr::new(host, port),
            event_tag,
            self.events.clone(),
        );
        info!(request_id, "delivery registered");
        Ok(request_id)
    }

    /// Cancels and deregisters the named delivery. Never touches the
    /// conversion that delivery was reading from.
    pub fn stop(&self, request_id: u64) -> bool {
        self.registry.stop(request_id)
    }
}
