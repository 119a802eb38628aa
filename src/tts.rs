//! TTS Driver: the per-buffer task that drives the upstream conversion and
//! writes chunks into a [`StreamBuffer`] writer.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{instrument, warn};

use crate::cache::CacheKey;
use crate::in_flight::InFlightCounter;
use crate::stream_buffer::Writer;

#[derive(Debug)]
pub enum UpstreamError {
    /// The upstream provider itself failed (connection drop, non-2xx, etc).
    Provider(String),
    /// The local `StreamBuffer` rejected a write (programmer error -- the
    /// driver never causes this on its own, see `InternalInvariantViolation`
    /// in the error taxonomy).
    BufferRejected(crate::stream_buffer::StreamBufferError),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamError::Provider(msg) => write!(f, "upstream error: {msg}"),
            UpstreamError::BufferRejected(e) => write!(f, "buffer rejected write: {e}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Drives one conversion. A production implementation would call out to the
/// real TTS API; it must still only ever touch the buffer through `writer`.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(&self, text: &str, writer: &Writer) -> Result<(), UpstreamError>;
}

/// Reference stub: emits one upper-cased UTF-8 byte per `tick` from the
/// input text. Stands in for a real upstream client behind the same
/// `Writer`-facing interface.
#[derive(Debug, Clone)]
pub struct DemoTtsProvider {
    tick: Duration,
}

impl DemoTtsProvider {
    pub fn new(tick: Duration) -> Self {
        DemoTtsProvider { tick }
    }
}

#[async_trait]
impl TtsProvider for DemoTtsProvider {
    async fn synthesize(&self, text: &str, writer: &Writer) -> Result<(), UpstreamError> {
        for byte in text.to_uppercase().into_bytes() {
            if self.tick > Duration::ZERO {
                tokio::time::sleep(self.tick).await;
            }
            writer
                .write(Bytes::copy_from_slice(&[byte]))
                .map_err(UpstreamError::BufferRejected)?;
        }
        Ok(())
    }
}

/// Runs one conversion to completion (or failure) and retires its in-flight
/// membership. Spawned by the dispatcher; never panics the process -- any
/// upstream condition is caught and mapped into `Writer::close`.
#[instrument(skip(provider, writer, text, in_flight), fields(key = %hex_prefix(&key)))]
pub async fn run_driver(
    provider: std::sync::Arc<dyn TtsProvider>,
    key: CacheKey,
    writer: Writer,
    text: String,
    in_flight: InFlightCounter,
) {
    let result = provider.synthesize(&text, &writer).await;
    match result {
        Ok(()) => {
            if let Err(e) = writer.close(false) {
                warn!(error = %e, "driver finished but buffer was already closed");
            }
            tracing::info!("conversion complete");
        }
        Err(e) => {
            warn!(error = %e, "upstream conversion failed, closing buffer as incomplete");
            if let Err(close_err) = writer.close(true) {
                warn!(error = %close_err, "failed to mark buffer incomplete");
            }
        }
    }
    in_flight.decrement();
}

fn hex_prefix(key: &CacheKey) -> String {
    key[..4].iter().map(|b| format!("{b:02x}")).collect()
}
