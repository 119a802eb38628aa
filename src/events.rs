//! Completion-event publication, decoupled from the delivery lifecycle so a
//! real message bus can replace the `tracing`-backed reference sink without
//! touching `delivery` or `dispatcher`.

use std::panic::AssertUnwindSafe;

/// A single fire-and-forget publish sink. Implementations must not let a
/// failure propagate to the caller -- the reference sink cannot fail at all,
/// but [`publish_guarded`] still isolates a panicking implementation so one
/// misbehaving bus can never take down a delivery.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &str);
}

/// Reference implementation: writes the literal event string to the log.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &str) {
        tracing::info!(%event, "bus event");
    }
}

/// Publishes through `sink`, catching (and logging) any panic so the
/// delivery task that called us is unaffected by a broken sink.
pub fn publish_guarded(sink: &dyn EventSink, event: &str) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| sink.publish(event))).is_err() {
        tracing::error!("event sink panicked while publishing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    impl EventSink for RecordingSink {
        fn publish(&self, event: &str) {
            self.0.lock().unwrap().push(event.to_string());
        }
    }

    struct PanickingSink;
    impl EventSink for PanickingSink {
        fn publish(&self, _event: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn guarded_publish_forwards_to_sink() {
        let sink = RecordingSink::default();
        publish_guarded(&sink, "event: tag, done");
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["event: tag, done"]);
    }

    #[test]
    fn guarded_publish_survives_a_panicking_sink() {
        // Must not unwind out of this test.
        publish_guarded(&PanickingSink, "event: tag, done");
    }
}
