//! Observability counters for a single connector instance.
//!
//! Uses atomic counters so the dispatch task, poll task and senders can
//! record events without locking. Dropped inbound payloads (no callback,
//! no serializer, decode failure) are counted here so silent data loss
//! stays diagnosable.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-connector metrics.
#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    /// Messages handed to the binding for sending
    pub messages_sent: AtomicU64,
    /// Payloads received from the binding and dispatched to a callback
    pub messages_received: AtomicU64,
    /// Inbound payloads dropped because no callback was registered
    pub dropped_no_callback: AtomicU64,
    /// Inbound payloads dropped because decoding failed
    pub dropped_decode_failed: AtomicU64,
    /// Sends that failed at the binding
    pub send_errors: AtomicU64,
    /// Acknowledgment waits that timed out
    pub ack_timeouts: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub dropped_no_callback: u64,
    pub dropped_decode_failed: u64,
    pub send_errors: u64,
    pub ack_timeouts: u64,
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_no_callback(&self) {
        self.dropped_no_callback.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_decode_failed(&self) {
        self.dropped_decode_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a consistent-enough snapshot for logging and assertions.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            dropped_no_callback: self.dropped_no_callback.load(Ordering::Relaxed),
            dropped_decode_failed: self.dropped_decode_failed.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            ack_timeouts: self.ack_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = ConnectorMetrics::new();
        m.record_sent();
        m.record_sent();
        m.record_received();
        m.record_dropped_no_callback();

        let s = m.snapshot();
        assert_eq!(s.messages_sent, 2);
        assert_eq!(s.messages_received, 1);
        assert_eq!(s.dropped_no_callback, 1);
        assert_eq!(s.send_errors, 0);
    }
}
