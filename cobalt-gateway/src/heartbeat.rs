//! Heartbeat bookkeeping for a shard.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sentinel for "no round trip measured yet".
const UNMEASURED: u64 = u64::MAX;

/// Tracks heartbeat cadence, acknowledgement and round-trip latency.
///
/// The latency lives in a shared `Arc<AtomicU64>` so the send-path buckets
/// can stretch their windows by the observed round trip.
#[derive(Debug)]
pub struct Heartbeats {
    interval_ms: AtomicU64,
    last_sent: RwLock<Instant>,
    last_received: RwLock<Option<Instant>>,
    acked: AtomicBool,
    latency_ms: Arc<AtomicU64>,
}

impl Heartbeats {
    pub fn new() -> Self {
        Self {
            interval_ms: AtomicU64::new(41_250),
            last_sent: RwLock::new(Instant::now()),
            last_received: RwLock::new(None),
            acked: AtomicBool::new(true),
            latency_ms: Arc::new(AtomicU64::new(UNMEASURED)),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Release);
    }

    /// Fresh connection: the first periodic beat must not trip the zombie
    /// check.
    pub fn reset(&self) {
        self.acked.store(true, Ordering::SeqCst);
        *self.last_sent.write() = Instant::now();
    }

    pub fn mark_sent(&self) {
        self.acked.store(false, Ordering::SeqCst);
        *self.last_sent.write() = Instant::now();
    }

    pub fn mark_acked(&self) {
        let now = Instant::now();
        let rtt = now.duration_since(*self.last_sent.read());

        self.acked.store(true, Ordering::SeqCst);
        *self.last_received.write() = Some(now);
        self.latency_ms
            .store(rtt.as_millis() as u64, Ordering::Release);
    }

    /// Refresh liveness from implicit signals (member chunks double as an
    /// alive indication) without touching the latency measurement.
    pub fn mark_alive(&self) {
        self.acked.store(true, Ordering::SeqCst);
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::Acquire) {
            UNMEASURED => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Shared latency cell, in milliseconds, for bucket window stretching.
    pub fn latency_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.latency_ms)
    }

    pub fn last_received(&self) -> Option<Instant> {
        *self.last_received.read()
    }
}

impl Default for Heartbeats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_cycle() {
        let hb = Heartbeats::new();
        assert!(hb.is_acked());

        hb.mark_sent();
        assert!(!hb.is_acked());
        assert!(hb.latency().is_none());

        hb.mark_acked();
        assert!(hb.is_acked());
        assert!(hb.latency().is_some());
        assert!(hb.last_received().is_some());
    }

    #[test]
    fn alive_signal_does_not_measure() {
        let hb = Heartbeats::new();
        hb.mark_sent();
        hb.mark_alive();
        assert!(hb.is_acked());
        assert!(hb.latency().is_none());
    }
}
