//! Delivery counters
//!
//! Lets the external fallback poller tell a quiet link from a dead one.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct LinkStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    events_delivered: AtomicU64,
    subscriber_failures: AtomicU64,
    last_event_at: Mutex<Option<Instant>>,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    /// Frames that failed to decode
    pub frames_dropped: u64,
    /// Events delivered, counted once per event regardless of subscriber count
    pub events_delivered: u64,
    pub subscriber_failures: u64,
    /// Time since the last decoded event
    pub last_event_age: Option<Duration>,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
        *self.last_event_at.lock() = Some(Instant::now());
    }

    pub(crate) fn record_subscriber_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            last_event_age: self.last_event_at.lock().map(|at| at.elapsed()),
        }
    }

    /// No event within `staleness` (or none at all)
    pub fn is_stale(&self, staleness: Duration) -> bool {
        match *self.last_event_at.lock() {
            Some(at) => at.elapsed() > staleness,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_staleness_tracks_last_event() {
        let stats = LinkStats::new();
        assert!(stats.is_stale(Duration::from_secs(60)));

        stats.record_frame();
        stats.record_event();
        assert!(!stats.is_stale(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(stats.is_stale(Duration::from_secs(60)));

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.events_delivered, 1);
        assert_eq!(snap.last_event_age, Some(Duration::from_secs(61)));
    }

    #[test]
    fn test_counters() {
        let stats = LinkStats::new();
        stats.record_frame();
        stats.record_frame();
        stats.record_dropped();
        stats.record_subscriber_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.events_delivered, 0);
        assert_eq!(snap.subscriber_failures, 1);
        assert_eq!(snap.last_event_age, None);
    }
}
