//! Lock-free frame counters for one stream manager

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use serde::Serialize;

/// Counters touched from the capture thread and the worker thread.
///
/// Producer-side and consumer-side counters sit on separate cache lines so the
/// two threads do not contend on every frame.
#[derive(Default)]
pub struct FrameStats {
    producer: CachePadded<ProducerCounters>,
    consumer: CachePadded<ConsumerCounters>,
}

#[derive(Default)]
struct ProducerCounters {
    submitted: AtomicU64,
    decimated: AtomicU64,
    discarded: AtomicU64,
    dropped: AtomicU64,
    queued: AtomicU64,
}

#[derive(Default)]
struct ConsumerCounters {
    written: AtomicU64,
    previewed: AtomicU64,
    skipped: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Every call to `submit_frame`
    pub submitted: u64,
    /// Removed by the frame divisor
    pub decimated: u64,
    /// Arrived while neither streaming nor recording
    pub discarded: u64,
    /// Dropped because the buffer limit was exceeded
    pub dropped: u64,
    pub queued: u64,
    pub written: u64,
    pub previewed: u64,
    /// Rejected by the worker as shorter than the source geometry
    pub skipped: u64,
}

impl FrameStats {
    pub fn submitted(&self) {
        self.producer.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decimated(&self) {
        self.producer.decimated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discarded(&self) {
        self.producer.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new drop count
    pub fn dropped(&self) -> u64 {
        metrics::counter!("frames_dropped_total").increment(1);
        self.producer.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn queued(&self) {
        self.producer.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn written(&self) {
        metrics::counter!("frames_written_total").increment(1);
        self.consumer.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn previewed(&self) {
        self.consumer.previewed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.consumer.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.producer.submitted.load(Ordering::Relaxed),
            decimated: self.producer.decimated.load(Ordering::Relaxed),
            discarded: self.producer.discarded.load(Ordering::Relaxed),
            dropped: self.producer.dropped.load(Ordering::Relaxed),
            queued: self.producer.queued.load(Ordering::Relaxed),
            written: self.consumer.written.load(Ordering::Relaxed),
            previewed: self.consumer.previewed.load(Ordering::Relaxed),
            skipped: self.consumer.skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = FrameStats::default();
        stats.submitted();
        stats.submitted();
        stats.queued();
        assert_eq!(stats.dropped(), 1);
        assert_eq!(stats.dropped(), 2);
        stats.written();

        let snap = stats.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.dropped, 2);
        assert_eq!(snap.written, 1);
        assert_eq!(snap.previewed, 0);
    }
}
