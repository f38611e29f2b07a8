//! Registry-wide counters for observability

use core::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by a registry and its thread contexts
///
/// Updated with relaxed atomics outside the enter/exit path: per-frame
/// counts are folded in when a thread closes.
#[derive(Debug, Default)]
pub struct TraceCounters {
    threads_started: AtomicU64,
    threads_stopped: AtomicU64,
    frames_recorded: AtomicU64,
    in_situ_flushes: AtomicU64,
    frames_drained: AtomicU64,
    frames_discarded: AtomicU64,
}

impl TraceCounters {
    pub(crate) fn record_thread_started(&self) {
        self.threads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_thread_stopped(&self, frames: u64) {
        self.threads_stopped.fetch_add(1, Ordering::Relaxed);
        self.frames_recorded.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_in_situ_flush(&self) {
        self.in_situ_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drained(&self, frames: u64) {
        self.frames_drained.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, frames: u64) {
        self.frames_discarded.fetch_add(frames, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> TraceMetrics {
        TraceMetrics {
            threads_started: self.threads_started.load(Ordering::Relaxed),
            threads_stopped: self.threads_stopped.load(Ordering::Relaxed),
            frames_recorded: self.frames_recorded.load(Ordering::Relaxed),
            in_situ_flushes: self.in_situ_flushes.load(Ordering::Relaxed),
            frames_drained: self.frames_drained.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`TraceCounters`]
///
/// All counters are monotonically increasing for a live registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceMetrics {
    /// Thread contexts created
    pub threads_started: u64,

    /// Thread contexts closed
    pub threads_stopped: u64,

    /// Frames finished by closed threads, root frames included
    pub frames_recorded: u64,

    /// `thread_in_situ` deliveries
    pub in_situ_flushes: u64,

    /// Frames handed to consumers through `drain_finished`
    pub frames_drained: u64,

    /// Frames dropped with their context without being drained
    pub frames_discarded: u64,
}

impl TraceMetrics {
    /// Create new metrics with zero values
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads started but not yet stopped
    pub fn threads_running(&self) -> u64 {
        self.threads_started.saturating_sub(self.threads_stopped)
    }

    /// Frames of closed threads neither drained nor discarded yet
    pub fn frames_pending(&self) -> u64 {
        self.frames_recorded
            .saturating_sub(self.frames_drained)
            .saturating_sub(self.frames_discarded)
    }

    /// Reset all metrics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Merge metrics from another instance
    pub fn merge(&mut self, other: &TraceMetrics) {
        self.threads_started = self.threads_started.saturating_add(other.threads_started);
        self.threads_stopped = self.threads_stopped.saturating_add(other.threads_stopped);
        self.frames_recorded = self.frames_recorded.saturating_add(other.frames_recorded);
        self.in_situ_flushes = self.in_situ_flushes.saturating_add(other.in_situ_flushes);
        self.frames_drained = self.frames_drained.saturating_add(other.frames_drained);
        self.frames_discarded = self
            .frames_discarded
            .saturating_add(other.frames_discarded);
    }
}

impl core::fmt::Display for TraceMetrics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "TraceMetrics(threads={}/{}, frames={}, in_situ={}, drained={}, discarded={})",
            self.threads_stopped,
            self.threads_started,
            self.frames_recorded,
            self.in_situ_flushes,
            self.frames_drained,
            self.frames_discarded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default() {
        let m = TraceMetrics::default();
        assert_eq!(m.threads_started, 0);
        assert_eq!(m.frames_pending(), 0);
        assert_eq!(m.threads_running(), 0);
    }

    #[test]
    fn test_counters_snapshot() {
        let c = TraceCounters::default();
        c.record_thread_started();
        c.record_thread_started();
        c.record_thread_stopped(5);
        c.record_in_situ_flush();
        c.record_drained(3);
        c.record_discarded(1);

        let m = c.snapshot();
        assert_eq!(m.threads_started, 2);
        assert_eq!(m.threads_stopped, 1);
        assert_eq!(m.threads_running(), 1);
        assert_eq!(m.frames_recorded, 5);
        assert_eq!(m.in_situ_flushes, 1);
        assert_eq!(m.frames_pending(), 1);
    }

    #[test]
    fn test_metrics_merge() {
        let mut m1 = TraceMetrics {
            threads_started: 2,
            frames_recorded: 10,
            ..Default::default()
        };
        let m2 = TraceMetrics {
            threads_started: 1,
            frames_recorded: 4,
            frames_drained: 4,
            ..Default::default()
        };

        m1.merge(&m2);

        assert_eq!(m1.threads_started, 3);
        assert_eq!(m1.frames_recorded, 14);
        assert_eq!(m1.frames_drained, 4);
    }

    #[test]
    fn test_metrics_saturating_merge() {
        let mut m = TraceMetrics {
            frames_recorded: u64::MAX,
            ..Default::default()
        };
        m.merge(&TraceMetrics {
            frames_recorded: 1,
            ..Default::default()
        });
        assert_eq!(m.frames_recorded, u64::MAX);

        m.reset();
        assert_eq!(m, TraceMetrics::default());
    }

    #[test]
    fn test_metrics_display() {
        let m = TraceMetrics {
            threads_started: 2,
            threads_stopped: 1,
            frames_recorded: 7,
            ..Default::default()
        };
        assert_eq!(
            m.to_string(),
            "TraceMetrics(threads=1/2, frames=7, in_situ=0, drained=0, discarded=0)"
        );
    }
}
