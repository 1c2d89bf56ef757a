//! Allocation telemetry for the array layer.
//!
//! An [`AllocTracker`] is an explicit context object: arrays built with
//! [`ArrayBuilder::tracked`](super::array::ArrayBuilder::tracked) report their
//! byte volume to it while a [`TrackingSession`] is alive. Nothing is global,
//! so two tests can track independently.

use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct TrackerInner {
    enabled: AtomicBool,
    capture_traces: AtomicBool,
    current: AtomicUsize,
    peak: AtomicUsize,
    peak_trace: Mutex<Option<String>>,
}

/// Shared handle to an allocation counter.
#[derive(Clone, Debug, Default)]
pub struct AllocTracker {
    inner: Arc<TrackerInner>,
}

/// Snapshot of a tracker's counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocStats {
    pub current_bytes: usize,
    pub peak_bytes: usize,
    /// Stack trace captured when the current peak was reached, if enabled.
    pub peak_trace: Option<String>,
}

impl AllocTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a backtrace whenever a new peak is recorded.
    pub fn with_peak_traces(self) -> Self {
        self.inner.capture_traces.store(true, Ordering::Relaxed);
        self
    }

    /// Start counting. Counting stops when the returned guard drops.
    pub fn session(&self) -> TrackingSession {
        self.inner.current.store(0, Ordering::Relaxed);
        self.inner.peak.store(0, Ordering::Relaxed);
        *self.inner.peak_trace.lock() = None;
        self.inner.enabled.store(true, Ordering::Release);
        TrackingSession {
            tracker: self.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            current_bytes: self.inner.current.load(Ordering::Relaxed),
            peak_bytes: self.inner.peak.load(Ordering::Relaxed),
            peak_trace: self.inner.peak_trace.lock().clone(),
        }
    }

    /// Record `bytes` as allocated; returns the ticket that releases them.
    pub(crate) fn record(&self, bytes: usize) -> Option<Allocation> {
        if !self.is_enabled() {
            return None;
        }
        let now = self.inner.current.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let prev_peak = self.inner.peak.fetch_max(now, Ordering::Relaxed);
        if now > prev_peak && self.inner.capture_traces.load(Ordering::Relaxed) {
            *self.inner.peak_trace.lock() = Some(Backtrace::force_capture().to_string());
        }
        Some(Allocation {
            tracker: self.clone(),
            bytes,
        })
    }
}

/// Scoped guard that keeps a tracker counting.
#[derive(Debug)]
pub struct TrackingSession {
    tracker: AllocTracker,
}

impl TrackingSession {
    pub fn stats(&self) -> AllocStats {
        self.tracker.stats()
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.tracker.inner.enabled.store(false, Ordering::Release);
    }
}

/// Bytes charged to a tracker; released on drop.
#[derive(Debug)]
pub(crate) struct Allocation {
    tracker: AllocTracker,
    bytes: usize,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.tracker
            .inner
            .current
            .fetch_sub(self.bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracker_records_nothing() {
        let t = AllocTracker::new();
        assert!(t.record(64).is_none());
        assert_eq!(t.stats().peak_bytes, 0);
    }

    #[test]
    fn session_tracks_current_and_peak() {
        let t = AllocTracker::new();
        let session = t.session();
        let a = t.record(100);
        let b = t.record(50);
        drop(a);
        let stats = session.stats();
        assert_eq!(stats.current_bytes, 50);
        assert_eq!(stats.peak_bytes, 150);
        drop(b);
        assert_eq!(t.stats().current_bytes, 0);
        drop(session);
        assert!(!t.is_enabled());
    }

    #[test]
    fn peak_trace_is_captured_on_request() {
        let t = AllocTracker::new().with_peak_traces();
        let _s = t.session();
        let _a = t.record(8);
        assert!(t.stats().peak_trace.is_some());
    }
}
