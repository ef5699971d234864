//! Global atomic counters for evaluation runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Relaxed atomic counters; no locking.
pub struct Metrics {
    threads_evaluated: AtomicU64,
    threads_quarantined: AtomicU64,
    verdicts_passed: AtomicU64,
    verdicts_failed: AtomicU64,
    query_parse_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            threads_evaluated: AtomicU64::new(0),
            threads_quarantined: AtomicU64::new(0),
            verdicts_passed: AtomicU64::new(0),
            verdicts_failed: AtomicU64::new(0),
            query_parse_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_threads_evaluated(&self) {
        self.threads_evaluated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "threads_evaluated", "counter incremented");
    }

    pub fn inc_threads_quarantined(&self) {
        self.threads_quarantined.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "threads_quarantined", "counter incremented");
    }

    /// Count one verdict on the passed or failed side.
    pub fn record_verdict(&self, passed: bool) {
        if passed {
            self.verdicts_passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.verdicts_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_query_parse_failures(&self) {
        self.query_parse_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "query_parse_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            threads_evaluated = self.threads_evaluated(),
            threads_quarantined = self.threads_quarantined(),
            verdicts_passed = self.verdicts_passed(),
            verdicts_failed = self.verdicts_failed(),
            query_parse_failures = self.query_parse_failures(),
        );
    }

    pub fn threads_evaluated(&self) -> u64 {
        self.threads_evaluated.load(Ordering::Relaxed)
    }

    pub fn threads_quarantined(&self) -> u64 {
        self.threads_quarantined.load(Ordering::Relaxed)
    }

    pub fn verdicts_passed(&self) -> u64 {
        self.verdicts_passed.load(Ordering::Relaxed)
    }

    pub fn verdicts_failed(&self) -> u64 {
        self.verdicts_failed.load(Ordering::Relaxed)
    }

    pub fn query_parse_failures(&self) -> u64 {
        self.query_parse_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.threads_evaluated.store(0, Ordering::Relaxed);
        self.threads_quarantined.store(0, Ordering::Relaxed);
        self.verdicts_passed.store(0, Ordering::Relaxed);
        self.verdicts_failed.store(0, Ordering::Relaxed);
        self.query_parse_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_threads_evaluated();
        m.inc_threads_evaluated();
        assert_eq!(m.threads_evaluated(), 2);

        m.inc_threads_quarantined();
        assert_eq!(m.threads_quarantined(), 1);

        m.record_verdict(true);
        m.record_verdict(false);
        m.record_verdict(false);
        assert_eq!(m.verdicts_passed(), 1);
        assert_eq!(m.verdicts_failed(), 2);

        m.inc_query_parse_failures();
        assert_eq!(m.query_parse_failures(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_threads_evaluated();
        m.inc_threads_quarantined();
        m.record_verdict(true);
        m.inc_query_parse_failures();
        m.reset();
        assert_eq!(m.threads_evaluated(), 0);
        assert_eq!(m.threads_quarantined(), 0);
        assert_eq!(m.verdicts_passed(), 0);
        assert_eq!(m.query_parse_failures(), 0);
    }
}
