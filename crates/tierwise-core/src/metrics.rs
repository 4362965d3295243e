//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a request).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    invocations: AtomicU64,
    timeouts: AtomicU64,
    invocation_errors: AtomicU64,
    escalations: AtomicU64,
    subtasks_dispatched: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            invocation_errors: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
            subtasks_dispatched: AtomicU64::new(0),
        }
    }

    pub fn inc_invocations(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "invocations", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn inc_invocation_errors(&self) {
        self.invocation_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "invocation_errors", "counter incremented");
    }

    pub fn inc_escalations(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "escalations", "counter incremented");
    }

    pub fn inc_subtasks_dispatched(&self) {
        self.subtasks_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "subtasks_dispatched", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            invocations = self.invocations(),
            timeouts = self.timeouts(),
            invocation_errors = self.invocation_errors(),
            escalations = self.escalations(),
            subtasks_dispatched = self.subtasks_dispatched(),
        );
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn invocation_errors(&self) -> u64 {
        self.invocation_errors.load(Ordering::Relaxed)
    }

    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }

    pub fn subtasks_dispatched(&self) -> u64 {
        self.subtasks_dispatched.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.invocations.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.invocation_errors.store(0, Ordering::Relaxed);
        self.escalations.store(0, Ordering::Relaxed);
        self.subtasks_dispatched.store(0, Ordering::Relaxed);
    }
}
