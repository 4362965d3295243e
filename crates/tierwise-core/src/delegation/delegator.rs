//! The delegation primitive handed to coordinators.
//!
//! A [`Delegator`] sends subtask instructions to one worker capability. Every
//! dispatch holds a permit from a shared semaphore, so the number of worker
//! calls in flight never exceeds `max_in_flight`, whether the coordinator
//! calls [`Delegator::delegate`] repeatedly or hands a batch to
//! [`Delegator::delegate_all`]. Each call is independently bounded by the
//! worker timeout; a timed-out subtask fails only itself.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::instrument;

use crate::capability::{Capability, CapabilityRequest};
use crate::config::{ConfigError, PipelineConfig, DEFAULT_UNAVAILABLE_MARKER};
use crate::delegation::subtask::{
    merge, render_findings, Subtask, SubtaskId, SubtaskResult, SubtaskStatus,
};
use crate::delegation::DelegationError;
use crate::invoke::{invoke, InvocationOutcome};
use crate::metrics::METRICS;
use crate::obs;

pub struct Delegator {
    worker: Arc<dyn Capability>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    unavailable_marker: String,
    next_id: AtomicU64,
    dispatched: AtomicUsize,
}

impl Delegator {
    pub fn new(
        worker: Arc<dyn Capability>,
        timeout: Duration,
        max_in_flight: usize,
    ) -> Result<Self, ConfigError> {
        if max_in_flight == 0 {
            return Err(ConfigError::Zero("max_in_flight"));
        }
        if timeout.is_zero() {
            return Err(ConfigError::Zero("worker_timeout_ms"));
        }
        Ok(Self {
            worker,
            timeout,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            unavailable_marker: DEFAULT_UNAVAILABLE_MARKER.to_string(),
            next_id: AtomicU64::new(1),
            dispatched: AtomicUsize::new(0),
        })
    }

    pub fn from_config(
        worker: Arc<dyn Capability>,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(worker, config.worker_timeout(), config.max_in_flight)?
            .with_unavailable_marker(config.unavailable_marker.clone()))
    }

    pub fn with_unavailable_marker(mut self, marker: impl Into<String>) -> Self {
        self.unavailable_marker = marker.into();
        self
    }

    pub fn unavailable_marker(&self) -> &str {
        &self.unavailable_marker
    }

    pub fn worker_id(&self) -> &str {
        self.worker.id()
    }

    /// Number of subtasks dispatched so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Reserve a fresh subtask id.
    pub fn next_id(&self) -> SubtaskId {
        SubtaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Delegate one instruction and wait for the worker's final output.
    pub async fn delegate(&self, instruction: &str) -> SubtaskResult {
        let subtask = Subtask {
            id: self.next_id(),
            instruction: instruction.to_string(),
            category: None,
        };
        self.dispatch(subtask).await
    }

    /// Like [`Delegator::delegate`], but yields the unavailable marker
    /// instead of a failure.
    pub async fn delegate_text(&self, instruction: &str) -> String {
        let result = self.delegate(instruction).await;
        result.text_or(&self.unavailable_marker).to_string()
    }

    /// Dispatch a batch concurrently, bounded by `max_in_flight`.
    ///
    /// Results come back ordered by subtask id regardless of completion order.
    #[instrument(skip(self, subtasks), fields(worker = %self.worker.id(), count = subtasks.len()))]
    pub async fn delegate_all(
        &self,
        subtasks: Vec<Subtask>,
    ) -> Result<Vec<SubtaskResult>, DelegationError> {
        let mut seen = HashSet::new();
        for subtask in &subtasks {
            if !seen.insert(subtask.id) {
                return Err(DelegationError::DuplicateSubtask(subtask.id));
            }
        }

        let in_flight: FuturesUnordered<_> =
            subtasks.into_iter().map(|s| self.dispatch(s)).collect();
        let arrived: Vec<SubtaskResult> = in_flight.collect().await;
        Ok(merge(arrived))
    }

    pub fn render(&self, results: &[SubtaskResult]) -> String {
        render_findings(results, &self.unavailable_marker)
    }

    async fn dispatch(&self, subtask: Subtask) -> SubtaskResult {
        // Never closed.
        let _permit = self.permits.acquire().await.ok();

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        METRICS.inc_subtasks_dispatched();
        obs::emit_subtask_dispatched(subtask.id.0, self.worker.id());

        let started = Instant::now();
        let outcome = invoke(
            Arc::clone(&self.worker),
            CapabilityRequest::new(subtask.instruction.clone()),
            self.timeout,
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = match outcome {
            InvocationOutcome::Completed(response) => {
                SubtaskStatus::Completed(response.into_text())
            }
            InvocationOutcome::TimedOut { .. } => SubtaskStatus::TimedOut,
            InvocationOutcome::Failed { error, .. } => SubtaskStatus::Failed(error.to_string()),
        };
        obs::emit_subtask_finished(subtask.id.0, status.label(), duration_ms);

        SubtaskResult {
            subtask,
            status,
            duration_ms,
        }
    }
}

impl std::fmt::Debug for Delegator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegator")
            .field("worker", &self.worker.id())
            .field("timeout", &self.timeout)
            .field("available_permits", &self.permits.available_permits())
            .field("unavailable_marker", &self.unavailable_marker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityError, RawResponse};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Capability for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        async fn call(&self, request: CapabilityRequest) -> Result<RawResponse, CapabilityError> {
            if request.prompt.contains("fail") {
                return Err(CapabilityError::Other("no results".into()));
            }
            Ok(RawResponse::text(format!("done: {}", request.prompt)))
        }
    }

    #[test]
    fn zero_fan_out_is_rejected() {
        let err = Delegator::new(Arc::new(Echo), Duration::from_secs(1), 0).unwrap_err();
        assert_eq!(err, ConfigError::Zero("max_in_flight"));
    }

    #[tokio::test]
    async fn ids_are_assigned_in_dispatch_order() {
        let delegator = Delegator::new(Arc::new(Echo), Duration::from_secs(1), 2).unwrap();
        let first = delegator.delegate("local programs").await;
        let second = delegator.delegate("tuition").await;
        assert_eq!(first.id(), SubtaskId(1));
        assert_eq!(second.id(), SubtaskId(2));
        assert_eq!(delegator.dispatched(), 2);
    }

    #[tokio::test]
    async fn failure_text_is_the_unavailable_marker() {
        let delegator = Delegator::new(Arc::new(Echo), Duration::from_secs(1), 1)
            .unwrap()
            .with_unavailable_marker("N/A");
        assert_eq!(delegator.delegate_text("fail please").await, "N/A");
        assert_eq!(delegator.delegate_text("syllabus").await, "done: syllabus");
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_before_dispatch() {
        let delegator = Delegator::new(Arc::new(Echo), Duration::from_secs(1), 2).unwrap();
        let err = delegator
            .delegate_all(vec![Subtask::new(1, "a"), Subtask::new(1, "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::DuplicateSubtask(SubtaskId(1))));
        assert_eq!(delegator.dispatched(), 0);
    }
}
