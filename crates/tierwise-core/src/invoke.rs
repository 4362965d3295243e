//! Bounded invocation of remote capabilities.
//!
//! [`invoke`] runs one capability call on its own task and races it against a
//! deadline. The caller always gets exactly one of three outcomes: the
//! response, a timeout, or an invocation error. Transport faults and panics in
//! the capability never escape this boundary. There are no retries here;
//! retry and escalation policy belong to the callers.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::capability::{Capability, CapabilityError, CapabilityRequest, RawResponse};
use crate::metrics::METRICS;
use crate::obs;

/// Result of one bounded call.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Completed(RawResponse),
    TimedOut {
        capability: String,
        timeout: Duration,
    },
    Failed {
        capability: String,
        error: CapabilityError,
    },
}

impl InvocationOutcome {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn into_result(self) -> Result<RawResponse, InvocationError> {
        match self {
            Self::Completed(response) => Ok(response),
            Self::TimedOut {
                capability,
                timeout,
            } => Err(InvocationError::Timeout {
                capability,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Self::Failed { capability, error } => Err(InvocationError::Failed {
                capability,
                source: error,
            }),
        }
    }
}

/// Non-success outcomes of [`invoke`] as an error value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("capability '{capability}' timed out after {timeout_ms}ms")]
    Timeout { capability: String, timeout_ms: u64 },

    #[error("capability '{capability}' failed: {source}")]
    Failed {
        capability: String,
        source: CapabilityError,
    },
}

impl InvocationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Call `capability` with `request`, giving up after `timeout`.
///
/// On expiry the spawned call is aborted, which drops the in-flight future at
/// its next suspension point. Sibling calls are unaffected. Dropping the
/// returned future (e.g. when an enclosing deadline fires) aborts the call too.
pub async fn invoke(
    capability: Arc<dyn Capability>,
    request: CapabilityRequest,
    timeout: Duration,
) -> InvocationOutcome {
    let capability_id = capability.id().to_string();
    let started = Instant::now();
    METRICS.inc_invocations();

    let mut handle = AbortOnDrop(tokio::spawn(async move { capability.call(request).await }));

    let outcome = match tokio::time::timeout(timeout, &mut handle.0).await {
        Err(_) => {
            handle.0.abort();
            METRICS.inc_timeouts();
            obs::emit_invocation_timed_out(&capability_id, timeout.as_millis() as u64);
            return InvocationOutcome::TimedOut {
                capability: capability_id,
                timeout,
            };
        }
        Ok(Err(join_err)) => {
            let error = if join_err.is_panic() {
                CapabilityError::Panicked(panic_message(join_err.into_panic()))
            } else {
                CapabilityError::Other("capability task was cancelled".to_string())
            };
            InvocationOutcome::Failed {
                capability: capability_id.clone(),
                error,
            }
        }
        Ok(Ok(Err(error))) => InvocationOutcome::Failed {
            capability: capability_id.clone(),
            error,
        },
        Ok(Ok(Ok(response))) => InvocationOutcome::Completed(response),
    };

    match &outcome {
        InvocationOutcome::Failed { error, .. } => {
            METRICS.inc_invocation_errors();
            obs::emit_invocation_failed(&capability_id, error);
        }
        _ => debug!(
            capability = %capability_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "invocation completed"
        ),
    }

    outcome
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
