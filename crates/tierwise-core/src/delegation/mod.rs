//! Planner/executor delegation.
//!
//! A coordinating capability decomposes a request, dispatches subtasks to a
//! worker through the [`Delegator`] primitive, and emits one final report.

pub mod coordinator;
pub mod coverage;
pub mod delegator;
pub mod subtask;

pub use coordinator::{
    report_instructions, Coordinator, DelegationCoordinator, DelegationReport, PlanAndSynthesize,
};
pub use coverage::{CoverageAssessment, CoveragePolicy};
pub use delegator::Delegator;
pub use subtask::{merge, render_findings, Subtask, SubtaskId, SubtaskResult, SubtaskStatus};

use crate::config::ConfigError;
use crate::extract::ExtractionError;
use crate::invoke::InvocationError;

/// Terminal failures of a delegation run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DelegationError {
    #[error("coordinator call failed: {0}")]
    Coordinator(#[from] InvocationError),

    #[error("coordinator '{coordinator}' did not finish within {timeout_ms}ms")]
    CoordinatorTimedOut {
        coordinator: String,
        timeout_ms: u64,
    },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("subtask id {0} was issued more than once")]
    DuplicateSubtask(SubtaskId),

    #[error("final report could not be extracted: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("final report does not match the report schema: {0}")]
    Schema(String),

    #[error("report items without sources at indices {0:?}")]
    UnsourcedItems(Vec<usize>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
