//! Tierwise Core Library
//!
//! Control layer for pipelines built from opaque remote agents: payload
//! extraction, completeness validation, bounded invocation, cost-ordered
//! escalation, planner/executor delegation and gated chains.

pub mod capability;
pub mod chain;
pub mod config;
pub mod delegation;
pub mod error;
pub mod escalation;
pub mod extract;
pub mod invoke;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod telemetry;
pub mod validate;

pub use capability::{Capability, CapabilityError, CapabilityRequest, OutputSchema, RawResponse};
pub use chain::{ChainError, ChainOutcome, ChainStep, Gate, GatedChain, StepInput, StepOutput};
pub use config::{ConfigError, PipelineConfig, DEFAULT_UNAVAILABLE_MARKER};
pub use delegation::{
    Coordinator, CoverageAssessment, CoveragePolicy, DelegationCoordinator, DelegationError,
    DelegationReport, Delegator, PlanAndSynthesize, Subtask, SubtaskId, SubtaskResult,
    SubtaskStatus,
};
pub use error::{Result, TierwiseError};
pub use escalation::{
    AgentTier, EscalationController, EscalationOutcome, EscalationState, ExhaustionError,
    TierAttempt, TierFailure,
};
pub use extract::{extract, extract_response, ExtractedPayload, ExtractionError};
pub use invoke::{invoke, InvocationError, InvocationOutcome};
pub use report::{FinalReport, ReportItem};
pub use validate::{
    brand_separation_policy, validate, CompletenessPolicy, FieldVerdict, ListFieldRule,
    ValidationVerdict,
};

pub use metrics::METRICS;
pub use obs::request_span;
pub use telemetry::init_tracing;

/// Tierwise version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
