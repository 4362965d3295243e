//! Coordinators and the delegation pipeline.
//!
//! A [`Coordinator`] is anything that turns a request into one final report
//! text, given only a [`Delegator`] to reach the worker. [`PlanAndSynthesize`]
//! is the stock implementation: a planner capability decomposes the request,
//! the subtasks fan out through the delegator, and a synthesizer capability
//! writes the report from the merged findings.
//!
//! [`DelegationCoordinator`] runs a coordinator under an overall deadline and
//! turns its output into a checked [`FinalReport`]. Failure at that last step
//! is terminal for the request: decompositions are expensive, so nothing here
//! retries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::capability::{Capability, CapabilityRequest, RawResponse};
use crate::config::{ConfigError, PipelineConfig};
use crate::delegation::coverage::{CoverageAssessment, CoveragePolicy};
use crate::delegation::delegator::Delegator;
use crate::delegation::subtask::{Subtask, SubtaskId};
use crate::delegation::DelegationError;
use crate::escalation::AgentTier;
use crate::extract::{extract_response, ExtractedPayload};
use crate::invoke::invoke;
use crate::obs;
use crate::report::FinalReport;

#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Produce the final report text. `delegator` is the only way to reach
    /// the worker; `coverage` is the contract to pass on to the planning agent.
    async fn coordinate(
        &self,
        request: &str,
        delegator: &Delegator,
        coverage: &CoveragePolicy,
    ) -> Result<RawResponse, DelegationError>;
}

const PLAN_FORMAT: &str = r#"Decompose the request into independent subtasks for a research worker.
Respond with JSON only, in this shape:
{"subtasks": [{"id": 1, "instruction": "...", "category": "..."}]}"#;

#[derive(Debug, Deserialize)]
struct Plan {
    #[serde(default)]
    subtasks: Vec<PlannedSubtask>,
}

#[derive(Debug, Deserialize)]
struct PlannedSubtask {
    #[serde(default)]
    id: Option<u64>,
    instruction: String,
    #[serde(default)]
    category: Option<String>,
}

/// Planner + synthesizer coordinator.
#[derive(Debug, Clone)]
pub struct PlanAndSynthesize {
    planner: AgentTier,
    synthesizer: AgentTier,
}

impl PlanAndSynthesize {
    pub fn new(planner: AgentTier, synthesizer: AgentTier) -> Self {
        Self {
            planner,
            synthesizer,
        }
    }

    pub fn plan_prompt(&self, request: &str, coverage: &CoveragePolicy) -> String {
        format!("{request}\n\n{}\n\n{PLAN_FORMAT}", coverage.instruction())
    }

    pub fn synthesis_prompt(&self, request: &str, findings: &str, marker: &str) -> String {
        format!(
            "{request}\n\n## Findings\n\n{findings}{}",
            report_instructions(marker)
        )
    }

    async fn plan(
        &self,
        request: &str,
        coverage: &CoveragePolicy,
    ) -> Result<Vec<Subtask>, DelegationError> {
        let prompt = self.plan_prompt(request, coverage);
        let response = invoke(
            Arc::clone(&self.planner.capability),
            CapabilityRequest::new(prompt).with_schema(self.planner.output_schema.clone()),
            self.planner.timeout,
        )
        .await
        .into_result()?;

        let payload =
            extract_response(&response).map_err(|e| DelegationError::InvalidPlan(e.to_string()))?;
        let plan: Plan = serde_json::from_value(payload.value)
            .map_err(|e| DelegationError::InvalidPlan(e.to_string()))?;
        if plan.subtasks.is_empty() {
            return Err(DelegationError::InvalidPlan(
                "planner returned no subtasks".to_string(),
            ));
        }

        Ok(assign_ids(plan.subtasks))
    }
}

/// Planned subtasks without an id are numbered after the largest explicit id,
/// in plan order.
fn assign_ids(planned: Vec<PlannedSubtask>) -> Vec<Subtask> {
    let mut next = planned.iter().filter_map(|p| p.id).max().unwrap_or(0);
    planned
        .into_iter()
        .map(|p| {
            let id = p.id.unwrap_or_else(|| {
                next += 1;
                next
            });
            Subtask {
                id: SubtaskId(id),
                instruction: p.instruction,
                category: p.category,
            }
        })
        .collect()
}

#[async_trait]
impl Coordinator for PlanAndSynthesize {
    fn id(&self) -> &str {
        self.planner.capability.id()
    }

    async fn coordinate(
        &self,
        request: &str,
        delegator: &Delegator,
        coverage: &CoveragePolicy,
    ) -> Result<RawResponse, DelegationError> {
        let subtasks = self.plan(request, coverage).await?;
        debug!(subtasks = subtasks.len(), "plan accepted");

        let results = delegator.delegate_all(subtasks).await?;
        let findings = delegator.render(&results);
        let prompt = self.synthesis_prompt(request, &findings, delegator.unavailable_marker());

        let response = invoke(
            Arc::clone(&self.synthesizer.capability),
            CapabilityRequest::new(prompt).with_schema(self.synthesizer.output_schema.clone()),
            self.synthesizer.timeout,
        )
        .await
        .into_result()?;
        Ok(response)
    }
}

/// Report-format instructions appended to the synthesis prompt.
pub fn report_instructions(marker: &str) -> String {
    format!(
        r#"Return JSON only, matching exactly this schema:
{{
  "input_program": "...",
  "input_description": "...",
  "coverage": {{"local": 0, "national": 0, "international": 0}},
  "items": [
    {{
      "program_name": "...",
      "university": "...",
      "country": "...",
      "url": "...",
      "courses_examples": ["..."],
      "tuition": "...",
      "intake_per_year": "...",
      "sources": ["..."]
    }}
  ],
  "insights": ["..."]
}}
Every item must include at least one URL in "sources".
If a field cannot be found, use "{marker}"."#
    )
}

/// A checked report plus what the pipeline observed producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationReport {
    pub report: FinalReport,
    pub payload: ExtractedPayload,
    pub coverage: CoverageAssessment,
    pub subtasks_dispatched: usize,
}

/// Runs a coordinator end to end for one request.
pub struct DelegationCoordinator {
    coordinator: Arc<dyn Coordinator>,
    worker: Arc<dyn Capability>,
    config: PipelineConfig,
}

impl DelegationCoordinator {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        worker: Arc<dyn Capability>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            coordinator,
            worker,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the coordinator and return its report text unparsed.
    pub async fn run_raw(&self, request: &str) -> Result<RawResponse, DelegationError> {
        let delegator = Delegator::from_config(Arc::clone(&self.worker), &self.config)?;
        self.coordinate(request, &delegator).await
    }

    /// Run the coordinator and check the report it produced.
    pub async fn run(&self, request: &str) -> Result<DelegationReport, DelegationError> {
        let request_id = Uuid::new_v4().to_string();
        self.execute(request)
            .instrument(obs::request_span("delegation", &request_id))
            .await
    }

    async fn execute(&self, request: &str) -> Result<DelegationReport, DelegationError> {
        let delegator = Delegator::from_config(Arc::clone(&self.worker), &self.config)?;
        let result = self.produce(request, &delegator).await;

        let items = result.as_ref().map(|r| r.report.items.len()).unwrap_or(0);
        obs::emit_delegation_finished(delegator.dispatched(), items, result.is_ok());
        result
    }

    async fn produce(
        &self,
        request: &str,
        delegator: &Delegator,
    ) -> Result<DelegationReport, DelegationError> {
        let response = self.coordinate(request, delegator).await?;

        let payload = extract_response(&response)?;
        let mut report: FinalReport = serde_json::from_value(payload.value.clone())
            .map_err(|e| DelegationError::Schema(e.to_string()))?;

        let unsourced = report.unsourced_items();
        if !unsourced.is_empty() {
            return Err(DelegationError::UnsourcedItems(unsourced));
        }
        report.mark_unavailable(&self.config.unavailable_marker);

        let coverage = self.config.coverage.assess(&report);
        if !coverage.satisfied {
            obs::emit_coverage_shortfall(&coverage);
        }
        let dispatched = delegator.dispatched();
        if dispatched < self.config.coverage.min_subtasks {
            obs::emit_coverage_shortfall(&format!(
                "{dispatched} of {} required subtasks dispatched",
                self.config.coverage.min_subtasks
            ));
        }

        Ok(DelegationReport {
            report,
            payload,
            coverage,
            subtasks_dispatched: dispatched,
        })
    }

    async fn coordinate(
        &self,
        request: &str,
        delegator: &Delegator,
    ) -> Result<RawResponse, DelegationError> {
        let deadline = self.config.coordinator_timeout();
        let coordinate = self
            .coordinator
            .coordinate(request, delegator, &self.config.coverage);
        match tokio::time::timeout(deadline, coordinate).await {
            Ok(result) => result,
            Err(_) => Err(DelegationError::CoordinatorTimedOut {
                coordinator: self.coordinator.id().to_string(),
                timeout_ms: deadline.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for DelegationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationCoordinator")
            .field("coordinator", &self.coordinator.id())
            .field("worker", &self.worker.id())
            .field("config", &self.config)
            .finish()
    }
}
