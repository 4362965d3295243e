//! Cost-ordered escalation across agent tiers.
//!
//! The controller tries tiers strictly in order, cheapest first, and stops at
//! the first tier whose output extracts and validates. A tier that times out,
//! errors, returns unparseable text, or returns an incomplete payload is a
//! failed tier; the next tier gets the same request. When a report tier is
//! configured, the validated payload is pretty-printed and handed to it.
//!
//! The controller is an explicit state machine ([`EscalationState`]) driven by
//! [`EscalationController::step`]. `Escalated` is a transition label, not a
//! resting state: a failed `Pending(i)` moves straight to `Pending(i + 1)`.
//! Exhaustion is a reachable terminal state and is returned as a value, never
//! raised.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::capability::{Capability, CapabilityRequest, OutputSchema, RawResponse};
use crate::config::{ConfigError, PipelineConfig};
use crate::extract::{extract_response, ExtractedPayload, ExtractionError};
use crate::invoke::{invoke, InvocationError};
use crate::metrics::METRICS;
use crate::obs;
use crate::validate::{validate, CompletenessPolicy, ValidationVerdict};

/// One rung of the escalation ladder.
#[derive(Clone)]
pub struct AgentTier {
    pub capability: Arc<dyn Capability>,
    pub timeout: Duration,
    pub output_schema: Option<OutputSchema>,
}

impl AgentTier {
    pub fn new(capability: Arc<dyn Capability>, timeout: Duration) -> Self {
        Self {
            capability,
            timeout,
            output_schema: None,
        }
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    fn request(&self, prompt: &str) -> CapabilityRequest {
        CapabilityRequest::new(prompt).with_schema(self.output_schema.clone())
    }
}

impl fmt::Debug for AgentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTier")
            .field("capability", &self.capability.id())
            .field("timeout", &self.timeout)
            .field("output_schema", &self.output_schema.as_ref().map(|s| &s.name))
            .finish()
    }
}

/// Why a tier could not produce a usable answer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TierFailure {
    #[error("{0}")]
    Invocation(#[from] InvocationError),

    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("incomplete payload, failed fields: {}", .failed_fields.join(", "))]
    Incomplete {
        failed_fields: Vec<String>,
        verdict: ValidationVerdict,
    },
}

impl TierFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Invocation(e) if e.is_timeout())
    }
}

/// A failed tier, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct TierAttempt {
    pub tier: usize,
    pub capability: String,
    pub failure: TierFailure,
}

impl fmt::Display for TierAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {} ({}): {}", self.tier, self.capability, self.failure)
    }
}

/// Every configured tier failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "no tier produced a valid answer after {} tier(s): {}",
    .attempts.len(),
    render_attempts(.attempts)
)]
pub struct ExhaustionError {
    pub attempts: Vec<TierAttempt>,
}

fn render_attempts(attempts: &[TierAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Controller state. See the module docs for the transition table.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationState {
    Pending(usize),
    Validating {
        tier: usize,
        response: RawResponse,
    },
    Succeeded {
        tier: usize,
        payload: ExtractedPayload,
        verdict: ValidationVerdict,
    },
    Reported {
        tier: usize,
        payload: ExtractedPayload,
        narrative: String,
    },
    ReportFailed {
        tier: usize,
        payload: ExtractedPayload,
        error: InvocationError,
    },
    Exhausted,
}

/// Terminal result of one escalation run.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    /// A tier validated and no report tier is configured.
    Succeeded {
        tier: usize,
        payload: ExtractedPayload,
        verdict: ValidationVerdict,
        failed_tiers: Vec<TierAttempt>,
    },
    /// A tier validated and the report tier produced a narrative.
    Reported {
        tier: usize,
        payload: ExtractedPayload,
        narrative: String,
        failed_tiers: Vec<TierAttempt>,
    },
    /// A tier validated but the report call itself failed; the payload is kept.
    ReportFailed {
        tier: usize,
        payload: ExtractedPayload,
        error: InvocationError,
        failed_tiers: Vec<TierAttempt>,
    },
    Exhausted(ExhaustionError),
}

impl EscalationOutcome {
    /// The validated payload, if any tier produced one.
    pub fn payload(&self) -> Option<&ExtractedPayload> {
        match self {
            Self::Succeeded { payload, .. }
            | Self::Reported { payload, .. }
            | Self::ReportFailed { payload, .. } => Some(payload),
            Self::Exhausted(_) => None,
        }
    }

    /// Human-readable one-line diagnostic.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::Succeeded { tier, .. } => format!("tier {tier} produced a valid answer"),
            Self::Reported { tier, .. } => {
                format!("tier {tier} produced a valid answer and the report was generated")
            }
            Self::ReportFailed { tier, error, .. } => {
                format!("tier {tier} produced a valid answer but report generation failed: {error}")
            }
            Self::Exhausted(err) => err.to_string(),
        }
    }
}

/// Drives one request up the tier ladder.
#[derive(Debug, Clone)]
pub struct EscalationController {
    tiers: Vec<AgentTier>,
    policy: CompletenessPolicy,
    report: Option<AgentTier>,
}

impl EscalationController {
    pub fn new(tiers: Vec<AgentTier>, policy: CompletenessPolicy) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        Ok(Self {
            tiers,
            policy,
            report: None,
        })
    }

    /// Build tiers from bare capabilities using the configured tier timeout.
    pub fn from_capabilities(
        capabilities: Vec<Arc<dyn Capability>>,
        policy: CompletenessPolicy,
        config: &PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tiers = capabilities
            .into_iter()
            .map(|cap| AgentTier::new(cap, config.tier_timeout()))
            .collect();
        Self::new(tiers, policy)
    }

    pub fn with_report_tier(mut self, tier: AgentTier) -> Self {
        self.report = Some(tier);
        self
    }

    /// Attach a report capability using the configured report timeout.
    pub fn with_report_capability(
        self,
        capability: Arc<dyn Capability>,
        config: &PipelineConfig,
    ) -> Self {
        self.with_report_tier(AgentTier::new(capability, config.report_timeout()))
    }

    pub fn tiers(&self) -> &[AgentTier] {
        &self.tiers
    }

    pub fn has_report_tier(&self) -> bool {
        self.report.is_some()
    }

    /// Run `request` up the ladder until a terminal state.
    pub async fn run(&self, request: &str) -> EscalationOutcome {
        let request_id = Uuid::new_v4().to_string();
        self.drive(request)
            .instrument(obs::request_span("escalation", &request_id))
            .await
    }

    async fn drive(&self, request: &str) -> EscalationOutcome {
        let mut failed_tiers = Vec::new();
        let mut state = EscalationState::Pending(0);
        while !self.is_terminal(&state) {
            state = self.step(state, request, &mut failed_tiers).await;
        }
        self.finish(state, failed_tiers)
    }

    /// Whether `state` ends the run.
    pub fn is_terminal(&self, state: &EscalationState) -> bool {
        match state {
            EscalationState::Pending(_) | EscalationState::Validating { .. } => false,
            EscalationState::Succeeded { .. } => self.report.is_none(),
            EscalationState::Reported { .. }
            | EscalationState::ReportFailed { .. }
            | EscalationState::Exhausted => true,
        }
    }

    /// Apply one transition. Terminal states are returned unchanged.
    pub async fn step(
        &self,
        state: EscalationState,
        request: &str,
        failed_tiers: &mut Vec<TierAttempt>,
    ) -> EscalationState {
        match state {
            EscalationState::Pending(tier) => self.invoke_tier(tier, request, failed_tiers).await,
            EscalationState::Validating { tier, response } => {
                self.validate_tier(tier, &response, failed_tiers)
            }
            EscalationState::Succeeded {
                tier,
                payload,
                verdict,
            } => match &self.report {
                Some(report) => self.generate_report(report, tier, payload).await,
                None => EscalationState::Succeeded {
                    tier,
                    payload,
                    verdict,
                },
            },
            terminal => terminal,
        }
    }

    async fn invoke_tier(
        &self,
        tier: usize,
        request: &str,
        failed_tiers: &mut Vec<TierAttempt>,
    ) -> EscalationState {
        let Some(agent) = self.tiers.get(tier) else {
            return EscalationState::Exhausted;
        };
        obs::emit_tier_started(tier, agent.capability.id());

        let outcome = invoke(
            Arc::clone(&agent.capability),
            agent.request(request),
            agent.timeout,
        )
        .await;

        match outcome.into_result() {
            Ok(response) => EscalationState::Validating { tier, response },
            Err(err) => self.fail(tier, TierFailure::Invocation(err), failed_tiers),
        }
    }

    fn validate_tier(
        &self,
        tier: usize,
        response: &RawResponse,
        failed_tiers: &mut Vec<TierAttempt>,
    ) -> EscalationState {
        let Some(agent) = self.tiers.get(tier) else {
            return EscalationState::Exhausted;
        };
        let payload = match extract_response(response) {
            Ok(payload) => payload,
            Err(err) => return self.fail(tier, TierFailure::Extraction(err), failed_tiers),
        };

        let verdict = validate(&payload.value, &self.policy);
        if verdict.passed {
            obs::emit_tier_succeeded(tier, agent.capability.id());
            return EscalationState::Succeeded {
                tier,
                payload,
                verdict,
            };
        }

        let failed_fields = verdict
            .failed_fields()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.fail(
            tier,
            TierFailure::Incomplete {
                failed_fields,
                verdict,
            },
            failed_tiers,
        )
    }

    fn fail(
        &self,
        tier: usize,
        failure: TierFailure,
        failed_tiers: &mut Vec<TierAttempt>,
    ) -> EscalationState {
        let Some(agent) = self.tiers.get(tier) else {
            return EscalationState::Exhausted;
        };
        let capability = agent.capability.id().to_string();
        obs::emit_tier_failed(tier, &capability, &failure);
        failed_tiers.push(TierAttempt {
            tier,
            capability,
            failure,
        });

        let next = tier + 1;
        if next < self.tiers.len() {
            METRICS.inc_escalations();
            obs::emit_escalated(tier, next);
            EscalationState::Pending(next)
        } else {
            obs::emit_exhausted(self.tiers.len());
            EscalationState::Exhausted
        }
    }

    async fn generate_report(
        &self,
        report: &AgentTier,
        tier: usize,
        payload: ExtractedPayload,
    ) -> EscalationState {
        let prompt = report_prompt(&payload);
        let outcome = invoke(
            Arc::clone(&report.capability),
            report.request(&prompt),
            report.timeout,
        )
        .await;

        match outcome.into_result() {
            Ok(response) => {
                let narrative = response.into_text();
                obs::emit_report_generated(report.capability.id(), narrative.chars().count());
                EscalationState::Reported {
                    tier,
                    payload,
                    narrative,
                }
            }
            Err(error) => EscalationState::ReportFailed {
                tier,
                payload,
                error,
            },
        }
    }

    fn finish(&self, state: EscalationState, failed_tiers: Vec<TierAttempt>) -> EscalationOutcome {
        match state {
            EscalationState::Succeeded {
                tier,
                payload,
                verdict,
            } => EscalationOutcome::Succeeded {
                tier,
                payload,
                verdict,
                failed_tiers,
            },
            EscalationState::Reported {
                tier,
                payload,
                narrative,
            } => EscalationOutcome::Reported {
                tier,
                payload,
                narrative,
                failed_tiers,
            },
            EscalationState::ReportFailed {
                tier,
                payload,
                error,
            } => EscalationOutcome::ReportFailed {
                tier,
                payload,
                error,
                failed_tiers,
            },
            EscalationState::Pending(_)
            | EscalationState::Validating { .. }
            | EscalationState::Exhausted => EscalationOutcome::Exhausted(ExhaustionError {
                attempts: failed_tiers,
            }),
        }
    }
}

/// The report tier's prompt: the payload as pretty-printed JSON, non-ASCII kept.
pub fn report_prompt(payload: &ExtractedPayload) -> String {
    format!("{:#}", payload.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityError;
    use crate::validate::brand_separation_policy;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed(&'static str, &'static str);

    #[async_trait]
    impl Capability for Fixed {
        fn id(&self) -> &str {
            self.0
        }

        async fn call(&self, _request: CapabilityRequest) -> Result<RawResponse, CapabilityError> {
            Ok(RawResponse::text(self.1))
        }
    }

    const COMPLETE: &str = r#"{"anio_separacion": "2003", "motivo": "socios",
        "marca_original": "La Vaquita",
        "marcas_resultantes": [{"marca": "Supermu", "dueños": "B"}]}"#;

    fn tier(id: &'static str, body: &'static str) -> AgentTier {
        AgentTier::new(Arc::new(Fixed(id, body)), Duration::from_secs(1))
    }

    #[test]
    fn empty_ladder_is_rejected() {
        let err = EscalationController::new(vec![], brand_separation_policy()).unwrap_err();
        assert_eq!(err, ConfigError::NoTiers);
    }

    #[tokio::test]
    async fn transition_table_walks_pending_validating_succeeded() {
        let controller =
            EscalationController::new(vec![tier("fast", COMPLETE)], brand_separation_policy())
                .unwrap();
        let mut failed = Vec::new();

        let state = controller
            .step(EscalationState::Pending(0), "q", &mut failed)
            .await;
        assert!(matches!(state, EscalationState::Validating { tier: 0, .. }));
        assert!(!controller.is_terminal(&state));

        let state = controller.step(state, "q", &mut failed).await;
        assert!(matches!(state, EscalationState::Succeeded { tier: 0, .. }));
        assert!(controller.is_terminal(&state));
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn unparseable_last_tier_moves_to_exhausted() {
        let controller =
            EscalationController::new(vec![tier("fast", "no json here")], brand_separation_policy())
                .unwrap();
        let mut failed = Vec::new();
        let state = controller
            .step(
                EscalationState::Validating {
                    tier: 0,
                    response: RawResponse::text("no json here"),
                },
                "q",
                &mut failed,
            )
            .await;
        assert_eq!(state, EscalationState::Exhausted);
        assert!(matches!(failed[0].failure, TierFailure::Extraction(_)));
    }

    #[tokio::test]
    async fn out_of_range_tier_moves_to_exhausted() {
        let controller =
            EscalationController::new(vec![tier("fast", COMPLETE)], brand_separation_policy())
                .unwrap();
        let mut failed = Vec::new();

        let state = controller
            .step(
                EscalationState::Validating {
                    tier: 5,
                    response: RawResponse::text(COMPLETE),
                },
                "q",
                &mut failed,
            )
            .await;
        assert_eq!(state, EscalationState::Exhausted);

        let state = controller
            .step(EscalationState::Pending(5), "q", &mut failed)
            .await;
        assert_eq!(state, EscalationState::Exhausted);
        assert!(failed.is_empty());
    }

    #[test]
    fn report_capability_uses_the_configured_report_timeout() {
        let config = PipelineConfig {
            tier_timeout_ms: 10_000,
            report_timeout_ms: 45_000,
            ..PipelineConfig::default()
        };
        let fast: Arc<dyn Capability> = Arc::new(Fixed("fast", COMPLETE));
        let controller = EscalationController::from_capabilities(
            vec![fast],
            brand_separation_policy(),
            &config,
        )
        .unwrap()
        .with_report_capability(Arc::new(Fixed("writer", "Noticia")), &config);

        assert_eq!(controller.tiers()[0].timeout, Duration::from_secs(10));
        let report = controller.report.as_ref().unwrap();
        assert_eq!(report.timeout, Duration::from_secs(45));
        assert_eq!(report.capability.id(), "writer");
    }

    #[tokio::test]
    async fn succeeded_is_not_terminal_when_report_tier_configured() {
        let controller =
            EscalationController::new(vec![tier("fast", COMPLETE)], brand_separation_policy())
                .unwrap()
                .with_report_tier(tier("writer", "Noticia: La Vaquita se dividió."));
        let payload = crate::extract::extract(COMPLETE).unwrap();
        let verdict = validate(&payload.value, &brand_separation_policy());
        let state = EscalationState::Succeeded {
            tier: 0,
            payload,
            verdict,
        };
        assert!(!controller.is_terminal(&state));

        let mut failed = Vec::new();
        let state = controller.step(state, "q", &mut failed).await;
        match state {
            EscalationState::Reported { narrative, .. } => {
                assert!(narrative.starts_with("Noticia"));
            }
            other => panic!("expected Reported, got {other:?}"),
        }
    }

    #[test]
    fn report_prompt_is_pretty_and_keeps_non_ascii() {
        let payload = ExtractedPayload::from_value(json!({"dueños": "Señor Núñez"}));
        let prompt = report_prompt(&payload);
        assert!(prompt.contains("\n"));
        assert!(prompt.contains("Señor Núñez"));
        assert!(prompt.contains("dueños"));
    }
}
