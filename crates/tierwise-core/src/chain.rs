//! Deterministic multi-step flows with boolean gates.
//!
//! A [`GatedChain`] runs its steps strictly in order. Each step reads either
//! the original request, the previous step's output, or a named earlier
//! step's output. A step with a [`Gate`] must return a payload whose listed
//! boolean fields are all `true`; otherwise the chain stops with
//! [`ChainOutcome::GateClosed`] and the later steps never run.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::capability::{CapabilityRequest, RawResponse};
use crate::escalation::AgentTier;
use crate::extract::{extract_response, ExtractedPayload, ExtractionError};
use crate::invoke::{invoke, InvocationError};
use crate::obs;

/// Where a step takes its prompt from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepInput {
    Original,
    Previous,
    Step(String),
}

/// Boolean fields that must all be `true` for the chain to continue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    pub fields: Vec<String>,
}

impl Gate {
    pub fn require<const N: usize>(fields: [&str; N]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Fields that are missing, not boolean, or `false`.
    pub fn closed_fields(&self, payload: &Value) -> Vec<String> {
        self.fields
            .iter()
            .filter(|field| payload.get(field.as_str()) != Some(&Value::Bool(true)))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ChainStep {
    pub name: String,
    pub tier: AgentTier,
    pub input: StepInput,
    pub gate: Option<Gate>,
}

impl ChainStep {
    pub fn new(name: impl Into<String>, tier: AgentTier) -> Self {
        Self {
            name: name.into(),
            tier,
            input: StepInput::Previous,
            gate: None,
        }
    }

    pub fn reading(mut self, input: StepInput) -> Self {
        self.input = input;
        self
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub step: String,
    pub response: RawResponse,
    /// Present for gated steps.
    pub payload: Option<ExtractedPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Completed {
        outputs: Vec<StepOutput>,
    },
    GateClosed {
        step: String,
        failed_fields: Vec<String>,
        outputs: Vec<StepOutput>,
    },
}

impl ChainOutcome {
    pub fn outputs(&self) -> &[StepOutput] {
        match self {
            Self::Completed { outputs } | Self::GateClosed { outputs, .. } => outputs,
        }
    }

    /// Output of the last step, if the chain ran to completion.
    pub fn final_output(&self) -> Option<&StepOutput> {
        match self {
            Self::Completed { outputs } => outputs.last(),
            Self::GateClosed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChainError {
    #[error("chain has no steps")]
    Empty,

    #[error("step name '{0}' is used more than once")]
    DuplicateStep(String),

    #[error("step '{step}' reads from '{reference}', which is not an earlier step")]
    UnknownStep { step: String, reference: String },

    #[error("step '{step}' failed: {source}")]
    Invocation {
        step: String,
        source: InvocationError,
    },

    #[error("step '{step}' returned no usable payload: {source}")]
    Extraction {
        step: String,
        source: ExtractionError,
    },
}

#[derive(Debug, Clone)]
pub struct GatedChain {
    steps: Vec<ChainStep>,
}

impl GatedChain {
    /// Checks names are unique and every named input refers to an earlier step.
    pub fn new(steps: Vec<ChainStep>) -> Result<Self, ChainError> {
        if steps.is_empty() {
            return Err(ChainError::Empty);
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if let StepInput::Step(reference) = &step.input {
                if !seen.contains(reference.as_str()) {
                    return Err(ChainError::UnknownStep {
                        step: step.name.clone(),
                        reference: reference.clone(),
                    });
                }
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ChainError::DuplicateStep(step.name.clone()));
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub async fn run(&self, request: &str) -> Result<ChainOutcome, ChainError> {
        let request_id = Uuid::new_v4().to_string();
        self.drive(request)
            .instrument(obs::request_span("chain", &request_id))
            .await
    }

    async fn drive(&self, request: &str) -> Result<ChainOutcome, ChainError> {
        let mut outputs: Vec<StepOutput> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let prompt = prompt_for(step, request, &outputs);
            debug!(step = %step.name, "chain step started");

            let response = invoke(
                Arc::clone(&step.tier.capability),
                CapabilityRequest::new(prompt).with_schema(step.tier.output_schema.clone()),
                step.tier.timeout,
            )
            .await
            .into_result()
            .map_err(|source| ChainError::Invocation {
                step: step.name.clone(),
                source,
            })?;

            let Some(gate) = &step.gate else {
                outputs.push(StepOutput {
                    step: step.name.clone(),
                    response,
                    payload: None,
                });
                continue;
            };

            let payload = extract_response(&response).map_err(|source| ChainError::Extraction {
                step: step.name.clone(),
                source,
            })?;
            let failed_fields = gate.closed_fields(&payload.value);
            outputs.push(StepOutput {
                step: step.name.clone(),
                response,
                payload: Some(payload),
            });

            if !failed_fields.is_empty() {
                obs::emit_chain_gate_closed(&step.name, &failed_fields);
                return Ok(ChainOutcome::GateClosed {
                    step: step.name.clone(),
                    failed_fields,
                    outputs,
                });
            }
        }

        Ok(ChainOutcome::Completed { outputs })
    }
}

fn prompt_for(step: &ChainStep, request: &str, outputs: &[StepOutput]) -> String {
    let source = match &step.input {
        StepInput::Original => None,
        StepInput::Previous => outputs.last(),
        StepInput::Step(name) => outputs.iter().find(|o| &o.step == name),
    };
    match source {
        Some(output) => output.response.to_string(),
        None => request.to_string(),
    }
}
