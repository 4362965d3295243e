//! Remote capability boundary.
//!
//! Every agent the pipeline talks to (escalation tier, report writer,
//! coordinator helper, worker) is a [`Capability`]: one async operation that
//! takes a prompt plus an optional output schema and returns a
//! [`RawResponse`]. Whatever the capability does internally (nested tool
//! calls, web searches, sub-agents) is invisible at this boundary.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named JSON schema forwarded to capabilities that support typed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// A single call into a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub prompt: String,
    pub output_schema: Option<OutputSchema>,
}

impl CapabilityRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            output_schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Option<OutputSchema>) -> Self {
        self.output_schema = schema;
        self
    }
}

/// What a capability hands back.
///
/// `Text` is free-form and goes through the extractor when a structured
/// payload is needed. `Structured` is an already-typed record from a
/// capability that honours output schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum RawResponse {
    Text(String),
    Structured(Value),
}

impl RawResponse {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    /// Render the response as prompt-ready text.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Structured(value) => write!(f, "{value}"),
        }
    }
}

/// Failure reported by a capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("capability panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// An opaque remote agent.
#[async_trait]
pub trait Capability: Send + Sync + 'static {
    /// Stable identifier used in logs and diagnostics.
    fn id(&self) -> &str;

    async fn call(&self, request: CapabilityRequest) -> Result<RawResponse, CapabilityError>;
}
