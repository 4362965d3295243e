//! Chat-completions capability over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tierwise_core::{Capability, CapabilityError, CapabilityRequest, OutputSchema, RawResponse};
use tracing::debug;

use crate::config::ChatCompletionsConfig;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a Value,
    strict: bool,
}

impl<'a> ResponseFormat<'a> {
    fn json_schema(schema: &'a OutputSchema) -> Self {
        Self {
            format_type: "json_schema",
            json_schema: JsonSchemaFormat {
                name: &schema.name,
                schema: &schema.schema,
                strict: true,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A [`Capability`] backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct ChatCompletionsCapability {
    config: ChatCompletionsConfig,
    id: String,
    http: Client,
}

impl ChatCompletionsCapability {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, CapabilityError> {
        let http = Client::builder()
            .user_agent(concat!("tierwise-http/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;
        let id = config.id.clone().unwrap_or_else(|| config.model.clone());
        Ok(Self { config, id, http })
    }

    pub fn config(&self) -> &ChatCompletionsConfig {
        &self.config
    }
}

#[async_trait]
impl Capability for ChatCompletionsCapability {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, request: CapabilityRequest) -> Result<RawResponse, CapabilityError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(instructions) = &self.config.instructions {
            messages.push(ChatMessage {
                role: "system",
                content: instructions,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            response_format: request.output_schema.as_ref().map(ResponseFormat::json_schema),
        };

        let endpoint = self.config.endpoint();
        debug!(capability = %self.id, endpoint = %endpoint, "sending chat completion");

        let mut http_request = self.http.post(&endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CapabilityError::Malformed("response has no message content".to_string())
            })?;

        debug!(capability = %self.id, chars = content.chars().count(), "chat completion received");

        // Schema-constrained replies are already JSON.
        if request.output_schema.is_some() {
            if let Ok(value) = serde_json::from_str::<Value>(&content) {
                return Ok(RawResponse::Structured(value));
            }
        }
        Ok(RawResponse::Text(content))
    }
}

impl std::fmt::Debug for ChatCompletionsCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsCapability")
            .field("id", &self.id)
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}
