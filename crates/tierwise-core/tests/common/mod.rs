//! Scripted capability doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use tierwise_core::{Capability, CapabilityError, CapabilityRequest, RawResponse};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

#[derive(Clone)]
pub enum Step {
    Text(String),
    Structured(Value),
    Err(&'static str),
    /// Sleep, then reply with the text.
    Slow(u64, String),
    Hang,
}

impl Step {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }
}

#[derive(Clone)]
pub struct ScriptedCapability {
    id: String,
    steps: Arc<Mutex<Vec<Step>>>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedCapability {
    pub fn new(id: &str, steps: Vec<Step>) -> Self {
        Self {
            id: id.to_string(),
            steps: Arc::new(Mutex::new(steps)),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    pub fn shared(&self) -> Arc<dyn Capability> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn id(&self) -> &str {
        &self.id
    }

    async fn call(&self, request: CapabilityRequest) -> Result<RawResponse, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(request.prompt);
        let step = {
            let mut guard = self.steps.lock().await;
            if guard.is_empty() {
                Step::Err("no scripted step")
            } else {
                guard.remove(0)
            }
        };

        match step {
            Step::Text(body) => Ok(RawResponse::Text(body)),
            Step::Structured(value) => Ok(RawResponse::Structured(value)),
            Step::Err(msg) => Err(CapabilityError::Transport(msg.to_string())),
            Step::Slow(ms, body) => {
                sleep(Duration::from_millis(ms)).await;
                Ok(RawResponse::Text(body))
            }
            Step::Hang => {
                sleep(Duration::from_secs(3_600)).await;
                Ok(RawResponse::text("too late"))
            }
        }
    }
}
