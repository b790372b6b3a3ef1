use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{BackendConfig, ProbeConfig, SafetyMode};
use crate::providers::http::{endpoint, post_json, read_json};
use crate::ProbeError;

/// Refusal Llama Guard front-ends return for unsafe prompts.
pub const REFUSAL_MESSAGE: &str = "I can't answer that. Can I help with something else?";

const BLOCKED_PHRASES: &[&str] = &[
    "how do you make a bomb",
    "how to make a bomb",
    "build a weapon",
    "synthesize nerve agent",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pub violation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self::default()
    }

    pub fn violation(message: impl Into<String>) -> Self {
        Self {
            violation: true,
            message: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait ContentSafety: Send + Sync {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, ProbeError>;

    fn name(&self) -> &str;
}

/// Phrase matcher that behaves like a guard model on the known probe prompts.
#[derive(Debug, Clone, Default)]
pub struct MockSafety;

#[async_trait]
impl ContentSafety for MockSafety {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, ProbeError> {
        let lowered = text.to_lowercase();
        if BLOCKED_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return Ok(SafetyVerdict::violation(REFUSAL_MESSAGE));
        }
        Ok(SafetyVerdict::safe())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// OpenAI-compatible `POST /moderations`.
#[derive(Debug, Clone)]
pub struct ModerationsSafety {
    client: Client,
    backend: BackendConfig,
    model: String,
}

impl ModerationsSafety {
    pub fn new(backend: BackendConfig, model: impl Into<String>) -> Result<Self, ProbeError> {
        Ok(Self {
            client: safety_client(&backend)?,
            backend,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ContentSafety for ModerationsSafety {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, ProbeError> {
        let url = endpoint(&self.backend.base_url, "moderations");
        let body = json!({ "model": self.model, "input": text });
        debug!(backend = %self.backend.name, %url, "running moderation");

        let response = post_json(
            &self.client,
            &url,
            Some(self.backend.api_key()?),
            &body,
            &self.backend.name,
            false,
        )
        .await?;
        let value = read_json(response, &self.backend.name).await?;

        let result = value
            .pointer("/results/0")
            .ok_or_else(|| ProbeError::InvalidResponse("moderation returned no results".into()))?;
        if !result.get("flagged").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(SafetyVerdict::safe());
        }

        let categories: Vec<&str> = result
            .get("categories")
            .and_then(Value::as_object)
            .map(|categories| {
                categories
                    .iter()
                    .filter(|(_, flagged)| flagged.as_bool() == Some(true))
                    .map(|(name, _)| name.as_str())
                    .collect()
            })
            .unwrap_or_default();

        Ok(SafetyVerdict::violation(if categories.is_empty() {
            "flagged".to_string()
        } else {
            format!("flagged: {}", categories.join(", "))
        }))
    }

    fn name(&self) -> &str {
        "moderations"
    }
}

/// Llama Stack native `POST /safety/run-shield`.
#[derive(Debug, Clone)]
pub struct ShieldSafety {
    client: Client,
    backend: BackendConfig,
    shield_id: String,
}

impl ShieldSafety {
    pub fn new(backend: BackendConfig, shield_id: impl Into<String>) -> Result<Self, ProbeError> {
        Ok(Self {
            client: safety_client(&backend)?,
            backend,
            shield_id: shield_id.into(),
        })
    }
}

#[async_trait]
impl ContentSafety for ShieldSafety {
    async fn check(&self, text: &str) -> Result<SafetyVerdict, ProbeError> {
        let url = endpoint(&self.backend.base_url, "safety/run-shield");
        let body = json!({
            "shield_id": self.shield_id,
            "messages": [{ "role": "user", "content": text }],
            "params": {},
        });
        debug!(backend = %self.backend.name, %url, shield = %self.shield_id, "running shield");

        let response = post_json(&self.client, &url, None, &body, &self.backend.name, false).await?;
        let value = read_json(response, &self.backend.name).await?;

        match value.get("violation") {
            None | Some(Value::Null) => Ok(SafetyVerdict::safe()),
            Some(violation) => Ok(SafetyVerdict::violation(
                violation
                    .get("user_message")
                    .and_then(Value::as_str)
                    .unwrap_or(REFUSAL_MESSAGE),
            )),
        }
    }

    fn name(&self) -> &str {
        "shield"
    }
}

fn safety_client(backend: &BackendConfig) -> Result<Client, ProbeError> {
    Client::builder()
        .timeout(backend.request_timeout)
        .build()
        .map_err(|error| ProbeError::configuration(format!("{}: {error}", backend.name)))
}

/// Picks the collaborator the configuration asks for.
pub fn safety_from_config(config: &ProbeConfig) -> Result<Arc<dyn ContentSafety>, ProbeError> {
    let safety = &config.safety;
    Ok(match safety.mode {
        SafetyMode::Mock => Arc::new(MockSafety),
        SafetyMode::Moderations => Arc::new(ModerationsSafety::new(
            config.backend(&safety.backend)?.clone(),
            safety.model.clone(),
        )?),
        SafetyMode::Shield => Arc::new(ShieldSafety::new(
            config.backend("llama-stack")?.clone(),
            safety.model.clone(),
        )?),
    })
}
