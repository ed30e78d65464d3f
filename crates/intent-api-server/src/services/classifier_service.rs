use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::settings::{UNSET, UNSET_INT};
use crate::config::ClassifierConfig;
use crate::services::session::{Message, Role};

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable (HTTP {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("classifier transport error: {0}")]
    Transport(String),

    #[error("classifier returned no choices")]
    EmptyResponse,

    #[error("classifier returned malformed JSON ({reason}): {raw}")]
    MalformedJson { raw: String, reason: String },

    #[error("classification cancelled by caller")]
    Cancelled,
}

impl ClassifierError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "ClassifierUnavailable",
            Self::Transport(_) => "ClassifierTransportError",
            Self::EmptyResponse => "ClassifierEmptyResponse",
            Self::MalformedJson { .. } => "ClassifierMalformedJSON",
            Self::Cancelled => "ClassifierCancelled",
        }
    }

    fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        Self::MalformedJson {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Verdict produced by the classifier for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, alias = "requiresData", skip_serializing_if = "Option::is_none")]
    pub requires_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

/// Maps a transcript to a single action label.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        transcript: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassifierError>;
}

// ===== Wire types (OpenAI-compatible chat completions) =====

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub json_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Knobs left at the sentinel are omitted so the model uses its own default.
fn knob(value: f32) -> Option<f32> {
    (value != UNSET).then_some(value)
}

fn knob_int(value: i32) -> Option<i32> {
    (value != UNSET_INT).then_some(value)
}

fn classification_response_format() -> ResponseFormat {
    ResponseFormat {
        kind: "json_schema".to_string(),
        json_schema: json!({
            "name": "classification_response",
            "strict": "true",
            "schema": {
                "type": "object",
                "properties": {
                    "action": { "type": "string" }
                },
                "required": ["action"]
            }
        }),
    }
}

/// Slice from the first `{` to the last `}`; the whole input when there is
/// no such pair. Tolerates models that wrap the object in prose.
pub fn extract_json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

pub fn parse_classification(raw: &str) -> Result<ClassificationResult, ClassifierError> {
    let candidate = extract_json_object(raw);
    let result: ClassificationResult = serde_json::from_str(candidate)
        .map_err(|e| ClassifierError::malformed(raw, e.to_string()))?;

    if result.action.trim().is_empty() {
        return Err(ClassifierError::malformed(raw, "empty action"));
    }
    if let Some(confidence) = result.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ClassifierError::malformed(
                raw,
                format!("confidence {} outside [0, 1]", confidence),
            ));
        }
    }
    Ok(result)
}

/// HTTP client for the remote classifier model.
#[derive(Clone)]
pub struct ClassifierService {
    client: Client,
    config: ClassifierConfig,
    system_instruction: String,
}

impl ClassifierService {
    pub fn new(
        config: &ClassifierConfig,
        system_instruction: impl Into<String>,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .build()
            .map_err(|e| ClassifierError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Classifier client ready: endpoint={}, model={}, timeout={}s",
            config.endpoint, config.model, config.timeout_seconds
        );

        Ok(Self {
            client,
            config: config.clone(),
            system_instruction: system_instruction.into(),
        })
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    /// Leading system instruction (unless the transcript already opens with
    /// one), then the transcript, then the configured knobs.
    pub fn build_request(&self, transcript: &[Message]) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        if transcript.first().map(|m| m.role) != Some(Role::System) {
            messages.push(ChatMessage {
                role: Role::System,
                content: self.system_instruction.clone(),
            });
        }
        messages.extend(transcript.iter().map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        }));

        let cfg = &self.config;
        ChatCompletionRequest {
            model: cfg.model.clone(),
            messages,
            response_format: classification_response_format(),
            temperature: knob(cfg.temperature),
            max_tokens: knob_int(cfg.max_tokens),
            stream: false,
            top_k: knob_int(cfg.top_k),
            top_p: knob(cfg.top_p),
            min_p: knob(cfg.min_p),
            repetition_penalty: knob(cfg.repetition_penalty),
        }
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<String, ClassifierError> {
        let mut builder = self.client.post(&self.config.endpoint).json(request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            error!("Classifier request failed: {}", e);
            ClassifierError::Transport(e.to_string())
        })?;

        let status = response.status();
        debug!("Classifier responded with status {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Classifier API error: {} - {}", status, body);
            return Err(ClassifierError::Unavailable {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClassifierError::Transport(format!("Failed to read response body: {}", e)))?;

        let completion: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ClassifierError::malformed(&body, format!("completion envelope: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(ClassifierError::EmptyResponse)
    }
}

#[async_trait]
impl Classifier for ClassifierService {
    async fn classify(
        &self,
        transcript: &[Message],
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassifierError> {
        let request = self.build_request(transcript);
        debug!(
            "Sending classification request with {} messages",
            request.messages.len()
        );

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Classification cancelled before the classifier answered");
                return Err(ClassifierError::Cancelled);
            }
            result = self.send(&request) => result?,
        };

        debug!("Classifier raw answer: {}", raw);
        parse_classification(&raw)
    }
}
