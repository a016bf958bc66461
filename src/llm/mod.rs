//! Generative model abstraction and the Gemini REST adapter.
//!
//! The rest of the crate only sees [`GenerativeClient::generate`], a prompt plus an optional
//! image in, raw model text out. Parsing that text is the caller's concern.

use crate::config::Config;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while calling the generative model.
#[derive(Debug, Error)]
pub enum ModelClientError {
    /// Provider could not be reached or the client could not be built.
    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Model request failed: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Image payload sent alongside a prompt.
#[derive(Debug, Clone)]
pub struct InlineImage {
    /// MIME type reported to the model, e.g. `image/png`.
    pub mime_type: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
}

/// A single prompt, optionally carrying one image.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Instruction text.
    pub prompt: String,
    /// Optional image part appended after the prompt.
    pub image: Option<InlineImage>,
}

impl GenerationRequest {
    /// Text-only request.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }

    /// Request pairing an instruction with an image.
    pub fn with_image(prompt: impl Into<String>, image: InlineImage) -> Self {
        Self {
            prompt: prompt.into(),
            image: Some(image),
        }
    }
}

/// Interface implemented by generative model backends.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Run the prompt and return the model's text output. An empty string means the model
    /// produced no content.
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelClientError>;
}

/// Build the configured model client, or `None` when no API key is available.
pub fn build_generative_client(
    config: &Config,
) -> Result<Option<Arc<dyn GenerativeClient>>, ModelClientError> {
    let Some(api_key) = config.google_api_key.clone() else {
        tracing::warn!("GOOGLE_API_KEY not set; model operations will fail until configured");
        return Ok(None);
    };
    let client = GeminiClient::new(
        api_key,
        config.gemini_model.clone(),
        config.gemini_base_url.clone(),
    )?;
    tracing::info!(model = %config.gemini_model, "Gemini client configured");
    Ok(Some(Arc::new(client)))
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Construct a client for `model` against `base_url`.
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
    ) -> Result<Self, ModelClientError> {
        let http = Client::builder()
            .user_agent("claims-qa/0.1")
            .build()
            .map_err(|error| {
                ModelClientError::ProviderUnavailable(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }
}

fn build_payload(request: &GenerationRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(image) = &request.image {
        parts.push(json!({
            "inline_data": {
                "mime_type": image.mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(&image.data),
            }
        }));
    }
    json!({
        "contents": [{ "role": "user", "parts": parts }],
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, ModelClientError> {
        if let Some(reason) = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(ModelClientError::InvalidResponse(format!(
                "prompt blocked by provider: {reason}"
            )));
        }

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Ok(String::new());
        };
        if let Some(reason) = candidate.finish_reason.as_deref() {
            tracing::debug!(finish_reason = reason, "Gemini candidate finished");
        }

        Ok(candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelClientError> {
        let payload = build_payload(&request);
        let endpoint = self.endpoint();
        tracing::debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            has_image = request.image.is_some(),
            "Calling Gemini"
        );

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ModelClientError::ProviderUnavailable(format!(
                    "failed to reach Gemini at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ModelClientError::ProviderUnavailable(format!(
                "Gemini endpoint {endpoint} returned 404"
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelClientError::GenerationFailed(format!(
                "Gemini returned {status}: {body}"
            )));
        }

        let body: GenerateContentResponse = response.json().await.map_err(|error| {
            ModelClientError::InvalidResponse(format!("failed to decode Gemini response: {error}"))
        })?;

        body.into_text()
    }
}
