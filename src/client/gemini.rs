//! Gemini API transport
//!
//! Maps wire-neutral chat requests onto the `generateContent` REST API.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::request::{ChatRequest, Completion, ResponseFormat, Role, TokenUsage};
use super::ModelTransport;
use crate::error::ClientError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Per HTTP request, unless overridden with `with_timeout`
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Reusable Gemini transport (connection-pooled)
pub struct GeminiTransport {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiTransport {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn require_key(&self) -> Result<&str, ClientError> {
        if self.api_key.is_empty() {
            return Err(ClientError::Validation(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }
        Ok(&self.api_key)
    }
}

#[async_trait]
impl ModelTransport for GeminiTransport {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ClientError> {
        let key = self.require_key()?;
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model_id);

        let body = GeminiRequest::from_chat(request);

        info!(model_id = %request.model_id, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let error_text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %error_text, "Gemini API error response");
            return Err(classify_status(status, retry_after, self.timeout));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            ClientError::MalformedResponse(format!("Gemini parse error: {}", e))
        })?;

        let candidate = gemini_response.candidates.first().ok_or_else(|| {
            ClientError::MalformedResponse("No candidates in Gemini response".to_string())
        })?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            warn!(model_id = %request.model_id, "Gemini response blocked by safety filter");
        }

        let generated_text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        if generated_text.is_empty() {
            return Err(ClientError::MalformedResponse(
                "Empty response from Gemini".to_string(),
            ));
        }

        let token_usage = gemini_response
            .usage_metadata
            .map(|u| TokenUsage {
                input: u.prompt_token_count,
                output: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(Completion {
            model_id: request.model_id.clone(),
            generated_text,
            token_usage,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let key = self.require_key()?;
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let error_text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %error_text, "Gemini model listing failed");
            return Err(classify_status(status, retry_after, self.timeout));
        }

        let listing: ModelListing = response
            .json()
            .await
            .map_err(|e| ClientError::MalformedResponse(format!("model listing: {}", e.without_url())))?;

        Ok(listing
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

/// The error text never carries the request URL
fn classify_transport_error(e: reqwest::Error, timeout: Duration) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(timeout)
    } else {
        ClientError::Network(e.without_url().to_string())
    }
}

/// Map an HTTP status onto the client error taxonomy
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    timeout: Duration,
) -> ClientError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT => ClientError::Timeout(timeout),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized {
            status: status.as_u16(),
        },
        s if s.is_server_error() => ClientError::Server { status: s.as_u16() },
        s => ClientError::Rejected { status: s.as_u16() },
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

impl GeminiRequest {
    fn from_chat(request: &ChatRequest) -> Self {
        let engine = base64::engine::general_purpose::STANDARD;

        let system_text: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text.as_str())
            .collect();

        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let mut parts = vec![Part::text(m.text.clone())];
                parts.extend(m.attachments.iter().map(|a| Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: a.media_type.clone(),
                        data: engine.encode(a.data.as_slice()),
                    }),
                }));
                Content {
                    role: Some(match m.role {
                        Role::Model => "model".to_string(),
                        _ => "user".to_string(),
                    }),
                    parts,
                }
            })
            .collect();

        Self {
            contents,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: match request.response_format {
                    ResponseFormat::Structured => Some("application/json".to_string()),
                    ResponseFormat::Text => None,
                },
            },
            system_instruction: (!system_text.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part::text(system_text.join("\n\n"))],
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct ModelListing {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}
