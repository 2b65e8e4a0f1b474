//! Wire-neutral request and response types for the remote model endpoint

use crate::error::ClientError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Media types the remote endpoint accepts as inline attachments
pub const SUPPORTED_MEDIA_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/webp",
    "text/plain",
    "text/csv",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    pub data: Arc<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    Structured,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model_id: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub response_format: ResponseFormat,
}

impl ChatRequest {
    /// Reject malformed caller input before it reaches the network
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.model_id.trim().is_empty() {
            return Err(ClientError::Validation("model id is empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(ClientError::Validation("request has no messages".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ClientError::Validation(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if self.max_output_tokens == 0 {
            return Err(ClientError::Validation(
                "max_output_tokens must be positive".to_string(),
            ));
        }

        for attachment in self.messages.iter().flat_map(|m| &m.attachments) {
            if attachment.data.is_empty() {
                return Err(ClientError::Validation(format!(
                    "attachment {} is empty",
                    attachment.name
                )));
            }
            if !SUPPORTED_MEDIA_TYPES.contains(&attachment.media_type.as_str()) {
                return Err(ClientError::Validation(format!(
                    "attachment {} has unsupported media type {}",
                    attachment.name, attachment.media_type
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// What the transport hands back for one successful remote call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub model_id: String,
    pub generated_text: String,
    pub token_usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub cost_usd: f64,
    /// Remote calls made, retries included
    pub attempts: u32,
    pub latency_ms: u64,
    /// Replayed from the response cache; `cost_usd` was billed on the original call
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub model_id: String,
    pub generated_text: String,
    pub token_usage: TokenUsage,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    /// Cost this particular call added to usage totals
    pub fn billed_cost(&self) -> f64 {
        if self.metadata.cached {
            0.0
        } else {
            self.metadata.cost_usd
        }
    }
}
