//! Error types for the report pipeline

use crate::models::GenerationAttempt;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Coarse failure class reported alongside every client error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    RateLimit,
    CircuitOpen,
    Validation,
    Auth,
    Remote,
}

// =============================
// Resilient Client Errors
// =============================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by remote service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Remote service error (HTTP {status})")]
    Server { status: u16 },

    #[error("Credential rejected (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Request rejected by remote service (HTTP {status})")]
    Rejected { status: u16 },

    #[error("Circuit open for {endpoint}")]
    CircuitOpen { endpoint: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Network(_) | ClientError::Timeout(_) => ErrorCategory::Network,
            ClientError::RateLimited { .. } => ErrorCategory::RateLimit,
            ClientError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            ClientError::Validation(_) => ErrorCategory::Validation,
            ClientError::Unauthorized { .. } => ErrorCategory::Auth,
            ClientError::Server { .. }
            | ClientError::Rejected { .. }
            | ClientError::MalformedResponse(_) => ErrorCategory::Remote,
        }
    }

    /// Transient failures worth another attempt within the same call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_)
                | ClientError::Timeout(_)
                | ClientError::RateLimited { .. }
                | ClientError::Server { .. }
        )
    }

    /// Failures that say something about the health of the remote endpoint.
    /// Caller mistakes and breaker rejections do not count.
    pub fn indicates_unhealthy_endpoint(&self) -> bool {
        self.is_retryable() || matches!(self, ClientError::MalformedResponse(_))
    }

    pub fn user_message(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "The model service could not be reached",
            ErrorCategory::RateLimit => "The model service is rate limiting requests",
            ErrorCategory::CircuitOpen => "The model service is temporarily unavailable",
            ErrorCategory::Validation => "The request was invalid",
            ErrorCategory::Auth => "The API credential was rejected",
            ErrorCategory::Remote => "The model service returned an error",
        }
    }
}

// =============================
// Generator / Corrector Errors
// =============================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Model output did not match the report schema
    #[error("Schema error: {reason}")]
    Schema { raw_text: String, reason: String },
}

impl PipelineError {
    pub fn schema(raw_text: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Schema {
            raw_text: raw_text.into(),
            reason: reason.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            PipelineError::Client(e) => e.user_message(),
            PipelineError::Schema { .. } => "The model returned data in an unexpected format",
        }
    }
}

// =============================
// Orchestration Errors
// =============================

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Generation failed: {0}")]
    GenerationFailed(PipelineError),

    #[error("Correction failed at attempt {attempt}: {source}")]
    CorrectionFailed {
        attempt: u32,
        #[source]
        source: PipelineError,
    },

    #[error("Could not achieve consistency after {attempts} attempts")]
    ConsistencyNotAchieved {
        attempts: u32,
        last_attempt: Box<GenerationAttempt>,
    },

    #[error("Run cancelled at attempt {attempt}")]
    Cancelled { attempt: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),

    // =============================
    // External Library Conversions
    // =============================
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Short categorical text safe to show an end user
    pub fn user_message(&self) -> String {
        match self {
            OrchestrationError::GenerationFailed(e) => {
                format!("Report generation failed. {}.", e.user_message())
            }
            OrchestrationError::CorrectionFailed { source, .. } => {
                format!("Correction failed. {}.", source.user_message())
            }
            OrchestrationError::ConsistencyNotAchieved { .. } => {
                "Could not achieve consistency in the generated report.".to_string()
            }
            OrchestrationError::Cancelled { .. } => "The run was cancelled.".to_string(),
            OrchestrationError::Config(_) => "The service is misconfigured.".to_string(),
            OrchestrationError::RunNotFound(_) => "No such report run.".to_string(),
            OrchestrationError::SerializationError(_)
            | OrchestrationError::HttpError(_)
            | OrchestrationError::IoError(_) => "An internal error occurred.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(ClientError::Network("reset".into()).is_retryable());
        assert!(ClientError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(ClientError::RateLimited { retry_after: None }.is_retryable());
        assert!(ClientError::Server { status: 503 }.is_retryable());

        assert!(!ClientError::Validation("empty".into()).is_retryable());
        assert!(!ClientError::Rejected { status: 400 }.is_retryable());
        assert!(!ClientError::Unauthorized { status: 401 }.is_retryable());
        assert!(!ClientError::CircuitOpen { endpoint: "x".into() }.is_retryable());
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = OrchestrationError::GenerationFailed(PipelineError::schema(
            "{\"secret\": \"raw model body\"}",
            "missing field `balance_sheet`",
        ));
        let message = err.user_message();
        assert!(!message.contains("secret"));
        assert!(message.starts_with("Report generation failed"));
    }
}
