//! Environment-driven configuration
//!
//! Binaries call `dotenv` first, then `AppConfig::from_env()`. A value that
//! does not parse falls back to its default and is logged.

use crate::agent::{Orchestrator, PipelineConfig};
use crate::client::{
    BreakerConfig, CacheConfig, ClientConfig, GeminiTransport, ResilientClient, RetryPolicy,
};
use crate::corrector::LlmCorrector;
use crate::error::OrchestrationError;
use crate::generator::LlmGenerator;
use crate::workflow::GenerationPreferences;
use crate::Result;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: String,
    pub gemini_base_url: Option<String>,
    pub port: u16,
    pub client: ClientConfig,
    pub pipeline: PipelineConfig,
    pub preferences: GenerationPreferences,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Env(&lookup);

        let retry_defaults = RetryPolicy::default();
        let breaker_defaults = BreakerConfig::default();
        let cache_defaults = CacheConfig::default();
        let client_defaults = ClientConfig::default();
        let pipeline_defaults = PipelineConfig::default();
        let preference_defaults = GenerationPreferences::default();

        let port = match env.get("PORT") {
            Some(_) => env.parse("PORT", DEFAULT_PORT),
            None => env.parse("API_PORT", DEFAULT_PORT),
        };

        let client = ClientConfig {
            retry: RetryPolicy {
                max_retries: env.parse("CLIENT_MAX_RETRIES", retry_defaults.max_retries),
                base_delay: env.millis("CLIENT_BASE_DELAY_MS", retry_defaults.base_delay),
                max_delay: env.millis("CLIENT_MAX_DELAY_MS", retry_defaults.max_delay),
                ..retry_defaults
            },
            breaker: BreakerConfig {
                failure_threshold: env
                    .parse("BREAKER_THRESHOLD", breaker_defaults.failure_threshold)
                    .max(1),
                reset_timeout: env.secs("BREAKER_RESET_SECS", breaker_defaults.reset_timeout),
                ..breaker_defaults
            },
            cache: CacheConfig {
                capacity: env.parse("CACHE_CAPACITY", cache_defaults.capacity).max(1),
                ..cache_defaults
            },
            timeout: env.secs("CLIENT_TIMEOUT_SECS", client_defaults.timeout),
        };

        let pipeline = PipelineConfig {
            max_attempts: env
                .parse("REPORT_MAX_ATTEMPTS", pipeline_defaults.max_attempts)
                .max(1),
            tolerance: env.parse("REPORT_TOLERANCE", pipeline_defaults.tolerance).abs(),
        };

        let preferences = GenerationPreferences {
            max_cost_per_request: env.parse(
                "DEFAULT_MAX_COST_USD",
                preference_defaults.max_cost_per_request,
            ),
            ..preference_defaults
        };

        Self {
            gemini_api_key: env.get("GEMINI_API_KEY").unwrap_or_default(),
            gemini_base_url: env.get("GEMINI_BASE_URL"),
            port,
            client,
            pipeline,
            preferences,
        }
    }
}

/// The wired-up pipeline: one shared client behind generator and corrector
pub struct Pipeline {
    pub client: Arc<ResilientClient>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppConfig {
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        if self.gemini_api_key.is_empty() {
            warn!("GEMINI_API_KEY not set; model calls will be rejected");
        }

        let transport = GeminiTransport::new(
            self.gemini_api_key.clone(),
            self.gemini_base_url.clone(),
        )
        .map_err(|e| OrchestrationError::Config(e.to_string()))?
        .with_timeout(self.client.timeout);

        let client = Arc::new(ResilientClient::new(
            Arc::new(transport),
            self.client.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::from_config(
            Box::new(LlmGenerator::new(client.clone())),
            Box::new(LlmCorrector::new(client.clone())),
            self.pipeline,
        ));

        info!(
            max_attempts = self.pipeline.max_attempts,
            tolerance = self.pipeline.tolerance,
            timeout_secs = self.client.timeout.as_secs(),
            "Pipeline initialized"
        );

        Ok(Pipeline {
            client,
            orchestrator,
        })
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Display + Copy,
        T::Err: Display,
    {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!(key, value = %raw, error = %e, default = %default, "Ignoring invalid setting");
                default
            }),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        Duration::from_millis(self.parse(key, default.as_millis() as u64))
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(key, default.as_secs()))
    }
}
