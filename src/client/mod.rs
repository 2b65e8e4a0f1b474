//! Resilient client for the remote generative model
//!
//! invoke → validate → cache → circuit breaker → retry(timeout(transport))
//!
//! Breaker and caches are owned by the client instance. Share one client
//! (behind an `Arc`) across concurrent runs to share that state.

pub mod breaker;
pub mod cache;
pub mod catalog;
pub mod gemini;
pub mod request;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerState, CircuitState};
pub use cache::{cache_key, CacheConfig, ResponseCache};
pub use catalog::{
    find_model, select_model, Budget, ModelConfig, ModelSelection, Priority, Requirements,
    TaskType, MODEL_CATALOG,
};
pub use gemini::GeminiTransport;
pub use request::{
    Attachment, ChatRequest, ChatResponse, Completion, Message, ResponseFormat, ResponseMetadata,
    Role, TokenUsage,
};
pub use retry::RetryPolicy;

use crate::error::ClientError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The remote chat/completion endpoint, as seen by the client
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Identifies the endpoint for breaker bookkeeping and logs
    fn endpoint(&self) -> &str;

    fn has_credential(&self) -> bool {
        true
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, ClientError>;

    async fn list_models(&self) -> Result<Vec<String>, ClientError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    /// Per remote call, each retry gets a fresh budget
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregated usage across every response this client produced
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct UsageTotals {
    pub requests: u64,
    pub cache_hits: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

pub struct ResilientClient {
    transport: Arc<dyn ModelTransport>,
    breaker: Arc<CircuitBreaker>,
    completions: ResponseCache<ChatResponse>,
    model_listing: ResponseCache<Vec<String>>,
    catalog_ttl: Duration,
    retry: RetryPolicy,
    timeout: Duration,
    catalog: &'static [ModelConfig],
    usage: Mutex<UsageTotals>,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn ModelTransport>, config: ClientConfig) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            transport.endpoint(),
            config.breaker.clone(),
        ));
        Self::with_breaker(transport, breaker, config)
    }

    /// Build a client around an existing breaker, e.g. one shared by several
    /// clients talking to the same endpoint. `config.breaker` is not read here;
    /// the shared breaker keeps its own settings.
    pub fn with_breaker(
        transport: Arc<dyn ModelTransport>,
        breaker: Arc<CircuitBreaker>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            breaker,
            completions: ResponseCache::new(config.cache.capacity, config.cache.completion_ttl),
            model_listing: ResponseCache::new(8, config.cache.catalog_ttl),
            catalog_ttl: config.cache.catalog_ttl,
            retry: config.retry,
            timeout: config.timeout,
            catalog: MODEL_CATALOG,
            usage: Mutex::new(UsageTotals::default()),
        }
    }

    pub fn breaker_state(&self) -> CircuitBreakerState {
        self.breaker.snapshot()
    }

    pub fn usage(&self) -> UsageTotals {
        *self.usage.lock()
    }

    /// Send a chat request through cache, breaker and retry
    pub async fn invoke(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        request.validate()?;

        let key = cache_key(request);
        if let Some(mut hit) = self.completions.get(&key).await {
            debug!(model_id = %request.model_id, key = %key, "Cache hit");
            self.usage.lock().cache_hits += 1;
            hit.metadata.cached = true;
            return Ok(hit);
        }

        let started = Instant::now();
        let (completion, attempts) = self
            .guarded(|| self.transport.complete(request))
            .await?;

        let cost_usd = match find_model(&completion.model_id).or_else(|| find_model(&request.model_id)) {
            Some(model) => model.cost(completion.token_usage),
            None => {
                warn!(model_id = %completion.model_id, "Model missing from catalog; cost recorded as zero");
                0.0
            }
        };

        let response = ChatResponse {
            model_id: completion.model_id,
            generated_text: completion.generated_text,
            token_usage: completion.token_usage,
            metadata: ResponseMetadata {
                cost_usd,
                attempts,
                latency_ms: started.elapsed().as_millis() as u64,
                cached: false,
            },
        };

        {
            let mut usage = self.usage.lock();
            usage.requests += 1;
            usage.input_tokens += response.token_usage.input;
            usage.output_tokens += response.token_usage.output;
            usage.cost_usd += cost_usd;
        }

        info!(
            model_id = %response.model_id,
            attempts,
            input_tokens = response.token_usage.input,
            output_tokens = response.token_usage.output,
            cost_usd,
            "Model call succeeded"
        );

        self.completions.insert(key, response.clone()).await;
        Ok(response)
    }

    /// Drop the cached response for `request`, e.g. when its text proved unusable
    pub async fn invalidate(&self, request: &ChatRequest) {
        self.completions.invalidate(&cache_key(request)).await;
    }

    /// Model identifiers the endpoint currently offers (cached for the catalog TTL)
    pub async fn available_models(&self) -> Result<Vec<String>, ClientError> {
        let key = format!("models:{}", self.transport.endpoint());
        if let Some(models) = self.model_listing.get(&key).await {
            return Ok(models);
        }

        let (models, _) = self.guarded(|| self.transport.list_models()).await?;
        self.model_listing
            .insert_with_ttl(key, models.clone(), self.catalog_ttl)
            .await;
        Ok(models)
    }

    pub fn select_model(
        &self,
        task: TaskType,
        requirements: Requirements,
        budget: Budget,
    ) -> Result<ModelSelection, ClientError> {
        let selection = select_model(self.catalog, task, requirements, budget)?;
        debug!(task = ?task, model_id = selection.model_id(), "{}", selection.justification);
        Ok(selection)
    }

    /// Whether the configured credential is accepted by the endpoint
    pub async fn validate_credential(&self) -> bool {
        if !self.transport.has_credential() {
            return false;
        }

        match tokio::time::timeout(self.timeout, self.transport.list_models()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Credential validation failed");
                false
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Credential validation timed out");
                false
            }
        }
    }

    /// Run `op` behind the circuit breaker, retrying transient failures.
    /// Returns the value and the number of remote calls made.
    async fn guarded<T, F, Fut>(&self, op: F) -> Result<(T, u32), ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let permit = self.breaker.try_acquire().map_err(|e| {
            warn!(endpoint = %self.breaker.endpoint(), "Circuit open: rejecting call");
            e
        })?;

        match self.with_retry(op).await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                if e.indicates_unhealthy_endpoint() {
                    permit.failure();
                } else {
                    permit.neutral();
                }
                Err(e)
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<(T, u32), ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0u32;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(value) => return Ok((value, attempt + 1)),
                Err(e) => match self.retry.next_delay(attempt, &e) {
                    Some(delay) => {
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            category = ?e.category(),
                            error = %e,
                            "Retrying model call"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(attempts = attempt + 1, error = %e, "Model call failed");
                        return Err(e);
                    }
                },
            }
        }
    }
}
