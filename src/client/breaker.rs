//! Circuit breaker guarding one remote endpoint
//!
//! Closed → Open once `failure_threshold` failures land inside `window`.
//! Open → HalfOpen once `reset_timeout` has elapsed, whether or not any call
//! arrives; the state is a function of the clock, evaluated on every read.
//! HalfOpen admits one trial call: success closes, failure re-opens.

use crate::error::ClientError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    /// Rolling window failures are counted over
    pub window: Duration,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
}

struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    endpoint: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        CircuitBreakerState {
            state: inner.state,
            failure_count: inner.failures.len() as u32,
            opened_at: inner.opened_at,
        }
    }

    /// Admit a call or reject it without touching the network
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, ClientError> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                info!(endpoint = %self.endpoint, "Circuit half-open: admitting trial call");
                Ok(BreakerPermit::new(self, true))
            }
            CircuitState::Open | CircuitState::HalfOpen => Err(ClientError::CircuitOpen {
                endpoint: self.endpoint.clone(),
            }),
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state == CircuitState::Closed {
            self.prune(inner, now);
            return;
        }
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if now.duration_since(opened_at) >= self.config.reset_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = false;
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(endpoint = %self.endpoint, "Circuit closed after successful trial");
            }
            CircuitState::Closed => inner.failures.clear(),
            // Late result from a call admitted before the circuit opened
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if trial => {
                self.open(&mut inner, now);
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            _ => {}
        }
    }

    /// Forget failures older than the rolling window
    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some(first) = inner.failures.front() {
            if now.duration_since(*first) > self.config.window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn on_neutral(&self, trial: bool) {
        if trial {
            self.inner.lock().trial_in_flight = false;
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        warn!(
            endpoint = %self.endpoint,
            failure_count = inner.failures.len(),
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            "Circuit opened"
        );
    }
}

/// Admission ticket for one guarded call.
/// Dropping it unresolved frees a half-open trial slot.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }

    /// The call ended in a way that says nothing about endpoint health
    pub fn neutral(mut self) {
        self.resolved = true;
        self.breaker.on_neutral(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_neutral(self.trial);
        }
    }
}
