//! Generic resilience kit (§4.13, C13): a circuit breaker keyed by
//! dependency id, a health monitor derived from breaker state, and an
//! ordered fallback chain. Generalises
//! `providers::circuit_breaker::CircuitBreakerProvider` (which wraps
//! exactly one `LLMProvider`) to any dependency — providers, tools,
//! external services — tracked independently by key.

use crate::errors::CoreError;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }
}

/// Health of one tracked dependency, derived from its breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Configuration a breaker is parameterised with. Mirrors
/// [`crate::config::CircuitBreakerConfig`] but is passed explicitly so a
/// caller can give different dependencies different thresholds.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_probes: u32,
}

impl From<&crate::config::CircuitBreakerConfig> for BreakerConfig {
    fn from(c: &crate::config::CircuitBreakerConfig) -> Self {
        Self {
            enabled: c.enabled,
            failure_threshold: c.failure_threshold,
            reset_timeout: Duration::from_millis(c.reset_timeout_ms),
            half_open_probes: c.half_open_probes,
        }
    }
}

/// A circuit breaker tracking independent state per dependency key.
/// Call [`CircuitBreaker::call`] with the dependency's key and a future
/// that performs the actual work; the breaker decides whether to let the
/// call through and records its outcome.
pub struct CircuitBreaker {
    config: BreakerConfig,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Run `f` under this breaker's policy for `key`. `is_transient`
    /// classifies a returned error as transient (counts toward tripping
    /// the breaker) or not (passed straight through without affecting
    /// breaker state), mirroring the provider-specific breaker's string
    /// matching but left to the caller since what counts as transient is
    /// dependency-specific.
    pub async fn call<F, Fut, T>(
        &self,
        key: &str,
        is_transient: impl Fn(&CoreError) -> bool,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        self.admit(key).await?;
        match f().await {
            Ok(value) => {
                self.record_success(key).await;
                Ok(value)
            }
            Err(e) => {
                if is_transient(&e) {
                    self.record_failure(key).await;
                }
                Err(e)
            }
        }
    }

    async fn admit(&self, key: &str) -> Result<(), CoreError> {
        if !self.config.enabled {
            return Ok(());
        }
        let mut states = self.states.lock().await;
        let state = states.entry(key.to_string()).or_default();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = state.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    info!(key, "circuit breaker Open -> HalfOpen");
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(CoreError::PolicyBlocked(format!(
                        "circuit breaker for '{key}' is open ({}ms remaining)",
                        (self.config.reset_timeout - elapsed).as_millis()
                    )))
                }
            }
        }
    }

    async fn record_success(&self, key: &str) {
        let mut states = self.states.lock().await;
        let state = states.entry(key.to_string()).or_default();
        state.consecutive_failures = 0;
        if state.state == CircuitState::HalfOpen {
            state.half_open_successes += 1;
            if state.half_open_successes >= self.config.half_open_probes {
                info!(key, "circuit breaker HalfOpen -> Closed");
                state.state = CircuitState::Closed;
            }
        }
    }

    async fn record_failure(&self, key: &str) {
        let mut states = self.states.lock().await;
        let state = states.entry(key.to_string()).or_default();
        state.consecutive_failures += 1;
        match state.state {
            CircuitState::Closed if state.consecutive_failures >= self.config.failure_threshold => {
                warn!(key, failures = state.consecutive_failures, "circuit breaker Closed -> Open");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                warn!(key, "circuit breaker probe failed, HalfOpen -> Open");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    /// Current health for `key`, derived from its breaker state.
    /// `HalfOpen` is reported as `Degraded` since the dependency hasn't
    /// yet proven itself recovered.
    pub async fn health(&self, key: &str) -> HealthStatus {
        let states = self.states.lock().await;
        match states.get(key).map(|s| s.state) {
            None | Some(CircuitState::Closed) => HealthStatus::Healthy,
            Some(CircuitState::HalfOpen) => HealthStatus::Degraded,
            Some(CircuitState::Open) => HealthStatus::Down,
        }
    }

    /// Health for every dependency key seen so far.
    pub async fn health_snapshot(&self) -> HashMap<String, HealthStatus> {
        let states = self.states.lock().await;
        states
            .iter()
            .map(|(k, s)| {
                let status = match s.state {
                    CircuitState::Closed => HealthStatus::Healthy,
                    CircuitState::HalfOpen => HealthStatus::Degraded,
                    CircuitState::Open => HealthStatus::Down,
                };
                (k.clone(), status)
            })
            .collect()
    }
}

/// An ordered list of interchangeable items (providers, endpoints) tried
/// in sequence until one succeeds. Unlike `providers::fallback`, which
/// only supports exactly two providers, this chain is unbounded and
/// records which rank ultimately served the request.
pub struct FallbackChain<T> {
    items: Vec<T>,
}

/// The result of running a fallback chain: the value produced plus the
/// zero-based rank of the item that produced it (0 = primary).
pub struct FallbackOutcome<R> {
    pub value: R,
    pub served_by_rank: usize,
}

impl<T> FallbackChain<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Try each item in order via `f`, returning the first success. If
    /// every item fails, returns the last error.
    pub async fn run<F, Fut, R>(&self, f: F) -> Result<FallbackOutcome<R>, CoreError>
    where
        F: Fn(&T) -> Fut,
        Fut: Future<Output = Result<R, CoreError>>,
    {
        if self.items.is_empty() {
            return Err(CoreError::Config("fallback chain has no items".into()));
        }
        let mut last_error = None;
        for (rank, item) in self.items.iter().enumerate() {
            match f(item).await {
                Ok(value) => return Ok(FallbackOutcome { value, served_by_rank: rank }),
                Err(e) => {
                    warn!(rank, "fallback chain item failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.expect("non-empty chain always sets last_error on failure"))
    }
}

#[cfg(test)]
mod tests;
