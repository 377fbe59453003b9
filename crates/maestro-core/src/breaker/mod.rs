//! Per-dependency circuit breakers.
//!
//! Each breaker is a small state machine (CLOSED → OPEN → HALF_OPEN) that
//! stops calling a failing dependency for a cooldown period and routes calls
//! to a fallback instead. State recomputation is lazy: OPEN → HALF_OPEN is
//! evaluated on `is_available()`, not by a timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip a CLOSED breaker to OPEN.
    pub failure_threshold: u32,
    /// Cooldown before an OPEN breaker is probed again (promoted to HALF_OPEN).
    pub recovery_timeout_ms: u64,
    /// Successes required to close a HALF_OPEN breaker.
    pub success_threshold: u32,
    /// Failures older than this window no longer count toward the threshold.
    pub monitoring_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 3,
            monitoring_window_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}

/// Snapshot of a breaker's counters for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub fallback_usage_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    total_requests: u64,
    fallback_count: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            fallback_count: 0,
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

/// Failure-isolation state machine for one dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False only while OPEN. Lazily promotes OPEN → HALF_OPEN once the
    /// recovery timeout has elapsed since the last failure.
    pub fn is_available(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.recovery_timeout())
                    .unwrap_or(true);
                if elapsed {
                    tracing::info!("[CircuitBreaker:{}] open -> half_open", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.success_count += 1;
        inner.last_success_at = Some(Utc::now());
        match inner.state {
            CircuitState::HalfOpen => {
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!("[CircuitBreaker:{}] half_open -> closed", self.name);
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                }
            }
            CircuitState::Closed => {
                // Threshold counts consecutive failures.
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        // Stale failures outside the monitoring window do not accumulate.
        if let Some(last) = inner.last_failure {
            if last.elapsed() > self.config.monitoring_window() {
                inner.failure_count = 0;
            }
        }
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!("[CircuitBreaker:{}] half_open -> open (probe failed)", self.name);
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        "[CircuitBreaker:{}] closed -> open ({} consecutive failures)",
                        self.name,
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `primary` through the breaker, falling back when unavailable or on
    /// failure. Returns the result and whether the fallback produced it.
    ///
    /// No error escapes unless `fallback` itself fails; that case has no
    /// further safety net.
    pub async fn execute<T, P, PF, F, FF>(
        &self,
        primary: P,
        fallback: F,
    ) -> Result<(T, bool), OrchestratorError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Result<T, OrchestratorError>>,
        F: FnOnce() -> FF,
        FF: Future<Output = Result<T, OrchestratorError>>,
    {
        {
            let mut inner = self.lock();
            inner.total_requests += 1;
        }

        if !self.is_available() {
            self.lock().fallback_count += 1;
            let result = fallback().await?;
            return Ok((result, true));
        }

        match primary().await {
            Ok(result) => {
                self.record_success();
                Ok((result, false))
            }
            Err(e) => {
                tracing::warn!("[CircuitBreaker:{}] primary failed: {}", self.name, e);
                self.record_failure();
                self.lock().fallback_count += 1;
                let result = fallback().await?;
                Ok((result, true))
            }
        }
    }

    /// Trip the breaker open immediately.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
    }

    /// Reset all state and counters back to a fresh CLOSED breaker.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::new();
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            fallback_usage_count: inner.fallback_count,
            last_failure_at: inner.last_failure_at,
            last_success_at: inner.last_success_at,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Counter mutations never panic while holding the lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keyed table of circuit breakers, one per dependency id.
///
/// Explicitly constructed and injected; create a fresh registry per test to
/// isolate state.
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a dependency, sharing the registry's
    /// default config.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Ok(map) = self.breakers.read() {
            if let Some(b) = map.get(name) {
                return b.clone();
            }
        }
        let mut map = self
            .breakers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        map.entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_config(name, self.default_config.clone()))
            })
            .clone()
    }

    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.breakers
            .read()
            .ok()
            .and_then(|map| map.get(name).map(|b| b.stats()))
    }

    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers
            .read()
            .map(|map| map.values().map(|b| b.stats()).collect())
            .unwrap_or_default()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout_ms: 40,
            success_threshold: 3,
            monitoring_window_ms: 300_000,
        }
    }

    #[test]
    fn closed_by_default() {
        let breaker = CircuitBreaker::new("test");
        assert!(breaker.is_available());
        assert_eq!(breaker.stats().state, CircuitState::Closed);
    }

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::with_config("test", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.is_available());
        assert_eq!(breaker.stats().state, CircuitState::Open);
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let breaker = CircuitBreaker::with_config("test", fast_config());
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure();
        }
        // Never reached 5 consecutive failures.
        assert!(breaker.is_available());
    }

    #[test]
    fn recovery_cycle_closes_after_success_threshold() {
        // Scenario: threshold 5, success threshold 3.
        let breaker = CircuitBreaker::with_config("test", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.is_available());

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.is_available());
        assert_eq!(breaker.stats().state, CircuitState::HalfOpen);

        for _ in 0..3 {
            breaker.record_success();
        }
        assert_eq!(breaker.stats().state, CircuitState::Closed);
    }

    #[test]
    fn half_open_reverts_to_open_on_single_failure() {
        let breaker = CircuitBreaker::with_config("test", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.is_available());
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.stats().state, CircuitState::Open);
        assert!(!breaker.is_available());
    }

    #[tokio::test]
    async fn execute_uses_fallback_when_open() {
        let breaker = CircuitBreaker::new("test");
        breaker.force_open();

        let (result, used_fallback) = breaker
            .execute(
                || async {
                    Err::<&str, _>(OrchestratorError::ProviderExecution {
                        provider: "p".into(),
                        message: "unavailable".into(),
                    })
                },
                || async { Ok("fallback-result") },
            )
            .await
            .unwrap();

        assert_eq!(result, "fallback-result");
        assert!(used_fallback);
        // Open breaker short-circuits: no new failure recorded.
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn execute_falls_back_on_primary_error() {
        let breaker = CircuitBreaker::new("test");
        let (result, used_fallback) = breaker
            .execute(
                || async {
                    Err::<u32, _>(OrchestratorError::ProviderExecution {
                        provider: "p".into(),
                        message: "boom".into(),
                    })
                },
                || async { Ok(7) },
            )
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert!(used_fallback);
        assert_eq!(breaker.stats().failure_count, 1);
        assert_eq!(breaker.stats().fallback_usage_count, 1);
    }

    #[tokio::test]
    async fn execute_records_success() {
        let breaker = CircuitBreaker::new("test");
        let (result, used_fallback) = breaker
            .execute(|| async { Ok(1) }, || async { Ok(0) })
            .await
            .unwrap();
        assert_eq!(result, 1);
        assert!(!used_fallback);

        let stats = breaker.stats();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.fallback_usage_count, 0);
    }

    #[tokio::test]
    async fn execute_propagates_fallback_error() {
        let breaker = CircuitBreaker::new("test");
        let err = breaker
            .execute(
                || async {
                    Err::<(), _>(OrchestratorError::ProviderExecution {
                        provider: "p".into(),
                        message: "primary down".into(),
                    })
                },
                || async {
                    Err::<(), _>(OrchestratorError::FallbackExhausted {
                        provider: "p".into(),
                        message: "fallback down".into(),
                    })
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::FallbackExhausted { .. }));
    }

    #[test]
    fn monitoring_window_expires_stale_failures() {
        let breaker = CircuitBreaker::with_config(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout_ms: 60_000,
                success_threshold: 3,
                monitoring_window_ms: 30,
            },
        );
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(50));
        // The first failure is outside the window, so this is failure #1 again.
        breaker.record_failure();
        assert!(breaker.is_available());
    }

    #[test]
    fn registry_returns_same_instance_per_name() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.breaker("svc");
        let b = registry.breaker("svc");
        a.record_failure();
        assert_eq!(b.stats().failure_count, 1);
        assert!(registry.stats("svc").is_some());
        assert!(registry.stats("other").is_none());
    }
}
