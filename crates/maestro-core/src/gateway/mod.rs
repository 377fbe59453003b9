//! Modern/legacy dual call path behind one circuit breaker.
//!
//! Every capability can be served by a modern registered provider or by a
//! legacy service. The modern path runs through a per-capability breaker with
//! the legacy service as its fallback; when the modern path is switched off
//! (globally or per capability) the legacy service is called directly and the
//! breaker is never touched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breaker::CircuitBreakerRegistry;
use crate::error::OrchestratorError;
use crate::models::{Priority, Task};
use crate::registry::CapabilityRegistry;

/// Confidence attached to every legacy result.
const LEGACY_CONFIDENCE: f64 = 0.7;
/// Default confidence when a modern provider reports none.
const DEFAULT_MODERN_CONFIDENCE: f64 = 0.9;

/// The pre-existing implementation the gateway degrades to.
#[async_trait]
pub trait LegacyService: Send + Sync {
    async fn invoke(&self, capability_id: &str, input: &Value) -> Result<Value, OrchestratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Modern,
    Legacy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub data: Value,
    pub source: ResponseSource,
    pub confidence: f64,
    pub warnings: Vec<String>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Master switch for the modern path.
    pub enable_modern: bool,
    /// Per-capability overrides; a capability mapped to `false` stays on the
    /// legacy path even when `enable_modern` is true.
    pub feature_flags: HashMap<String, bool>,
    /// Timeout for one modern provider invocation.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enable_modern: true,
            feature_flags: HashMap::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub total_requests: u64,
    pub modern_requests: u64,
    pub legacy_requests: u64,
}

pub struct DegradationGateway {
    registry: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    legacy: Arc<dyn LegacyService>,
    config: GatewayConfig,
    /// Requests answered by legacy without touching a breaker.
    bypassed_requests: AtomicU64,
}

struct GatewayPayload {
    data: Value,
    confidence: f64,
}

impl DegradationGateway {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        legacy: Arc<dyn LegacyService>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            legacy,
            config,
            bypassed_requests: AtomicU64::new(0),
        }
    }

    fn modern_enabled(&self, capability_id: &str) -> bool {
        self.config.enable_modern
            && self
                .config
                .feature_flags
                .get(capability_id)
                .copied()
                .unwrap_or(true)
    }

    /// Serve one capability invocation. Only a failing legacy path can return
    /// an error.
    pub async fn invoke(
        &self,
        capability_id: &str,
        input: Value,
    ) -> Result<GatewayResponse, OrchestratorError> {
        let started = Instant::now();

        if !self.modern_enabled(capability_id) {
            tracing::debug!("[Gateway] Modern path disabled for {}", capability_id);
            self.bypassed_requests.fetch_add(1, Ordering::Relaxed);
            let data = self.legacy.invoke(capability_id, &input).await?;
            return Ok(GatewayResponse {
                data,
                source: ResponseSource::Legacy,
                confidence: LEGACY_CONFIDENCE,
                warnings: vec![format!(
                    "Modern path disabled for '{}'; legacy result",
                    capability_id
                )],
                processing_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        let breaker = self.breakers.breaker(&format!("gateway:{}", capability_id));

        let registry = self.registry.clone();
        let cap = capability_id.to_string();
        let modern_input = input.clone();
        let timeout = self.config.timeout;
        let primary = || async move {
            let mut providers = registry.find_capable(&cap, None).await;
            providers.sort_by(|a, b| a.id().cmp(b.id()));
            let provider = providers
                .into_iter()
                .next()
                .ok_or_else(|| OrchestratorError::ProviderNotFound(cap.clone()))?;

            let task = Task {
                id: uuid::Uuid::new_v4().to_string(),
                task_type: cap.clone(),
                stage: 0,
                input: modern_input,
                priority: Priority::Medium,
                plan_id: format!("gateway-{}", uuid::Uuid::new_v4()),
            };
            let result = tokio::time::timeout(timeout, provider.execute(task))
                .await
                .map_err(|_| OrchestratorError::ProviderExecution {
                    provider: provider.id().to_string(),
                    message: format!("timed out after {}ms", timeout.as_millis()),
                })??;
            if result.success {
                Ok(GatewayPayload {
                    data: result.data,
                    confidence: result.confidence.unwrap_or(DEFAULT_MODERN_CONFIDENCE),
                })
            } else {
                Err(OrchestratorError::ProviderExecution {
                    provider: provider.id().to_string(),
                    message: result
                        .error
                        .unwrap_or_else(|| "task reported failure".to_string()),
                })
            }
        };

        let legacy = self.legacy.clone();
        let legacy_cap = capability_id.to_string();
        let fallback = || async move {
            let data = legacy.invoke(&legacy_cap, &input).await?;
            Ok(GatewayPayload {
                data,
                confidence: LEGACY_CONFIDENCE,
            })
        };

        let (payload, used_fallback) = breaker.execute(primary, fallback).await?;
        let warnings = if used_fallback {
            vec![format!(
                "Modern path failed for '{}'; legacy result",
                capability_id
            )]
        } else {
            Vec::new()
        };

        Ok(GatewayResponse {
            data: payload.data,
            source: if used_fallback {
                ResponseSource::Legacy
            } else {
                ResponseSource::Modern
            },
            confidence: payload.confidence,
            warnings,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Aggregated request counts across all gateway breakers plus the
    /// breaker-bypassing disabled path.
    pub fn stats(&self) -> GatewayStats {
        let bypassed = self.bypassed_requests.load(Ordering::Relaxed);
        let mut total = bypassed;
        let mut legacy = bypassed;
        for stats in self.breakers.all_stats() {
            if !stats.name.starts_with("gateway:") {
                continue;
            }
            total += stats.total_requests;
            legacy += stats.fallback_usage_count;
        }
        GatewayStats {
            total_requests: total,
            modern_requests: total - legacy,
            legacy_requests: legacy,
        }
    }
}
