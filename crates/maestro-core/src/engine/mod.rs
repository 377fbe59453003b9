//! Sequential plan execution with circuit-breaker protection.
//!
//! The engine walks a plan's execution order one provider at a time. Each
//! provider sees the shared state as merged so far, so downstream providers
//! can build on upstream output. A provider failure never aborts the stage:
//! the breaker routes to a fallback handler (or a no-op default) and the
//! stage degrades with a warning instead.

mod merge;

pub use merge::{MergeRuleSet, MergeStrategy};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::{json, Map, Value};

use crate::breaker::CircuitBreakerRegistry;
use crate::error::OrchestratorError;
use crate::models::{
    Message, MessageLog, MessageType, OrchestrationPlan, Priority, StageContext, StageResult,
    Task, TaskResult,
};
use crate::registry::CapabilityRegistry;

/// Degraded-mode replacement for a failing provider.
///
/// Handlers are synchronous and must not block: they produce a cheap
/// approximation (cached data, heuristics) from the current shared state.
/// Returning data of `Value::Null` leaves the shared state untouched.
pub trait FallbackHandler: Send + Sync {
    fn run(&self, shared_state: &Value) -> Result<TaskResult, OrchestratorError>;
}

pub struct ExecutionEngine {
    registry: Arc<CapabilityRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    merge_rules: Arc<MergeRuleSet>,
    message_log: Arc<MessageLog>,
    fallbacks: RwLock<HashMap<String, Arc<dyn FallbackHandler>>>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        merge_rules: Arc<MergeRuleSet>,
        message_log: Arc<MessageLog>,
    ) -> Self {
        Self {
            registry,
            breakers,
            merge_rules,
            message_log,
            fallbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Install a fallback handler for one provider id. Without a handler the
    /// provider degrades to a no-op that leaves the shared state as-is.
    pub fn register_fallback(&self, provider_id: impl Into<String>, handler: Arc<dyn FallbackHandler>) {
        if let Ok(mut fallbacks) = self.fallbacks.write() {
            fallbacks.insert(provider_id.into(), handler);
        }
    }

    /// Run every provider in the plan's execution order against the shared
    /// state, merging outputs as they arrive.
    pub async fn execute_plan(&self, plan: &OrchestrationPlan, ctx: &StageContext) -> StageResult {
        let started = Instant::now();
        tracing::info!(
            "[Engine] Executing plan {} for stage {} ({} providers)",
            plan.plan_id,
            plan.stage_id,
            plan.execution_order.len()
        );

        let mut merged = ctx.initial_state.clone();
        if !merged.is_object() {
            merged = Value::Object(Map::new());
        }

        let mut providers_used = Vec::new();
        let mut fallbacks_used = Vec::new();
        let mut warnings = Vec::new();
        let errors = Vec::new();

        for provider_id in &plan.execution_order {
            let Some(assignment) = plan.assignment(provider_id) else {
                warnings.push(format!("Provider {} has no assignment in plan", provider_id));
                continue;
            };
            let Some(provider) = self.registry.get(provider_id).await else {
                tracing::warn!("[Engine] Provider {} not registered, skipped", provider_id);
                warnings.push(format!("Provider {} not registered, skipped", provider_id));
                continue;
            };

            let priority = if plan.stage_id >= 3 && assignment.role == "validation" {
                Priority::High
            } else if assignment.dependencies.is_empty() {
                Priority::Medium
            } else {
                Priority::Low
            };

            let mut input = merged.clone();
            let input_obj = input.as_object_mut().expect("shared state is an object");
            input_obj.insert(
                "orchestrationContext".to_string(),
                json!({
                    "planId": plan.plan_id,
                    "stageId": plan.stage_id,
                    "role": assignment.role,
                    "dependencies": assignment.dependencies,
                    "crossStageMode": ctx.cross_stage,
                }),
            );
            if ctx.cross_stage && !ctx.previous_results.is_empty() {
                match serde_json::to_value(&ctx.previous_results) {
                    Ok(previous) => {
                        input_obj.insert("previousStageResults".to_string(), previous);
                    }
                    Err(e) => {
                        warnings.push(format!("Could not serialize previous stage results: {}", e));
                    }
                }
            }

            for dependency in &assignment.dependencies {
                self.message_log.append(Message::new(
                    provider_id.clone(),
                    dependency.clone(),
                    MessageType::Notification,
                    json!({"type": "executionStarting", "stageId": plan.stage_id}),
                    plan.plan_id.clone(),
                    priority,
                ));
            }

            let task = Task {
                id: uuid::Uuid::new_v4().to_string(),
                task_type: assignment.role.clone(),
                stage: plan.stage_id,
                input,
                priority,
                plan_id: plan.plan_id.clone(),
            };

            let breaker = self.breakers.breaker(provider_id);
            let handler = self
                .fallbacks
                .read()
                .ok()
                .and_then(|f| f.get(provider_id).cloned());

            let primary_provider = provider.clone();
            let primary_task = task.clone();
            let primary_id = provider_id.clone();
            let timeout = ctx.timeout;
            let primary = || async move {
                let result = tokio::time::timeout(timeout, primary_provider.execute(primary_task))
                    .await
                    .map_err(|_| OrchestratorError::ProviderExecution {
                        provider: primary_id.clone(),
                        message: format!("timed out after {}ms", timeout.as_millis()),
                    })??;
                if result.success {
                    Ok(result)
                } else {
                    Err(OrchestratorError::ProviderExecution {
                        provider: primary_id,
                        message: result
                            .error
                            .unwrap_or_else(|| "task reported failure".to_string()),
                    })
                }
            };

            let fallback_state = merged.clone();
            let fallback_task_id = task.id.clone();
            let fallback_id = provider_id.clone();
            let fallback = || async move {
                match handler {
                    Some(h) => h.run(&fallback_state).map_err(|e| {
                        OrchestratorError::FallbackExhausted {
                            provider: fallback_id,
                            message: e.to_string(),
                        }
                    }),
                    None => Ok(TaskResult::success(fallback_task_id, Value::Null)),
                }
            };

            match breaker.execute(primary, fallback).await {
                Ok((result, used_fallback)) => {
                    if used_fallback {
                        tracing::warn!(
                            "[Engine] Provider {} degraded to fallback in stage {}",
                            provider_id,
                            plan.stage_id
                        );
                        fallbacks_used.push(provider_id.clone());
                        warnings.push(format!("Provider {} failed, fallback used", provider_id));
                    } else {
                        providers_used.push(provider_id.clone());
                    }
                    let confidence = result.confidence;
                    if !result.data.is_null() {
                        self.merge_rules.apply(
                            &mut merged,
                            provider_id,
                            &assignment.role,
                            plan.stage_id,
                            result.data,
                        );
                    }
                    self.message_log.append(Message::new(
                        provider_id.clone(),
                        "engine",
                        MessageType::Response,
                        json!({
                            "type": "executionCompleted",
                            "success": true,
                            "confidence": confidence,
                            "fallback": used_fallback,
                        }),
                        plan.plan_id.clone(),
                        priority,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        "[Engine] Provider {} and its fallback both failed: {}",
                        provider_id,
                        e
                    );
                    fallbacks_used.push(provider_id.clone());
                    warnings.push(format!(
                        "Provider {} unavailable and fallback failed: {}",
                        provider_id, e
                    ));
                    self.message_log.append(Message::new(
                        provider_id.clone(),
                        "engine",
                        MessageType::Response,
                        json!({"type": "executionCompleted", "success": false}),
                        plan.plan_id.clone(),
                        priority,
                    ));
                }
            }
        }

        let validation_score =
            self.validation_score(&merged, plan.stage_id, warnings.len(), fallbacks_used.len());
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "[Engine] Stage {} completed in {}ms (score {:.1}, {} fallbacks)",
            plan.stage_id,
            duration_ms,
            validation_score,
            fallbacks_used.len()
        );

        StageResult {
            stage_id: plan.stage_id,
            success: errors.is_empty(),
            merged_data: merged,
            providers_used,
            fallbacks_used,
            warnings,
            errors,
            validation_score,
            duration_ms,
        }
    }

    /// A validation provider's own score wins when present; otherwise the
    /// score is derived from how cleanly the stage ran.
    fn validation_score(
        &self,
        merged: &Value,
        stage_id: u32,
        warning_count: usize,
        fallback_count: usize,
    ) -> f64 {
        if let Some(score) = merged
            .get("validationResults")
            .and_then(|v| v.get(format!("stage{}", stage_id)))
            .and_then(|v| v.get("score"))
            .and_then(Value::as_f64)
        {
            return score.clamp(0.0, 100.0);
        }
        (100.0 - 10.0 * warning_count as f64 - 5.0 * fallback_count as f64).clamp(0.0, 100.0)
    }
}
