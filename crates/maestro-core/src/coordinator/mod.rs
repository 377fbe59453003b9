//! Stage-level orchestration: plan, execute, persist, and score.
//!
//! The coordinator owns the per-stage lifecycle. A plan is built fresh for
//! every stage call, tracked in the active-plan table while the stage runs,
//! and dropped when its `StageResult` is returned. Multi-stage runs feed each
//! stage's merged data forward and finish with coherence and compliance
//! scoring over the whole pipeline.

mod coherence;

pub use coherence::{CoherenceReport, CoherenceRule, CoherenceValidator};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::breaker::{CircuitBreakerRegistry, CircuitBreakerStats};
use crate::engine::ExecutionEngine;
use crate::models::{OrchestrationPlan, PipelineOutcome, StageContext, StageResult};
use crate::planner::{CandidateProfile, FallbackMode, OrchestrationPlanner};
use crate::registry::CapabilityRegistry;
use crate::store::StageStore;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-stage weight for the global compliance score. Stages absent from
    /// the map weigh 1.0.
    pub stage_weights: HashMap<u32, f64>,
    pub fallback_mode: FallbackMode,
    /// Provider timeout for single-stage runs.
    pub task_timeout: Duration,
    /// Provider timeout for multi-stage runs, where inputs are larger.
    pub cross_stage_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stage_weights: HashMap::new(),
            fallback_mode: FallbackMode::default(),
            task_timeout: Duration::from_secs(30),
            cross_stage_timeout: Duration::from_secs(60),
        }
    }
}

pub struct StageCoordinator {
    registry: Arc<CapabilityRegistry>,
    engine: Arc<ExecutionEngine>,
    breakers: Arc<CircuitBreakerRegistry>,
    planner: OrchestrationPlanner,
    coherence: CoherenceValidator,
    store: Option<StageStore>,
    config: CoordinatorConfig,
    active_plans: RwLock<HashMap<String, OrchestrationPlan>>,
}

impl StageCoordinator {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        engine: Arc<ExecutionEngine>,
        breakers: Arc<CircuitBreakerRegistry>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            breakers,
            planner: OrchestrationPlanner::new(),
            coherence: CoherenceValidator::new(),
            store: None,
            config,
            active_plans: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_store(mut self, store: StageStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_planner(mut self, planner: OrchestrationPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn with_coherence(mut self, coherence: CoherenceValidator) -> Self {
        self.coherence = coherence;
        self
    }

    /// Plan and run one stage against the given context. Planning failures
    /// abort the stage; everything downstream degrades instead of failing.
    pub async fn orchestrate_stage(&self, stage_id: u32, ctx: &StageContext) -> StageResult {
        let candidates = self.registry.discover(stage_id).await;
        if candidates.is_empty() {
            tracing::warn!("[Coordinator] No healthy providers for stage {}", stage_id);
            return StageResult::empty(stage_id);
        }

        let profiles: Vec<CandidateProfile> = candidates
            .iter()
            .map(|p| CandidateProfile::from_provider(p.as_ref()))
            .collect();

        let plan = match self
            .planner
            .build_plan(stage_id, &profiles, self.config.fallback_mode)
        {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!("[Coordinator] Planning failed for stage {}: {}", stage_id, e);
                return StageResult::planning_failure(stage_id, e.to_string());
            }
        };

        let plan_id = plan.plan_id.clone();
        if let Ok(mut active) = self.active_plans.write() {
            active.insert(plan_id.clone(), plan.clone());
        }

        let mut result = self.engine.execute_plan(&plan, ctx).await;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&ctx.pipeline_id, &result).await {
                tracing::warn!("[Coordinator] Could not persist stage {}: {}", stage_id, e);
                result.warnings.push(format!("Stage result not persisted: {}", e));
            }
        }

        if let Ok(mut active) = self.active_plans.write() {
            active.remove(&plan_id);
        }

        result
    }

    /// Run stages in ascending order with cross-stage context, then score
    /// pipeline coherence and compliance over the collected results.
    pub async fn orchestrate_stages(
        &self,
        stage_ids: &[u32],
        base_ctx: &StageContext,
    ) -> PipelineOutcome {
        let mut ordered: Vec<u32> = stage_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        tracing::info!(
            "[Coordinator] Orchestrating pipeline {} over stages {:?}",
            base_ctx.pipeline_id,
            ordered
        );

        let mut results: BTreeMap<u32, StageResult> = BTreeMap::new();
        for stage_id in &ordered {
            let ctx = StageContext {
                pipeline_id: base_ctx.pipeline_id.clone(),
                initial_state: base_ctx.initial_state.clone(),
                cross_stage: true,
                previous_results: results.clone(),
                timeout: self.config.cross_stage_timeout,
            };
            let result = self.orchestrate_stage(*stage_id, &ctx).await;
            results.insert(*stage_id, result);
        }

        let sequence: Vec<&StageResult> = ordered.iter().filter_map(|s| results.get(s)).collect();
        let report = self.coherence.validate(&sequence);
        let compliance_score = self.compliance_score(&results);
        let global_recommendations =
            self.recommendations(&results, compliance_score, report.score);

        PipelineOutcome {
            results,
            coherence_score: report.score,
            coherence_gaps: report.gaps,
            global_recommendations,
            compliance_score,
        }
    }

    pub fn circuit_breaker_stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.breakers.stats(name)
    }

    pub fn active_plan_count(&self) -> usize {
        self.active_plans.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Weighted mean of per-stage validation scores.
    fn compliance_score(&self, results: &BTreeMap<u32, StageResult>) -> f64 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (stage_id, result) in results {
            let weight = self
                .config
                .stage_weights
                .get(stage_id)
                .copied()
                .unwrap_or(1.0);
            weighted += result.validation_score * weight;
            total_weight += weight;
        }
        if total_weight == 0.0 {
            0.0
        } else {
            weighted / total_weight
        }
    }

    fn recommendations(
        &self,
        results: &BTreeMap<u32, StageResult>,
        compliance_score: f64,
        coherence_score: f64,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        if compliance_score < 70.0 {
            recommendations.push(
                "Overall validation quality is low; review provider configurations".to_string(),
            );
        }
        if coherence_score < 80.0 {
            recommendations.push(
                "Cross-stage coherence gaps detected; revisit earlier stage outputs".to_string(),
            );
        }
        for (stage_id, result) in results {
            if !result.fallbacks_used.is_empty() || !result.warnings.is_empty() {
                recommendations.push(format!(
                    "Stage {} ran degraded ({} fallbacks, {} warnings); check provider health",
                    stage_id,
                    result.fallbacks_used.len(),
                    result.warnings.len()
                ));
            }
        }
        recommendations
    }
}
