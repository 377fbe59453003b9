//! Orchestration planning: dependency inference, topological ordering, role
//! assignment, fallback strategy and duration estimation.
//!
//! Planning is synchronous and deterministic: candidates are snapshotted into
//! [`CandidateProfile`]s, sorted by provider id, and every tie-break follows
//! that order. Residual dependency cycles never fail planning; the planner
//! force-selects the first remaining provider and logs the decision.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::models::{
    Capability, Criticality, FallbackStrategy, OrchestrationPlan, ProviderAssignment,
};
use crate::provider::Provider;

/// Base planning cost per stage.
const BASE_COST_MS: u64 = 30_000;
/// Per-provider cost, doubled for providers with a critical capability.
const PROVIDER_COST_MS: u64 = 30_000;
const CRITICAL_PROVIDER_COST_MS: u64 = 60_000;
/// Penalty per dependency edge (edges force sequential execution).
const DEPENDENCY_PENALTY_MS: u64 = 10_000;

/// How eagerly the orchestration may degrade to fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    Aggressive,
    Conservative,
    Disabled,
}

impl Default for FallbackMode {
    fn default() -> Self {
        Self::Conservative
    }
}

/// Declares that providers with the `prerequisite` capability must run before
/// providers with the `dependent` capability, from `min_stage` on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRule {
    pub prerequisite: String,
    pub dependent: String,
    pub min_stage: u32,
}

/// Snapshot of a provider's identity and declared capabilities, taken at
/// planning time so the plan cannot observe later registry mutations.
#[derive(Debug, Clone)]
pub struct CandidateProfile {
    pub provider_id: String,
    pub capabilities: Vec<Capability>,
}

impl CandidateProfile {
    pub fn from_provider(provider: &dyn Provider) -> Self {
        Self {
            provider_id: provider.id().to_string(),
            capabilities: provider.capabilities(),
        }
    }

    fn has_capability(&self, capability_id: &str) -> bool {
        self.capabilities.iter().any(|c| c.id == capability_id)
    }

    fn has_critical_capability(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.criticality == Criticality::Critical)
    }
}

pub struct OrchestrationPlanner {
    rules: Vec<DependencyRule>,
}

impl OrchestrationPlanner {
    pub fn new() -> Self {
        Self {
            rules: Self::default_rules(),
        }
    }

    pub fn with_rules(rules: Vec<DependencyRule>) -> Self {
        Self { rules }
    }

    /// Validation gates analysis in the later, higher-stakes stages.
    fn default_rules() -> Vec<DependencyRule> {
        vec![DependencyRule {
            prerequisite: "validation".to_string(),
            dependent: "risk-analysis".to_string(),
            min_stage: 3,
        }]
    }

    /// Build an immutable plan for one stage. An empty candidate list yields
    /// an empty plan ("nothing to run"), not an error.
    pub fn build_plan(
        &self,
        stage_id: u32,
        candidates: &[CandidateProfile],
        fallback_mode: FallbackMode,
    ) -> Result<OrchestrationPlan, OrchestratorError> {
        let mut sorted: Vec<&CandidateProfile> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));

        let mut seen = HashSet::new();
        for candidate in &sorted {
            if !seen.insert(candidate.provider_id.as_str()) {
                return Err(OrchestratorError::Planning(format!(
                    "duplicate candidate provider id '{}'",
                    candidate.provider_id
                )));
            }
        }

        let dependencies: Vec<BTreeSet<String>> = sorted
            .iter()
            .map(|c| self.infer_dependencies(c, &sorted, stage_id))
            .collect();

        let execution_order = topological_order(&sorted, &dependencies);

        let assignments = sorted
            .iter()
            .zip(dependencies.iter())
            .map(|(candidate, deps)| {
                let role = assign_role(candidate, stage_id);
                let expected_output = expected_output(candidate, &role, stage_id);
                ProviderAssignment {
                    provider_id: candidate.provider_id.clone(),
                    role,
                    dependencies: deps.iter().cloned().collect(),
                    expected_output,
                }
            })
            .collect::<Vec<_>>();

        let edge_count: usize = dependencies.iter().map(|d| d.len()).sum();
        let estimated_duration_ms = estimate_duration(&sorted, edge_count, stage_id);
        let fallback_strategy = select_fallback_strategy(stage_id, fallback_mode);

        let plan = OrchestrationPlan {
            plan_id: format!("plan-s{}-{}", stage_id, uuid::Uuid::new_v4()),
            stage_id,
            assignments,
            execution_order,
            fallback_strategy,
            estimated_duration_ms,
        };

        tracing::debug!(
            "[Planner] Stage {}: {} providers, {} dependency edges, estimated {}ms",
            stage_id,
            plan.execution_order.len(),
            edge_count,
            plan.estimated_duration_ms
        );
        Ok(plan)
    }

    fn infer_dependencies(
        &self,
        candidate: &CandidateProfile,
        candidates: &[&CandidateProfile],
        stage_id: u32,
    ) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        for rule in &self.rules {
            if stage_id < rule.min_stage || !candidate.has_capability(&rule.dependent) {
                continue;
            }
            for other in candidates {
                if other.provider_id != candidate.provider_id
                    && other.has_capability(&rule.prerequisite)
                {
                    deps.insert(other.provider_id.clone());
                }
            }
        }
        deps
    }
}

impl Default for OrchestrationPlanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Iteratively selects providers whose dependencies are already ordered or
/// absent from the candidate set. A residual cycle force-selects the first
/// remaining provider (in id order) to guarantee termination.
fn topological_order(
    sorted: &[&CandidateProfile],
    dependencies: &[BTreeSet<String>],
) -> Vec<String> {
    let candidate_ids: HashSet<&str> = sorted.iter().map(|c| c.provider_id.as_str()).collect();
    let mut order: Vec<String> = Vec::with_capacity(sorted.len());
    let mut remaining: Vec<usize> = (0..sorted.len()).collect();

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|&i| {
            dependencies[i].iter().all(|dep| {
                order.iter().any(|o| o == dep) || !candidate_ids.contains(dep.as_str())
            })
        });

        let next = match ready {
            Some(pos) => remaining.remove(pos),
            None => {
                let forced = remaining.remove(0);
                tracing::warn!(
                    "[Planner] Dependency cycle among remaining providers; force-selecting {}",
                    sorted[forced].provider_id
                );
                forced
            }
        };
        order.push(sorted[next].provider_id.clone());
    }

    order
}

/// The highest-criticality capability applicable to the stage becomes the
/// provider's role label.
fn assign_role(candidate: &CandidateProfile, stage_id: u32) -> String {
    let mut applicable: Vec<&Capability> = candidate
        .capabilities
        .iter()
        .filter(|c| c.stage_affinity.matches(stage_id))
        .collect();
    applicable.sort_by(|a, b| b.criticality.cmp(&a.criticality).then(a.id.cmp(&b.id)));
    applicable
        .first()
        .map(|c| c.id.clone())
        .unwrap_or_else(|| "assistant".to_string())
}

fn expected_output(candidate: &CandidateProfile, role: &str, stage_id: u32) -> String {
    candidate
        .capabilities
        .iter()
        .find(|c| c.id == role)
        .and_then(|c| c.output_kinds.first().cloned())
        .unwrap_or_else(|| format!("{} output for stage {}", role, stage_id))
}

/// Stage 3 and up always degrade sequentially; parallel fallback requires an
/// explicitly aggressive configuration.
fn select_fallback_strategy(stage_id: u32, mode: FallbackMode) -> FallbackStrategy {
    if stage_id >= 3 {
        return FallbackStrategy::Sequential;
    }
    match mode {
        FallbackMode::Aggressive => FallbackStrategy::Parallel,
        FallbackMode::Conservative | FallbackMode::Disabled => FallbackStrategy::Sequential,
    }
}

fn estimate_duration(sorted: &[&CandidateProfile], edge_count: usize, stage_id: u32) -> u64 {
    let provider_cost: u64 = sorted
        .iter()
        .map(|c| {
            if c.has_critical_capability() {
                CRITICAL_PROVIDER_COST_MS
            } else {
                PROVIDER_COST_MS
            }
        })
        .sum();
    let penalty = edge_count as u64 * DEPENDENCY_PENALTY_MS;
    let raw = BASE_COST_MS + provider_cost + penalty;
    (raw as f64 * stage_complexity(stage_id)).round() as u64
}

fn stage_complexity(stage_id: u32) -> f64 {
    match stage_id {
        1 => 1.0,
        2 => 1.2,
        3 => 1.5,
        4 => 1.8,
        5 => 2.0,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Criticality;

    fn profile(id: &str, caps: &[Capability]) -> CandidateProfile {
        CandidateProfile {
            provider_id: id.to_string(),
            capabilities: caps.to_vec(),
        }
    }

    fn chain_planner() -> OrchestrationPlanner {
        OrchestrationPlanner::with_rules(vec![
            DependencyRule {
                prerequisite: "a".into(),
                dependent: "b".into(),
                min_stage: 1,
            },
            DependencyRule {
                prerequisite: "a".into(),
                dependent: "c".into(),
                min_stage: 1,
            },
            DependencyRule {
                prerequisite: "b".into(),
                dependent: "c".into(),
                min_stage: 1,
            },
        ])
    }

    #[test]
    fn execution_order_respects_dependency_chain() {
        // Ids chosen so lexicographic order alone would be wrong.
        let candidates = vec![
            profile("a-third", &[Capability::new("c", Criticality::Medium)]),
            profile("m-second", &[Capability::new("b", Criticality::Medium)]),
            profile("z-first", &[Capability::new("a", Criticality::Medium)]),
        ];

        let plan = chain_planner()
            .build_plan(1, &candidates, FallbackMode::Conservative)
            .unwrap();
        assert_eq!(plan.execution_order, vec!["z-first", "m-second", "a-third"]);

        let third = plan.assignment("a-third").unwrap();
        assert_eq!(third.dependencies, vec!["m-second", "z-first"]);
    }

    #[test]
    fn planning_is_deterministic() {
        let candidates = vec![
            profile("p1", &[Capability::new("a", Criticality::Low)]),
            profile("p2", &[Capability::new("b", Criticality::Low)]),
            profile("p3", &[Capability::new("c", Criticality::Low)]),
        ];
        let planner = chain_planner();

        let first = planner
            .build_plan(2, &candidates, FallbackMode::Conservative)
            .unwrap();
        let second = planner
            .build_plan(2, &candidates, FallbackMode::Conservative)
            .unwrap();
        assert_eq!(first.execution_order, second.execution_order);
        assert_eq!(first.execution_order, vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn cycle_is_broken_deterministically() {
        let planner = OrchestrationPlanner::with_rules(vec![
            DependencyRule {
                prerequisite: "a".into(),
                dependent: "b".into(),
                min_stage: 1,
            },
            DependencyRule {
                prerequisite: "b".into(),
                dependent: "a".into(),
                min_stage: 1,
            },
        ]);
        let candidates = vec![
            profile("p1", &[Capability::new("a", Criticality::Low)]),
            profile("p2", &[Capability::new("b", Criticality::Low)]),
        ];

        let plan = planner
            .build_plan(1, &candidates, FallbackMode::Conservative)
            .unwrap();
        // Terminates, orders everything, force-selects in id order.
        assert_eq!(plan.execution_order, vec!["p1", "p2"]);
    }

    #[test]
    fn empty_candidates_yield_empty_plan() {
        let plan = OrchestrationPlanner::new()
            .build_plan(1, &[], FallbackMode::Conservative)
            .unwrap();
        assert!(plan.is_empty());
        assert!(plan.assignments.is_empty());
    }

    #[test]
    fn duplicate_candidate_ids_fail_planning() {
        let candidates = vec![
            profile("p1", &[Capability::new("a", Criticality::Low)]),
            profile("p1", &[Capability::new("b", Criticality::Low)]),
        ];
        let err = OrchestrationPlanner::new()
            .build_plan(1, &candidates, FallbackMode::Conservative)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Planning(_)));
    }

    #[test]
    fn default_rule_orders_validation_before_analysis_from_stage_three() {
        let planner = OrchestrationPlanner::new();
        let candidates = vec![
            profile("analysis", &[Capability::new("risk-analysis", Criticality::High)]),
            profile("validator", &[Capability::new("validation", Criticality::Critical)]),
        ];

        let stage2 = planner
            .build_plan(2, &candidates, FallbackMode::Conservative)
            .unwrap();
        assert!(stage2.assignment("analysis").unwrap().dependencies.is_empty());

        let stage3 = planner
            .build_plan(3, &candidates, FallbackMode::Conservative)
            .unwrap();
        assert_eq!(
            stage3.assignment("analysis").unwrap().dependencies,
            vec!["validator"]
        );
        assert_eq!(stage3.execution_order, vec!["validator", "analysis"]);
    }

    #[test]
    fn role_is_highest_criticality_capability_for_stage() {
        let candidate = profile(
            "multi",
            &[
                Capability::new("documentation", Criticality::Low),
                Capability::new("validation", Criticality::Critical).for_stage(3),
                Capability::new("risk-analysis", Criticality::High),
            ],
        );

        let plan3 = OrchestrationPlanner::new()
            .build_plan(3, &[candidate.clone()], FallbackMode::Conservative)
            .unwrap();
        assert_eq!(plan3.assignments[0].role, "validation");

        // Stage 4: the stage-3-scoped capability no longer applies.
        let plan4 = OrchestrationPlanner::new()
            .build_plan(4, &[candidate], FallbackMode::Conservative)
            .unwrap();
        assert_eq!(plan4.assignments[0].role, "risk-analysis");
    }

    #[test]
    fn fallback_strategy_selection() {
        assert_eq!(
            select_fallback_strategy(3, FallbackMode::Aggressive),
            FallbackStrategy::Sequential
        );
        assert_eq!(
            select_fallback_strategy(1, FallbackMode::Aggressive),
            FallbackStrategy::Parallel
        );
        assert_eq!(
            select_fallback_strategy(1, FallbackMode::Conservative),
            FallbackStrategy::Sequential
        );
    }

    #[test]
    fn duration_estimate_scales_with_criticality_edges_and_stage() {
        let plain = vec![profile("p1", &[Capability::new("a", Criticality::Low)])];
        let critical = vec![profile("p1", &[Capability::new("a", Criticality::Critical)])];

        let planner = OrchestrationPlanner::with_rules(vec![]);
        let base = planner
            .build_plan(1, &plain, FallbackMode::Conservative)
            .unwrap();
        let crit = planner
            .build_plan(1, &critical, FallbackMode::Conservative)
            .unwrap();
        assert_eq!(base.estimated_duration_ms, 60_000);
        assert_eq!(crit.estimated_duration_ms, 90_000);

        let stage5 = planner
            .build_plan(5, &plain, FallbackMode::Conservative)
            .unwrap();
        assert_eq!(stage5.estimated_duration_ms, 120_000);
    }
}
