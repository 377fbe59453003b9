use serde::{Deserialize, Serialize};

/// How fallbacks are sequenced when providers fail mid-stage.
///
/// Computed by the planner per stage; the engine itself always executes
/// providers sequentially, so this is plan metadata rather than a
/// concurrency switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackStrategy {
    Sequential,
    Parallel,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        }
    }
}

/// One provider's slot in an orchestration plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAssignment {
    pub provider_id: String,
    /// The capability id chosen as this provider's role for the stage.
    pub role: String,
    /// Provider ids that must complete before this one runs.
    pub dependencies: Vec<String>,
    pub expected_output: String,
}

/// An immutable per-stage execution plan. Built fresh on every stage call and
/// tracked in the coordinator's active-plan table until the stage completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationPlan {
    pub plan_id: String,
    pub stage_id: u32,
    pub assignments: Vec<ProviderAssignment>,
    /// Topologically sorted provider ids. Empty means "nothing to run".
    pub execution_order: Vec<String>,
    pub fallback_strategy: FallbackStrategy,
    pub estimated_duration_ms: u64,
}

impl OrchestrationPlan {
    pub fn assignment(&self, provider_id: &str) -> Option<&ProviderAssignment> {
        self.assignments.iter().find(|a| a.provider_id == provider_id)
    }

    pub fn is_empty(&self) -> bool {
        self.execution_order.is_empty()
    }
}
