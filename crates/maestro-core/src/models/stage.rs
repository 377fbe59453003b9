use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Priority;

/// A unit of work handed to a provider by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    /// Capability id the provider is expected to exercise.
    pub task_type: String,
    pub stage: u32,
    pub input: Value,
    pub priority: Priority,
    pub plan_id: String,
}

/// What a provider returns for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            data,
            confidence: None,
            error: None,
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            data: Value::Null,
            confidence: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of orchestrating a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub stage_id: u32,
    pub success: bool,
    pub merged_data: Value,
    pub providers_used: Vec<String>,
    pub fallbacks_used: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub validation_score: f64,
    /// Measured wall-clock time for the stage.
    pub duration_ms: u64,
}

impl StageResult {
    /// A stage with no work to do: empty candidate set or empty plan.
    pub fn empty(stage_id: u32) -> Self {
        Self {
            stage_id,
            success: true,
            merged_data: Value::Object(serde_json::Map::new()),
            providers_used: Vec::new(),
            fallbacks_used: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            validation_score: 100.0,
            duration_ms: 0,
        }
    }

    /// A stage aborted by a planning failure before any provider ran.
    pub fn planning_failure(stage_id: u32, error: impl Into<String>) -> Self {
        Self {
            stage_id,
            success: false,
            merged_data: Value::Object(serde_json::Map::new()),
            providers_used: Vec::new(),
            fallbacks_used: Vec::new(),
            warnings: Vec::new(),
            errors: vec![error.into()],
            validation_score: 0.0,
            duration_ms: 0,
        }
    }
}

/// Context carried through a single stage orchestration call.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Identifier of the overall pipeline run (used for persistence keys).
    pub pipeline_id: String,
    /// Shared state providers start from.
    pub initial_state: Value,
    /// When true, prior stage results are folded into provider inputs.
    pub cross_stage: bool,
    /// Results of already-completed stages, keyed by stage id.
    pub previous_results: BTreeMap<u32, StageResult>,
    /// Per-invocation timeout for provider calls.
    pub timeout: Duration,
}

impl StageContext {
    pub fn new(pipeline_id: impl Into<String>, initial_state: Value) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            initial_state,
            cross_stage: false,
            previous_results: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Aggregate outcome of a multi-stage orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub results: BTreeMap<u32, StageResult>,
    pub coherence_score: f64,
    pub coherence_gaps: Vec<String>,
    pub global_recommendations: Vec<String>,
    pub compliance_score: f64,
}
