use serde::{Deserialize, Serialize};

/// How important a capability is to the stage it serves. Ordering matters:
/// role assignment picks the highest-criticality capability for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

impl Criticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Which pipeline stage a capability applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageAffinity {
    /// Applies to exactly one stage.
    Stage(u32),
    /// Applies to any stage.
    Any,
}

impl StageAffinity {
    pub fn matches(&self, stage: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Stage(s) => *s == stage,
        }
    }
}

impl Default for StageAffinity {
    fn default() -> Self {
        Self::Any
    }
}

/// A named unit of work a provider claims to perform. Immutable once a
/// provider declares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    pub id: String,
    #[serde(default)]
    pub stage_affinity: StageAffinity,
    pub criticality: Criticality,
    #[serde(default)]
    pub input_kinds: Vec<String>,
    #[serde(default)]
    pub output_kinds: Vec<String>,
}

impl Capability {
    pub fn new(id: impl Into<String>, criticality: Criticality) -> Self {
        Self {
            id: id.into(),
            stage_affinity: StageAffinity::Any,
            criticality,
            input_kinds: Vec::new(),
            output_kinds: Vec::new(),
        }
    }

    pub fn for_stage(mut self, stage: u32) -> Self {
        self.stage_affinity = StageAffinity::Stage(stage);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criticality_ordering_picks_critical_last() {
        assert!(Criticality::Critical > Criticality::High);
        assert!(Criticality::High > Criticality::Medium);
        assert!(Criticality::Medium > Criticality::Low);
    }

    #[test]
    fn stage_affinity_matching() {
        assert!(StageAffinity::Any.matches(1));
        assert!(StageAffinity::Any.matches(5));
        assert!(StageAffinity::Stage(3).matches(3));
        assert!(!StageAffinity::Stage(3).matches(4));
    }

    #[test]
    fn capability_builder_sets_stage() {
        let cap = Capability::new("validation", Criticality::Critical).for_stage(2);
        assert_eq!(cap.stage_affinity, StageAffinity::Stage(2));
        assert_eq!(cap.id, "validation");
    }
}
