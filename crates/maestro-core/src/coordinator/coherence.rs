//! Cross-stage coherence checks.
//!
//! A rule names a field of an earlier stage's merged data whose items are
//! expected to be carried forward into the next stage's output. Items may be
//! plain strings or objects; objects are filtered to high and critical
//! priority and identified by their `id` (or `name`) field.

use serde_json::Value;

use crate::models::StageResult;

#[derive(Debug, Clone)]
pub struct CoherenceRule {
    /// Field of the earlier stage's merged data listing items to carry forward.
    pub source_field: String,
    /// Restrict the rule to one earlier stage; `None` applies to every pair.
    pub from_stage: Option<u32>,
    /// Subtracted from the coherence score per violated rule.
    pub penalty: f64,
}

impl CoherenceRule {
    pub fn carry_forward(source_field: impl Into<String>) -> Self {
        Self {
            source_field: source_field.into(),
            from_stage: None,
            penalty: 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoherenceReport {
    pub score: f64,
    pub gaps: Vec<String>,
}

pub struct CoherenceValidator {
    rules: Vec<CoherenceRule>,
}

impl CoherenceValidator {
    pub fn new() -> Self {
        Self {
            rules: vec![CoherenceRule::carry_forward("values")],
        }
    }

    pub fn with_rules(rules: Vec<CoherenceRule>) -> Self {
        Self { rules }
    }

    /// Evaluate consecutive pairs of an ordered stage sequence. The score
    /// starts at 100 and loses each violated rule's penalty, floored at 0.
    pub fn validate(&self, ordered: &[&StageResult]) -> CoherenceReport {
        let mut score = 100.0;
        let mut gaps = Vec::new();

        for pair in ordered.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            for rule in &self.rules {
                if rule.from_stage.is_some_and(|s| s != prev.stage_id) {
                    continue;
                }
                let items = collect_items(&prev.merged_data, &rule.source_field);
                if items.is_empty() {
                    continue;
                }
                let haystack = next.merged_data.to_string();
                let missing: Vec<&String> =
                    items.iter().filter(|item| !haystack.contains(*item)).collect();
                if !missing.is_empty() {
                    score -= rule.penalty;
                    gaps.push(format!(
                        "Stage {} '{}' items not referenced in stage {}: {}",
                        prev.stage_id,
                        rule.source_field,
                        next.stage_id,
                        missing
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
            }
        }

        CoherenceReport {
            score: score.max(0.0),
            gaps,
        }
    }
}

impl Default for CoherenceValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Items under `field`, looked up at the top level of the merged data and one
/// level down (provider outputs merge under their provider id).
fn collect_items(merged: &Value, field: &str) -> Vec<String> {
    let Some(root) = merged.as_object() else {
        return Vec::new();
    };
    let mut items = Vec::new();
    if let Some(list) = root.get(field) {
        extract_from(list, &mut items);
    }
    for nested in root.values() {
        if let Some(list) = nested.get(field) {
            extract_from(list, &mut items);
        }
    }
    items
}

fn extract_from(list: &Value, items: &mut Vec<String>) {
    let Some(entries) = list.as_array() else {
        return;
    };
    for entry in entries {
        match entry {
            Value::String(s) => items.push(s.clone()),
            Value::Object(obj) => {
                let priority = obj
                    .get("priority")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if priority != "high" && priority != "critical" {
                    continue;
                }
                if let Some(id) = obj
                    .get("id")
                    .or_else(|| obj.get("name"))
                    .and_then(Value::as_str)
                {
                    items.push(id.to_string());
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage(stage_id: u32, merged: Value) -> StageResult {
        let mut result = StageResult::empty(stage_id);
        result.merged_data = merged;
        result
    }

    #[test]
    fn carried_forward_values_score_full() {
        let s1 = stage(1, json!({"values": ["customer-data", "billing"]}));
        let s2 = stage(2, json!({"risk": "threats against customer-data and billing"}));
        let report = CoherenceValidator::new().validate(&[&s1, &s2]);
        assert_eq!(report.score, 100.0);
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn dropped_values_cost_penalty_and_name_the_gap() {
        let s1 = stage(1, json!({"values": ["customer-data", "billing"]}));
        let s2 = stage(2, json!({"risk": "threats against billing only"}));
        let report = CoherenceValidator::new().validate(&[&s1, &s2]);
        assert_eq!(report.score, 85.0);
        assert_eq!(report.gaps.len(), 1);
        assert!(report.gaps[0].contains("customer-data"));
        assert!(!report.gaps[0].contains("billing,"));
    }

    #[test]
    fn object_items_filter_to_high_priority() {
        let s1 = stage(
            1,
            json!({"values": [
                {"id": "v-critical", "priority": "critical"},
                {"id": "v-low", "priority": "low"},
            ]}),
        );
        let s2 = stage(2, json!({"notes": "nothing carried over"}));
        let report = CoherenceValidator::new().validate(&[&s1, &s2]);
        // Only the critical item counts as a gap.
        assert_eq!(report.gaps.len(), 1);
        assert!(report.gaps[0].contains("v-critical"));
        assert!(!report.gaps[0].contains("v-low"));
    }

    #[test]
    fn values_nested_under_provider_id_are_found() {
        let s1 = stage(1, json!({"scoping-provider": {"values": ["asset-1"]}}));
        let s2 = stage(2, json!({}));
        let report = CoherenceValidator::new().validate(&[&s1, &s2]);
        assert_eq!(report.score, 85.0);
    }

    #[test]
    fn score_floors_at_zero() {
        let validator = CoherenceValidator::with_rules(vec![CoherenceRule {
            source_field: "values".to_string(),
            from_stage: None,
            penalty: 60.0,
        }]);
        let s1 = stage(1, json!({"values": ["a"]}));
        let s2 = stage(2, json!({"values": ["b"]}));
        let s3 = stage(3, json!({}));
        let report = validator.validate(&[&s1, &s2, &s3]);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.gaps.len(), 2);
    }
}
