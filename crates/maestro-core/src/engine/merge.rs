//! Per-capability merge rules for shared pipeline state.
//!
//! The dispatch table is built at wiring time and keyed by capability id;
//! unrecognized ids merge generically under the provider's own id. Merges
//! are last-writer-wins per key.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub enum MergeStrategy {
    /// Store under `merged[field]["stage{N}"]`.
    Slot { field: String },
    /// Store under `merged[provider_id]`.
    Generic,
}

pub struct MergeRuleSet {
    rules: RwLock<HashMap<String, MergeStrategy>>,
}

impl MergeRuleSet {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Rules mirroring the built-in capability kinds: validation and risk
    /// analysis results are slotted per stage.
    pub fn with_defaults() -> Self {
        let set = Self::new();
        set.register("validation", MergeStrategy::Slot {
            field: "validationResults".to_string(),
        });
        set.register("risk-analysis", MergeStrategy::Slot {
            field: "riskAnalysis".to_string(),
        });
        set
    }

    pub fn register(&self, capability_id: impl Into<String>, strategy: MergeStrategy) {
        if let Ok(mut rules) = self.rules.write() {
            rules.insert(capability_id.into(), strategy);
        }
    }

    /// Merge one provider's output into the shared state.
    pub fn apply(
        &self,
        merged: &mut Value,
        provider_id: &str,
        role: &str,
        stage_id: u32,
        data: Value,
    ) {
        if !merged.is_object() {
            *merged = Value::Object(Map::new());
        }
        let strategy = self
            .rules
            .read()
            .ok()
            .and_then(|r| r.get(role).cloned())
            .unwrap_or(MergeStrategy::Generic);

        let root = merged.as_object_mut().expect("merged state is an object");
        match strategy {
            MergeStrategy::Slot { field } => {
                let slot = root
                    .entry(field)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                slot.as_object_mut()
                    .expect("slot is an object")
                    .insert(format!("stage{}", stage_id), data);
            }
            MergeStrategy::Generic => {
                root.insert(provider_id.to_string(), data);
            }
        }
    }
}

impl Default for MergeRuleSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}
