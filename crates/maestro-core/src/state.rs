//! Shared service wiring for embedding applications.

use std::sync::Arc;

use crate::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::coordinator::{CoordinatorConfig, StageCoordinator};
use crate::db::Database;
use crate::engine::{ExecutionEngine, MergeRuleSet};
use crate::gateway::{DegradationGateway, GatewayConfig, LegacyService};
use crate::models::MessageLog;
use crate::registry::CapabilityRegistry;
use crate::store::StageStore;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub breaker: CircuitBreakerConfig,
    pub coordinator: CoordinatorConfig,
}

/// Shared state accessible by all embedding surfaces. Every collaborator is
/// built once here and injected; none of them is a global.
pub struct OrchestratorInner {
    pub db: Database,
    pub registry: Arc<CapabilityRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub message_log: Arc<MessageLog>,
    pub merge_rules: Arc<MergeRuleSet>,
    pub engine: Arc<ExecutionEngine>,
    pub stage_store: StageStore,
    pub coordinator: StageCoordinator,
}

pub type Orchestrator = Arc<OrchestratorInner>;

impl OrchestratorInner {
    pub fn new(db: Database, config: OrchestratorConfig) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker));
        let message_log = Arc::new(MessageLog::new());
        let merge_rules = Arc::new(MergeRuleSet::with_defaults());
        let engine = Arc::new(ExecutionEngine::new(
            registry.clone(),
            breakers.clone(),
            merge_rules.clone(),
            message_log.clone(),
        ));
        let stage_store = StageStore::new(db.clone());
        let coordinator = StageCoordinator::new(
            registry.clone(),
            engine.clone(),
            breakers.clone(),
            config.coordinator,
        )
        .with_store(stage_store.clone());

        Self {
            db,
            registry,
            breakers,
            message_log,
            merge_rules,
            engine,
            stage_store,
            coordinator,
        }
    }

    /// A gateway sharing this state's registry and breakers.
    pub fn gateway(
        &self,
        legacy: Arc<dyn LegacyService>,
        config: GatewayConfig,
    ) -> DegradationGateway {
        DegradationGateway::new(self.registry.clone(), self.breakers.clone(), legacy, config)
    }
}
