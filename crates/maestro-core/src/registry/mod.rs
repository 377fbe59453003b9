//! Capability-keyed provider discovery.
//!
//! Providers are registered and unregistered explicitly; health is probed
//! live on every discovery call, never cached. Unhealthy providers stay
//! registered but are excluded from discovery results.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::Capability;
use crate::provider::Provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_providers: usize,
    /// Providers currently passing their health check.
    pub active_providers: usize,
    /// Distinct capability ids across all registered providers.
    pub total_capabilities: usize,
}

pub struct CapabilityRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, provider: Arc<dyn Provider>) {
        let id = provider.id().to_string();
        tracing::info!("[Registry] Registered provider {} ({})", id, provider.name());
        self.providers.write().await.insert(id, provider);
    }

    pub async fn unregister(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        let removed = self.providers.write().await.remove(provider_id);
        if removed.is_some() {
            tracing::info!("[Registry] Unregistered provider {}", provider_id);
        }
        removed
    }

    pub async fn get(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().await.get(provider_id).cloned()
    }

    /// Providers declaring the given capability (scoped to `stage` when
    /// given), filtered to those passing a live health check.
    pub async fn find_capable(
        &self,
        capability_id: &str,
        stage: Option<u32>,
    ) -> Vec<Arc<dyn Provider>> {
        let candidates: Vec<Arc<dyn Provider>> = {
            let providers = self.providers.read().await;
            providers
                .values()
                .filter(|p| {
                    p.capabilities().iter().any(|cap| {
                        cap.id == capability_id
                            && stage.map(|s| cap.stage_affinity.matches(s)).unwrap_or(true)
                    })
                })
                .cloned()
                .collect()
        };
        self.healthy(candidates).await
    }

    /// All healthy providers with any capability applicable to the stage.
    /// The coordinator's candidate source for planning.
    pub async fn discover(&self, stage: u32) -> Vec<Arc<dyn Provider>> {
        let candidates: Vec<Arc<dyn Provider>> = {
            let providers = self.providers.read().await;
            providers
                .values()
                .filter(|p| {
                    p.capabilities()
                        .iter()
                        .any(|cap| cap.stage_affinity.matches(stage))
                })
                .cloned()
                .collect()
        };
        self.healthy(candidates).await
    }

    pub async fn stats(&self) -> RegistryStats {
        let providers: Vec<Arc<dyn Provider>> =
            self.providers.read().await.values().cloned().collect();

        let total_providers = providers.len();
        let total_capabilities = providers
            .iter()
            .flat_map(|p| p.capabilities())
            .map(|c: Capability| c.id)
            .collect::<HashSet<_>>()
            .len();

        let mut active_providers = 0;
        for provider in &providers {
            if provider.health_check().await {
                active_providers += 1;
            }
        }

        RegistryStats {
            total_providers,
            active_providers,
            total_capabilities,
        }
    }

    async fn healthy(&self, candidates: Vec<Arc<dyn Provider>>) -> Vec<Arc<dyn Provider>> {
        let mut healthy = Vec::with_capacity(candidates.len());
        for provider in candidates {
            if provider.health_check().await {
                healthy.push(provider);
            } else {
                tracing::warn!(
                    "[Registry] Provider {} failed health check, excluded",
                    provider.id()
                );
            }
        }
        healthy
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubProvider;
    use crate::models::Criticality;

    #[tokio::test]
    async fn register_and_find_capable() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(
                StubProvider::new("doc-provider").with_capability(
                    Capability::new("documentation", Criticality::Low),
                ),
            ))
            .await;

        let found = registry.find_capable("documentation", None).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "doc-provider");

        assert!(registry.find_capable("risk-analysis", None).await.is_empty());
    }

    #[tokio::test]
    async fn find_capable_respects_stage_affinity() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(StubProvider::new("v2").with_capability(
                Capability::new("validation", Criticality::High).for_stage(2),
            )))
            .await;
        registry
            .register(Arc::new(StubProvider::new("v-any").with_capability(
                Capability::new("validation", Criticality::High),
            )))
            .await;

        let stage2 = registry.find_capable("validation", Some(2)).await;
        assert_eq!(stage2.len(), 2);

        let stage3 = registry.find_capable("validation", Some(3)).await;
        assert_eq!(stage3.len(), 1);
        assert_eq!(stage3[0].id(), "v-any");
    }

    #[tokio::test]
    async fn unhealthy_providers_stay_registered_but_excluded() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(
                StubProvider::new("flaky")
                    .with_capability(Capability::new("validation", Criticality::High))
                    .unhealthy(),
            ))
            .await;

        assert!(registry.find_capable("validation", None).await.is_empty());
        assert!(registry.discover(1).await.is_empty());

        let stats = registry.stats().await;
        assert_eq!(stats.total_providers, 1);
        assert_eq!(stats.active_providers, 0);
        assert_eq!(stats.total_capabilities, 1);
    }

    #[tokio::test]
    async fn unregister_removes_provider() {
        let registry = CapabilityRegistry::new();
        registry
            .register(Arc::new(StubProvider::new("p1").with_capability(
                Capability::new("documentation", Criticality::Low),
            )))
            .await;

        assert!(registry.unregister("p1").await.is_some());
        assert!(registry.unregister("p1").await.is_none());
        assert_eq!(registry.stats().await.total_providers, 0);
    }
}
