//! The capability-provider contract consumed by the orchestration core.
//!
//! Providers are registered with the [`CapabilityRegistry`] and invoked by
//! the execution engine through their circuit breakers. Health is re-checked
//! live on every discovery call, never cached.
//!
//! [`CapabilityRegistry`]: crate::registry::CapabilityRegistry

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::models::{Capability, Task, TaskResult};

#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Capabilities this provider claims. Immutable once declared.
    fn capabilities(&self) -> Vec<Capability>;

    /// Live health probe. Unhealthy providers stay registered but are
    /// excluded from discovery.
    async fn health_check(&self) -> bool;

    /// Execute one task. An `Err` or a `TaskResult` with `success == false`
    /// both count as a circuit-breaker failure.
    async fn execute(&self, task: Task) -> Result<TaskResult, OrchestratorError>;
}
