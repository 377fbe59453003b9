//! Core error type for the Maestro orchestration crate.
//!
//! Provider-level failures are recovered locally by the execution engine and
//! never abort a stage; only `Planning` surfaces as a failed `StageResult`
//! before any provider runs.

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A plan names a provider that the registry no longer holds.
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// A provider's primary path failed (thrown error, unsuccessful result,
    /// or timeout). Triggers the provider's fallback.
    #[error("Provider '{provider}' failed: {message}")]
    ProviderExecution { provider: String, message: String },

    /// Both primary and fallback failed for one provider. Fatal only for
    /// that provider's contribution.
    #[error("Primary and fallback both failed for '{provider}': {message}")]
    FallbackExhausted { provider: String, message: String },

    /// Invariant violation or malformed configuration detected while
    /// planning. The only error that aborts a stage.
    #[error("Planning error: {0}")]
    Planning(String),

    /// Persistence layer failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl OrchestratorError {
    /// Provider-level failures are recoverable; planning failures are not.
    pub fn aborts_stage(&self) -> bool {
        matches!(self, OrchestratorError::Planning(_))
    }
}
