//! Maestro Core — Transport-agnostic orchestration of capability providers.
//!
//! This crate contains the domain logic for driving independent providers
//! through a multi-stage pipeline: discovery, planning, circuit-breaker
//! protected execution, cross-stage coherence scoring and persistence. It has
//! **no transport dependency**, making it suitable for use in:
//!
//! - HTTP servers
//! - Desktop apps (direct IPC)
//! - CLI tools
//!
//! Wiring starts at [`state::OrchestratorInner`]; providers implement the
//! [`provider::Provider`] trait and register with the
//! [`registry::CapabilityRegistry`].

pub mod breaker;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod models;
pub mod planner;
pub mod provider;
pub mod registry;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// Convenience re-exports
pub use db::Database;
pub use error::OrchestratorError;
pub use provider::Provider;
pub use state::{Orchestrator, OrchestratorConfig, OrchestratorInner};
