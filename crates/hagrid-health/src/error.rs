//! Orchestrator error types.

use hagrid_core::{ConfigError, ResourceType};
use thiserror::Error;

/// Errors surfaced by orchestrator operations.
///
/// Provider faults never appear here: they are folded into task outcomes.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("resource not registered: {0}")]
    UnknownResource(String),

    #[error("no provider registered for resource type {0}")]
    NoProvider(ResourceType),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    State(#[from] hagrid_state::StateError),
}

pub type HealthResult<T> = Result<T, HealthError>;
