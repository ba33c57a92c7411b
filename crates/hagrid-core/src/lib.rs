//! hagrid-core — shared types and configuration for the hagrid HA orchestrator.

pub mod config;
pub mod types;

pub use config::{
    ConfigError, ConfigKey, DegradedPolicy, HaSection, HagridConfig, HookSection,
    OrchestratorSection, ProviderConfig, ProviderSection, ResourceEntry, parse_duration,
};
pub use types::*;
