//! Resource capability providers.
//!
//! A provider is the per-resource-type driver the orchestrator drives: it
//! answers activity and health probes, fences and recovers resources, runs
//! the cascade and maintenance hooks, and delivers alerts. Vendor drivers
//! live outside this crate; the in-tree [`crate::hooks::HookProvider`]
//! maps each capability onto a shell command.
//!
//! Every provider operation may be abandoned by its caller after a timeout
//! while still running, so fence/recover must be idempotent.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hagrid_core::{ConfigKey, ProviderConfig, ResourceRef, ResourceType};
use thiserror::Error;
use tracing::warn;

/// Faults a provider operation may raise.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderFault {
    /// The check mechanism itself is broken; the answer is unknown.
    #[error("indeterminate check: {0}")]
    Indeterminate(String),

    /// A fence/recover (or hook) attempt failed.
    #[error("action failed: {0}")]
    Action(String),

    /// The operation panicked or its worker was torn down.
    #[error("operation aborted: {0}")]
    Aborted(String),
}

/// Which HA phase an alert belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertPhase {
    Fencing,
    Recovering,
}

impl fmt::Display for AlertPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertPhase::Fencing => f.write_str("Fencing"),
            AlertPhase::Recovering => f.write_str("Recovering"),
        }
    }
}

/// Boxed future returned by every provider operation.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderFault>> + Send + 'a>>;

/// Capabilities the orchestrator needs from a resource-type driver.
pub trait ResourceProvider: Send + Sync {
    /// The resource type this provider serves.
    fn resource_type(&self) -> ResourceType;

    /// Cheap periodic health check. Providers without one report healthy,
    /// leaving liveness loss to external signals.
    fn is_healthy<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(async { Ok(true) })
    }

    /// Whether the resource showed activity since `since` (unix seconds).
    fn has_activity<'a>(&'a self, resource: &'a ResourceRef, since: u64)
    -> ProviderFuture<'a, bool>;

    fn fence<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, bool>;

    fn recover<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, bool>;

    /// Best-effort: fence everything that depends on the resource.
    fn fence_dependents<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, ()>;

    /// Best-effort: undo [`ResourceProvider::fence_dependents`].
    fn release_dependents<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, ()>;

    /// Stop placing new work on the resource.
    fn enable_maintenance<'a>(&'a self, resource: &'a ResourceRef) -> ProviderFuture<'a, ()>;

    fn send_alert<'a>(
        &'a self,
        resource: &'a ResourceRef,
        phase: AlertPhase,
    ) -> ProviderFuture<'a, ()>;

    /// Per-resource override for an HA setting, in its string form.
    fn config_value(&self, _key: ConfigKey, _resource: &ResourceRef) -> Option<String> {
        None
    }
}

/// Providers indexed by the resource type they serve.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ResourceType, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one for the same type.
    pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) {
        self.providers.insert(provider.resource_type(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<Arc<dyn ResourceProvider>> {
        self.providers.get(&resource_type).cloned()
    }

    pub fn resource_types(&self) -> Vec<ResourceType> {
        self.providers.keys().copied().collect()
    }
}

/// Apply a provider's per-resource overrides on top of `base`.
///
/// A bad override is logged and skipped; it never poisons the rest.
pub fn resolve_config(
    base: &ProviderConfig,
    provider: &dyn ResourceProvider,
    resource: &ResourceRef,
) -> ProviderConfig {
    let mut config = base.clone();
    for key in ConfigKey::ALL {
        if let Some(value) = provider.config_value(key, resource)
            && let Err(e) = config.set(key, &value)
        {
            warn!(resource = %resource, %key, error = %e, "ignoring provider config override");
        }
    }
    config
}
