//! Shared types used across hagrid crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of managed resource. Each kind is served by one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A hypervisor host.
    Host,
    /// A control-plane VM (router, console proxy, storage VM).
    ControlVm,
    /// A primary storage endpoint.
    StorageEndpoint,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Host => "host",
            ResourceType::ControlVm => "control_vm",
            ResourceType::StorageEndpoint => "storage_endpoint",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(ResourceType::Host),
            "control_vm" => Ok(ResourceType::ControlVm),
            "storage_endpoint" => Ok(ResourceType::StorageEndpoint),
            other => Err(format!("unknown resource type: {other}")),
        }
    }
}

/// Identity of an HA-managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: String,
    pub resource_type: ResourceType,
}

impl ResourceRef {
    pub fn new(id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: id.into(),
            resource_type,
        }
    }

    /// Composite key `{type}/{id}` used by the state store and the orchestrator.
    pub fn key(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
