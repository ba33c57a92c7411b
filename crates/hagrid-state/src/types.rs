//! Persisted HA state.

use std::fmt;

use hagrid_core::{ResourceRef, ResourceType};
use serde::{Deserialize, Serialize};

/// HA state of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaState {
    /// HA is switched off for this resource.
    Disabled,
    /// Healthy and eligible for placement.
    Available,
    /// Liveness was lost; activity checks are about to start.
    Suspect,
    /// Activity samples are being collected.
    Checking,
    /// Sampled activity stayed under the failure threshold.
    Degraded,
    /// Sustained inactivity; the resource must be isolated.
    Fencing,
    /// Isolated; dependents fenced, maintenance enabled.
    Fenced,
    /// A recovery attempt is in progress.
    Recovering,
    /// Recovery succeeded; about to become Available.
    Recovered,
    /// The activity check itself could not be evaluated.
    Ineligible,
}

impl HaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaState::Disabled => "disabled",
            HaState::Available => "available",
            HaState::Suspect => "suspect",
            HaState::Checking => "checking",
            HaState::Degraded => "degraded",
            HaState::Fencing => "fencing",
            HaState::Fenced => "fenced",
            HaState::Recovering => "recovering",
            HaState::Recovered => "recovered",
            HaState::Ineligible => "ineligible",
        }
    }
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent HA record for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub state: HaState,
    /// Unix timestamp (seconds) of the last state change.
    pub last_transition_at: u64,
    pub ha_enabled: bool,
    /// Unix timestamp (seconds) of registration.
    pub created_at: u64,
}

impl HealthRecord {
    /// A fresh record: Available when HA is on, Disabled otherwise.
    pub fn new(resource: &ResourceRef, ha_enabled: bool, now: u64) -> Self {
        Self {
            resource_id: resource.id.clone(),
            resource_type: resource.resource_type,
            state: if ha_enabled {
                HaState::Available
            } else {
                HaState::Disabled
            },
            last_transition_at: now,
            ha_enabled,
            created_at: now,
        }
    }

    pub fn resource(&self) -> ResourceRef {
        ResourceRef::new(self.resource_id.clone(), self.resource_type)
    }

    /// Build the composite key for the health records table.
    pub fn table_key(&self) -> String {
        self.resource().key()
    }
}
