//! hagrid.toml configuration parser.
//!
//! The file carries orchestrator settings, HA defaults, per-resource-type
//! provider sections (overrides plus hook commands), and the resource
//! inventory. HA settings resolve in layers: built-in defaults, then
//! `[defaults]`, then `[providers.<type>]`, then whatever the provider
//! itself reports for a given resource.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ResourceType;

/// Errors raised while validating or resolving configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid duration for {key}: {value}")]
    Duration { key: ConfigKey, value: String },

    #[error("invalid value for {key}: {value}")]
    Value { key: ConfigKey, value: String },

    #[error("{key} out of range: {reason}")]
    Range { key: ConfigKey, reason: String },

    #[error("invalid orchestrator interval: {0}")]
    Interval(String),

    #[error("unknown resource type in config: {0}")]
    ResourceType(String),

    #[error("invalid hook timeout: {0}")]
    HookTimeout(String),
}

/// Top-level hagrid.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HagridConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub defaults: HaSection,
    /// Provider sections keyed by resource type name (`host`, `control_vm`, ...).
    #[serde(default)]
    pub providers: HashMap<String, ProviderSection>,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Cycle interval (e.g., "30s").
    pub interval: Option<String>,
    /// Worker pool size shared by all provider operations.
    pub workers: Option<usize>,
    pub data_dir: Option<PathBuf>,
}

/// HA tunables. Every field is optional so sections can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaSection {
    pub probe_timeout: Option<String>,
    pub fence_timeout: Option<String>,
    pub recovery_timeout: Option<String>,
    pub health_check_timeout: Option<String>,
    pub min_samples: Option<u32>,
    pub failure_ratio_threshold: Option<f64>,
    pub max_recovery_attempts: Option<u32>,
    pub degraded_policy: Option<DegradedPolicy>,
    pub degraded_cooldown: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(flatten)]
    pub settings: HaSection,
    #[serde(default)]
    pub hooks: HookSection,
}

/// Shell hooks backing the generic hook provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookSection {
    pub activity: Option<String>,
    /// HTTP path probed on the resource address instead of an activity command.
    pub activity_http: Option<String>,
    pub health: Option<String>,
    pub fence: Option<String>,
    pub recover: Option<String>,
    pub fence_dependents: Option<String>,
    pub release_dependents: Option<String>,
    pub maintenance: Option<String>,
    pub alert: Option<String>,
    /// Hard limit after which a running hook is killed (e.g. "5m").
    pub timeout: Option<String>,
}

impl HookSection {
    pub fn kill_after(&self) -> Result<Option<Duration>, ConfigError> {
        match &self.timeout {
            Some(s) => parse_duration(s)
                .map(Some)
                .ok_or_else(|| ConfigError::HookTimeout(s.clone())),
            None => Ok(None),
        }
    }
}

/// A resource registered for HA at daemon start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub address: Option<String>,
    #[serde(default = "default_true")]
    pub ha_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// What happens to a resource once the probe ratio stays under threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPolicy {
    /// Stay Degraded, watched by health checks, until the cooldown elapses.
    #[default]
    CoolDown,
    /// Go straight back to Suspect and sample again.
    Recheck,
}

/// Keys a provider may override per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ProbeTimeout,
    FenceTimeout,
    RecoveryTimeout,
    HealthCheckTimeout,
    MinSamples,
    FailureRatioThreshold,
    MaxRecoveryAttempts,
    DegradedPolicy,
    DegradedCooldown,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::ProbeTimeout,
        ConfigKey::FenceTimeout,
        ConfigKey::RecoveryTimeout,
        ConfigKey::HealthCheckTimeout,
        ConfigKey::MinSamples,
        ConfigKey::FailureRatioThreshold,
        ConfigKey::MaxRecoveryAttempts,
        ConfigKey::DegradedPolicy,
        ConfigKey::DegradedCooldown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::ProbeTimeout => "probe_timeout",
            ConfigKey::FenceTimeout => "fence_timeout",
            ConfigKey::RecoveryTimeout => "recovery_timeout",
            ConfigKey::HealthCheckTimeout => "health_check_timeout",
            ConfigKey::MinSamples => "min_samples",
            ConfigKey::FailureRatioThreshold => "failure_ratio_threshold",
            ConfigKey::MaxRecoveryAttempts => "max_recovery_attempts",
            ConfigKey::DegradedPolicy => "degraded_policy",
            ConfigKey::DegradedCooldown => "degraded_cooldown",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved HA settings for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub probe_timeout: Duration,
    pub fence_timeout: Duration,
    pub recovery_timeout: Duration,
    pub health_check_timeout: Duration,
    /// Samples required before the failure ratio is evaluated.
    pub min_samples: u32,
    /// Failure fraction strictly above which the resource is fenced.
    pub failure_ratio_threshold: f64,
    /// 0 means unlimited.
    pub max_recovery_attempts: u32,
    pub degraded_policy: DegradedPolicy,
    pub degraded_cooldown: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(60),
            fence_timeout: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(10),
            min_samples: 10,
            failure_ratio_threshold: 0.7,
            max_recovery_attempts: 0,
            degraded_policy: DegradedPolicy::CoolDown,
            degraded_cooldown: Duration::from_secs(300),
        }
    }
}

impl ProviderConfig {
    /// Layer a TOML section over these settings.
    pub fn apply(&mut self, section: &HaSection) -> Result<(), ConfigError> {
        let durations = [
            (ConfigKey::ProbeTimeout, &section.probe_timeout),
            (ConfigKey::FenceTimeout, &section.fence_timeout),
            (ConfigKey::RecoveryTimeout, &section.recovery_timeout),
            (ConfigKey::HealthCheckTimeout, &section.health_check_timeout),
            (ConfigKey::DegradedCooldown, &section.degraded_cooldown),
        ];
        for (key, value) in durations {
            if let Some(value) = value {
                self.set(key, value)?;
            }
        }
        if let Some(n) = section.min_samples {
            self.set(ConfigKey::MinSamples, &n.to_string())?;
        }
        if let Some(ratio) = section.failure_ratio_threshold {
            self.set(ConfigKey::FailureRatioThreshold, &ratio.to_string())?;
        }
        if let Some(n) = section.max_recovery_attempts {
            self.max_recovery_attempts = n;
        }
        if let Some(policy) = section.degraded_policy {
            self.degraded_policy = policy;
        }
        Ok(())
    }

    /// Set a single key from its string form, validating the value.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::Value {
            key,
            value: value.to_string(),
        };
        let duration = || {
            parse_duration(value).ok_or_else(|| ConfigError::Duration {
                key,
                value: value.to_string(),
            })
        };

        match key {
            ConfigKey::ProbeTimeout => self.probe_timeout = duration()?,
            ConfigKey::FenceTimeout => self.fence_timeout = duration()?,
            ConfigKey::RecoveryTimeout => self.recovery_timeout = duration()?,
            ConfigKey::HealthCheckTimeout => self.health_check_timeout = duration()?,
            ConfigKey::DegradedCooldown => self.degraded_cooldown = duration()?,
            ConfigKey::MinSamples => {
                let n: u32 = value.trim().parse().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(ConfigError::Range {
                        key,
                        reason: "at least one sample is required".to_string(),
                    });
                }
                self.min_samples = n;
            }
            ConfigKey::FailureRatioThreshold => {
                let ratio: f64 = value.trim().parse().map_err(|_| invalid())?;
                if !(0.0..=1.0).contains(&ratio) {
                    return Err(ConfigError::Range {
                        key,
                        reason: format!("{ratio} is not within 0.0..=1.0"),
                    });
                }
                self.failure_ratio_threshold = ratio;
            }
            ConfigKey::MaxRecoveryAttempts => {
                self.max_recovery_attempts = value.trim().parse().map_err(|_| invalid())?;
            }
            ConfigKey::DegradedPolicy => {
                self.degraded_policy = match value.trim() {
                    "cool_down" => DegradedPolicy::CoolDown,
                    "recheck" => DegradedPolicy::Recheck,
                    _ => return Err(invalid()),
                };
            }
        }
        Ok(())
    }
}

impl HagridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HagridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Cycle interval, defaulting to 30s.
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        match &self.orchestrator.interval {
            Some(s) => parse_duration(s).ok_or_else(|| ConfigError::Interval(s.clone())),
            None => Ok(Duration::from_secs(30)),
        }
    }

    pub fn workers(&self) -> usize {
        self.orchestrator.workers.unwrap_or(16).max(1)
    }

    /// Built-in defaults with `[defaults]` applied.
    pub fn base_provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        let mut config = ProviderConfig::default();
        config.apply(&self.defaults)?;
        Ok(config)
    }

    /// Resolved settings for one resource type, before provider overrides.
    pub fn provider_config(&self, resource_type: ResourceType) -> Result<ProviderConfig, ConfigError> {
        let mut config = self.base_provider_config()?;
        if let Some(section) = self.providers.get(resource_type.as_str()) {
            config.apply(&section.settings)?;
        }
        Ok(config)
    }

    /// Provider sections with their keys parsed into resource types.
    pub fn provider_sections(&self) -> Result<Vec<(ResourceType, &ProviderSection)>, ConfigError> {
        self.providers
            .iter()
            .map(|(name, section)| {
                name.parse::<ResourceType>()
                    .map(|t| (t, section))
                    .map_err(|_| ConfigError::ResourceType(name.clone()))
            })
            .collect()
    }
}

impl ResourceEntry {
    pub fn resource_type(&self) -> Result<ResourceType, ConfigError> {
        self.resource_type
            .parse()
            .map_err(|_| ConfigError::ResourceType(self.resource_type.clone()))
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
