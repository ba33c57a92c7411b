//! Per-resource probe and recovery bookkeeping.

use serde::Serialize;
use tracing::debug;

/// What the activity samples collected so far say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityVerdict {
    /// Fewer than `min_samples` samples; keep checking.
    NeedMoreSamples,
    /// Failure ratio strictly above the threshold; fence.
    OverThreshold,
    /// Enough samples, ratio at or under the threshold.
    UnderThreshold,
}

/// Activity and recovery counters for one resource.
///
/// Lives in process memory next to the persisted record; it is rebuilt
/// empty after a restart or when HA is re-enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceCounter {
    activity_failures: u32,
    activity_samples: u32,
    recovery_attempts: u32,
    degraded: bool,
    suspect_since: Option<u64>,
}

/// Read-only copy of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub activity_failures: u32,
    pub activity_samples: u32,
    pub recovery_attempts: u32,
    pub degraded: bool,
    pub suspect_since: Option<u64>,
}

impl ResourceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one definite activity sample.
    pub fn record_activity(&mut self, active: bool) {
        self.activity_samples += 1;
        if !active {
            self.activity_failures += 1;
        }
        debug_assert!(self.activity_failures <= self.activity_samples);
    }

    pub fn activity_samples(&self) -> u32 {
        self.activity_samples
    }

    pub fn activity_failures(&self) -> u32 {
        self.activity_failures
    }

    /// Failures over samples; 0.0 before the first sample.
    pub fn failure_ratio(&self) -> f64 {
        if self.activity_samples == 0 {
            return 0.0;
        }
        self.activity_failures as f64 / self.activity_samples as f64
    }

    /// Turn the current samples into a verdict.
    pub fn verdict(&self, min_samples: u32, failure_ratio_threshold: f64) -> ActivityVerdict {
        if self.activity_samples < min_samples.max(1) {
            return ActivityVerdict::NeedMoreSamples;
        }
        if self.failure_ratio() > failure_ratio_threshold {
            ActivityVerdict::OverThreshold
        } else {
            ActivityVerdict::UnderThreshold
        }
    }

    pub fn reset_activity(&mut self) {
        if self.activity_samples > 0 {
            debug!(
                samples = self.activity_samples,
                failures = self.activity_failures,
                "activity counters reset"
            );
        }
        self.activity_failures = 0;
        self.activity_samples = 0;
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts
    }

    pub fn increment_recovery(&mut self) -> u32 {
        self.recovery_attempts += 1;
        self.recovery_attempts
    }

    /// Only called when the resource becomes Available again.
    pub fn reset_recovery(&mut self) {
        self.recovery_attempts = 0;
    }

    /// Whether another recovery may be attempted under `max` (0 = unlimited).
    pub fn can_attempt_recovery(&self, max: u32) -> bool {
        max == 0 || self.recovery_attempts < max
    }

    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    pub fn clear_degraded(&mut self) {
        self.degraded = false;
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn mark_suspect(&mut self, since: u64) {
        self.suspect_since = Some(since);
    }

    pub fn clear_suspect(&mut self) {
        self.suspect_since = None;
    }

    pub fn suspect_since(&self) -> Option<u64> {
        self.suspect_since
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            activity_failures: self.activity_failures,
            activity_samples: self.activity_samples,
            recovery_attempts: self.recovery_attempts,
            degraded: self.degraded,
            suspect_since: self.suspect_since,
        }
    }
}
