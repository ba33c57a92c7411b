//! HA state transition table.

use std::fmt;

use hagrid_state::HaState;

/// Events that drive the HA state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaEvent {
    Enable,
    Disable,
    /// External liveness-loss signal or a failed health check.
    LivenessLost,
    PerformActivityCheck,
    /// The activity check could not be evaluated.
    Ineligible,
    ActivityOverThreshold,
    ActivityUnderThreshold,
    DegradedCooled,
    Recheck,
    Fenced,
    StartRecovery,
    RecoveryFailed,
    Recovered,
    Activated,
}

impl fmt::Display for HaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Next state for `event` in `from`, or `None` if the event is not
/// accepted there.
pub fn next_state(from: HaState, event: HaEvent) -> Option<HaState> {
    use HaEvent as E;
    use HaState as S;

    let to = match (from, event) {
        (S::Disabled, E::Disable) => return None,
        (_, E::Disable) => S::Disabled,
        (S::Disabled | S::Ineligible, E::Enable) => S::Available,
        (S::Available | S::Degraded, E::LivenessLost) => S::Suspect,
        (S::Suspect | S::Checking, E::PerformActivityCheck) => S::Checking,
        (S::Suspect | S::Checking, E::Ineligible) => S::Ineligible,
        (S::Checking, E::ActivityOverThreshold) => S::Fencing,
        (S::Checking, E::ActivityUnderThreshold) => S::Degraded,
        (S::Degraded, E::DegradedCooled) => S::Available,
        (S::Degraded, E::Recheck) => S::Suspect,
        (S::Fencing, E::Fenced) => S::Fenced,
        (S::Fenced, E::StartRecovery) => S::Recovering,
        (S::Recovering, E::RecoveryFailed) => S::Fenced,
        (S::Recovering, E::Recovered) => S::Recovered,
        (S::Recovered, E::Activated) => S::Available,
        _ => return None,
    };
    Some(to)
}
