//! HA tasks: one provider operation plus the decision taken on its outcome.
//!
//! A task never touches the persisted record. It updates the resource
//! counter, runs side effects (cascade, maintenance, alerts), and hands an
//! optional [`HaEvent`] back to the orchestrator, which applies it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hagrid_core::{ProviderConfig, ResourceRef};
use hagrid_state::{HaState, HealthRecord};
use tracing::{debug, info, warn};

use crate::counter::{ActivityVerdict, ResourceCounter};
use crate::provider::{AlertPhase, ResourceProvider};
use crate::runner::{TaskOutcome, TaskRunner};
use crate::transition::HaEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    HealthCheck,
    ActivityCheck,
    Isolation,
    Recovery,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::HealthCheck => f.write_str("health-check"),
            TaskKind::ActivityCheck => f.write_str("activity-check"),
            TaskKind::Isolation => f.write_str("isolation"),
            TaskKind::Recovery => f.write_str("recovery"),
        }
    }
}

/// A scheduled unit of HA work for one resource.
pub struct Task {
    kind: TaskKind,
    resource: ResourceRef,
    provider: Arc<dyn ResourceProvider>,
    record: HealthRecord,
    timeout: Duration,
}

impl Task {
    /// Bind a task to a record snapshot; the timeout comes from `config`.
    pub fn new(
        kind: TaskKind,
        record: HealthRecord,
        provider: Arc<dyn ResourceProvider>,
        config: &ProviderConfig,
    ) -> Self {
        let timeout = match kind {
            TaskKind::HealthCheck => config.health_check_timeout,
            TaskKind::ActivityCheck => config.probe_timeout,
            TaskKind::Isolation => config.fence_timeout,
            TaskKind::Recovery => config.recovery_timeout,
        };
        Self {
            kind,
            resource: record.resource(),
            provider,
            record,
            timeout,
        }
    }

    /// Run the task and return the event the orchestrator should apply.
    pub async fn execute(
        &self,
        runner: &TaskRunner,
        counter: &mut ResourceCounter,
        config: &ProviderConfig,
    ) -> Option<HaEvent> {
        debug!(resource = %self.resource, task = %self.kind, state = %self.record.state, "task starting");
        match self.kind {
            TaskKind::HealthCheck => self.health_check(runner).await,
            TaskKind::ActivityCheck => self.activity_check(runner, counter, config).await,
            TaskKind::Isolation => self.isolate(runner).await,
            TaskKind::Recovery => self.recover(runner, counter).await,
        }
    }

    async fn health_check(&self, runner: &TaskRunner) -> Option<HaEvent> {
        let (provider, resource) = (self.provider.clone(), self.resource.clone());
        let outcome = runner
            .run(
                async move { provider.is_healthy(&resource).await },
                Some(self.timeout),
            )
            .await;

        if outcome.result {
            return None;
        }
        if !outcome.started {
            self.log_not_started(runner);
            return None;
        }
        match &outcome.fault {
            Some(fault) => warn!(resource = %self.resource, %fault, "health check faulted"),
            None => info!(resource = %self.resource, "health check failed"),
        }
        Some(HaEvent::LivenessLost)
    }

    async fn activity_check(
        &self,
        runner: &TaskRunner,
        counter: &mut ResourceCounter,
        config: &ProviderConfig,
    ) -> Option<HaEvent> {
        let since = counter
            .suspect_since()
            .unwrap_or(self.record.last_transition_at);
        let (provider, resource) = (self.provider.clone(), self.resource.clone());
        let outcome = runner
            .run(
                async move { provider.has_activity(&resource, since).await },
                Some(self.timeout),
            )
            .await;

        // Neither a check that never ran nor a broken check is a failure sample.
        if !outcome.started {
            self.log_not_started(runner);
            return None;
        }
        if let Some(fault) = &outcome.fault {
            warn!(resource = %self.resource, %fault, "activity check inconclusive, resource ineligible");
            return Some(HaEvent::Ineligible);
        }

        counter.record_activity(outcome.result);
        let verdict = counter.verdict(config.min_samples, config.failure_ratio_threshold);
        debug!(
            resource = %self.resource,
            active = outcome.result,
            samples = counter.activity_samples(),
            failures = counter.activity_failures(),
            ?verdict,
            "activity sample recorded"
        );

        match verdict {
            ActivityVerdict::NeedMoreSamples => Some(HaEvent::PerformActivityCheck),
            ActivityVerdict::OverThreshold => {
                info!(
                    resource = %self.resource,
                    ratio = counter.failure_ratio(),
                    threshold = config.failure_ratio_threshold,
                    "activity failure ratio over threshold"
                );
                Some(HaEvent::ActivityOverThreshold)
            }
            ActivityVerdict::UnderThreshold => {
                counter.mark_degraded();
                Some(HaEvent::ActivityUnderThreshold)
            }
        }
    }

    async fn isolate(&self, runner: &TaskRunner) -> Option<HaEvent> {
        if self.record.state == HaState::Fenced {
            debug!(resource = %self.resource, "already fenced, isolation skipped");
            return None;
        }

        let (provider, resource) = (self.provider.clone(), self.resource.clone());
        let outcome = runner
            .run(async move { provider.fence(&resource).await }, Some(self.timeout))
            .await;
        if !outcome.started {
            self.log_not_started(runner);
            return None;
        }

        if outcome.result {
            self.best_effort(runner, "fence dependents", |p, r| async move {
                p.fence_dependents(&r).await
            })
            .await;
            self.best_effort(runner, "enable maintenance", |p, r| async move {
                p.enable_maintenance(&r).await
            })
            .await;
        } else {
            self.log_action_failure(&outcome);
        }
        self.alert(runner, AlertPhase::Fencing).await;

        outcome.result.then_some(HaEvent::Fenced)
    }

    async fn recover(&self, runner: &TaskRunner, counter: &mut ResourceCounter) -> Option<HaEvent> {
        let (provider, resource) = (self.provider.clone(), self.resource.clone());
        let outcome = runner
            .run(async move { provider.recover(&resource).await }, Some(self.timeout))
            .await;
        if !outcome.started {
            self.log_not_started(runner);
            return None;
        }

        let attempt = counter.increment_recovery();
        counter.reset_activity();

        if outcome.result {
            info!(resource = %self.resource, attempt, "recovery succeeded");
            self.best_effort(runner, "release dependents", |p, r| async move {
                p.release_dependents(&r).await
            })
            .await;
        } else {
            self.log_action_failure(&outcome);
        }
        self.alert(runner, AlertPhase::Recovering).await;

        Some(if outcome.result {
            HaEvent::Recovered
        } else {
            HaEvent::RecoveryFailed
        })
    }

    async fn alert(&self, runner: &TaskRunner, phase: AlertPhase) {
        self.best_effort(runner, "send alert", move |p, r| async move {
            p.send_alert(&r, phase).await
        })
        .await;
    }

    /// Run a hook whose failure is logged and otherwise ignored.
    async fn best_effort<F, Fut>(&self, runner: &TaskRunner, what: &str, hook: F)
    where
        F: FnOnce(Arc<dyn ResourceProvider>, ResourceRef) -> Fut,
        Fut: std::future::Future<Output = Result<(), crate::provider::ProviderFault>> + Send + 'static,
    {
        let fut = hook(self.provider.clone(), self.resource.clone());
        let outcome = runner.run_unit(fut, Some(self.timeout)).await;
        if !outcome.result {
            match outcome.fault {
                Some(fault) => warn!(resource = %self.resource, hook = what, %fault, "hook failed"),
                None => warn!(resource = %self.resource, hook = what, "hook timed out"),
            }
        }
    }

    fn log_not_started(&self, runner: &TaskRunner) {
        warn!(
            resource = %self.resource,
            task = %self.kind,
            workers = runner.workers(),
            "no worker free within timeout, retrying next cycle"
        );
    }

    fn log_action_failure(&self, outcome: &TaskOutcome) {
        match &outcome.fault {
            Some(fault) => warn!(resource = %self.resource, task = %self.kind, %fault, "action faulted"),
            None => warn!(resource = %self.resource, task = %self.kind, "action failed or timed out"),
        }
    }
}
