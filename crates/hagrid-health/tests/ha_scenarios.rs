//! End-to-end HA cycle tests.
//!
//! Drives the orchestrator against a scripted in-memory provider and an
//! in-memory state store: detection, fencing, recovery, degraded handling,
//! and the per-resource serialization guarantees.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hagrid_core::{ConfigKey, DegradedPolicy, ProviderConfig, ResourceRef, ResourceType};
use hagrid_health::*;
use hagrid_state::{HaState, StateStore};

// ── Scripted provider ──────────────────────────────────────────────

#[derive(Default)]
struct Calls {
    health: AtomicUsize,
    activity: AtomicUsize,
    fence: AtomicUsize,
    recover: AtomicUsize,
    fence_dependents: AtomicUsize,
    release_dependents: AtomicUsize,
    maintenance: AtomicUsize,
}

/// Provider whose answers are popped from per-operation scripts.
///
/// An exhausted script falls back to: healthy, inactive, fence ok,
/// recover ok.
#[derive(Default)]
struct MockProvider {
    healthy: Mutex<VecDeque<bool>>,
    activity: Mutex<VecDeque<Result<bool, ProviderFault>>>,
    fence: Mutex<VecDeque<Result<bool, ProviderFault>>>,
    recover: Mutex<VecDeque<Result<bool, ProviderFault>>>,
    activity_delay: Option<Duration>,
    activity_panics: bool,
    overrides: HashMap<ConfigKey, String>,
    alerts: Mutex<Vec<AlertPhase>>,
    calls: Calls,
}

impl MockProvider {
    fn new() -> Self {
        Self::default()
    }

    fn healthy(self, script: impl IntoIterator<Item = bool>) -> Self {
        self.healthy.lock().unwrap().extend(script);
        self
    }

    fn activity(self, script: impl IntoIterator<Item = Result<bool, ProviderFault>>) -> Self {
        self.activity.lock().unwrap().extend(script);
        self
    }

    fn fence_results(self, script: impl IntoIterator<Item = Result<bool, ProviderFault>>) -> Self {
        self.fence.lock().unwrap().extend(script);
        self
    }

    fn recover_results(self, script: impl IntoIterator<Item = Result<bool, ProviderFault>>) -> Self {
        self.recover.lock().unwrap().extend(script);
        self
    }

    fn activity_delay(mut self, delay: Duration) -> Self {
        self.activity_delay = Some(delay);
        self
    }

    fn activity_panics(mut self) -> Self {
        self.activity_panics = true;
        self
    }

    fn override_value(mut self, key: ConfigKey, value: &str) -> Self {
        self.overrides.insert(key, value.to_string());
        self
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn alerts(&self) -> Vec<AlertPhase> {
        self.alerts.lock().unwrap().clone()
    }

    fn alerts_for(&self, phase: AlertPhase) -> usize {
        self.alerts().into_iter().filter(|p| *p == phase).count()
    }
}

fn pop<T>(script: &Mutex<VecDeque<T>>, fallback: T) -> T {
    script.lock().unwrap().pop_front().unwrap_or(fallback)
}

impl ResourceProvider for MockProvider {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Host
    }

    fn is_healthy<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            self.calls.health.fetch_add(1, Ordering::SeqCst);
            Ok(pop(&self.healthy, true))
        })
    }

    fn has_activity<'a>(
        &'a self,
        _resource: &'a ResourceRef,
        _since: u64,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            self.calls.activity.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.activity_delay {
                tokio::time::sleep(delay).await;
            }
            if self.activity_panics {
                panic!("activity agent crashed");
            }
            pop(&self.activity, Ok(false))
        })
    }

    fn fence<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            self.calls.fence.fetch_add(1, Ordering::SeqCst);
            pop(&self.fence, Ok(true))
        })
    }

    fn recover<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            self.calls.recover.fetch_add(1, Ordering::SeqCst);
            pop(&self.recover, Ok(true))
        })
    }

    fn fence_dependents<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.calls.fence_dependents.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn release_dependents<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.calls.release_dependents.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn enable_maintenance<'a>(&'a self, _resource: &'a ResourceRef) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.calls.maintenance.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn send_alert<'a>(
        &'a self,
        _resource: &'a ResourceRef,
        phase: AlertPhase,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.alerts.lock().unwrap().push(phase);
            Ok(())
        })
    }

    fn config_value(&self, key: ConfigKey, _resource: &ResourceRef) -> Option<String> {
        self.overrides.get(&key).cloned()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn test_config(min_samples: u32, ratio: f64) -> ProviderConfig {
    ProviderConfig {
        probe_timeout: Duration::from_millis(500),
        fence_timeout: Duration::from_millis(500),
        recovery_timeout: Duration::from_millis(500),
        health_check_timeout: Duration::from_millis(500),
        min_samples,
        failure_ratio_threshold: ratio,
        ..ProviderConfig::default()
    }
}

fn orchestrator(mock: &Arc<MockProvider>, config: ProviderConfig) -> Orchestrator {
    orchestrator_on(mock, config, TaskRunner::new(4))
}

fn orchestrator_on(mock: &Arc<MockProvider>, config: ProviderConfig, runner: TaskRunner) -> Orchestrator {
    let provider: Arc<dyn ResourceProvider> = mock.clone();
    Orchestrator::new(
        StateStore::open_in_memory().unwrap(),
        ProviderRegistry::new().with(provider),
        runner,
    )
    .with_defaults(config)
}

async fn register(orchestrator: &Orchestrator, id: &str) -> String {
    let record = orchestrator
        .register(&ResourceRef::new(id, ResourceType::Host), true)
        .await
        .unwrap();
    assert_eq!(record.state, HaState::Available);
    record.table_key()
}

async fn state_of(orchestrator: &Orchestrator, key: &str) -> HaState {
    orchestrator.view(key).await.unwrap().unwrap().record.state
}

async fn counter_of(orchestrator: &Orchestrator, key: &str) -> CounterSnapshot {
    orchestrator.view(key).await.unwrap().unwrap().counter.unwrap()
}

async fn cycle(orchestrator: &Orchestrator, key: &str) -> HaState {
    orchestrator.run_cycle(key).await.unwrap().unwrap()
}

/// Liveness loss plus one cycle with a single-sample, fence-on-any-failure config.
async fn drive_to_fencing(orchestrator: &Orchestrator, key: &str) {
    orchestrator.report_liveness_loss(key).await.unwrap();
    assert_eq!(cycle(orchestrator, key).await, HaState::Fencing);
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn inactive_probes_over_threshold_fence_and_cascade() {
    let mock = Arc::new(MockProvider::new().activity((0..5).map(|_| Ok(false))));
    let orch = orchestrator(&mock, test_config(5, 0.5));
    let key = register(&orch, "h1").await;

    assert_eq!(
        orch.report_liveness_loss(&key).await.unwrap(),
        Some(HaState::Suspect)
    );

    for sample in 1..5 {
        assert_eq!(cycle(&orch, &key).await, HaState::Checking);
        assert_eq!(counter_of(&orch, &key).await.activity_samples, sample);
    }
    assert_eq!(cycle(&orch, &key).await, HaState::Fencing);
    // Deciding resets the window.
    assert_eq!(counter_of(&orch, &key).await.activity_samples, 0);

    assert_eq!(cycle(&orch, &key).await, HaState::Fenced);
    assert_eq!(MockProvider::count(&mock.calls.fence), 1);
    assert_eq!(MockProvider::count(&mock.calls.fence_dependents), 1);
    assert_eq!(MockProvider::count(&mock.calls.maintenance), 1);
    assert_eq!(mock.alerts(), vec![AlertPhase::Fencing]);
}

#[tokio::test]
async fn failed_recoveries_stay_fenced_and_alert_each_time() {
    let faults = (0..3).map(|i| Err(ProviderFault::Action(format!("ipmi timeout {i}"))));
    let mock = Arc::new(MockProvider::new().recover_results(faults));
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
    assert_eq!(cycle(&orch, &key).await, HaState::Fenced);

    for _ in 0..3 {
        assert_eq!(cycle(&orch, &key).await, HaState::Fenced);
    }

    assert_eq!(state_of(&orch, &key).await, HaState::Fenced);
    assert_eq!(counter_of(&orch, &key).await.recovery_attempts, 3);
    assert_eq!(mock.alerts_for(AlertPhase::Recovering), 3);
    assert_eq!(MockProvider::count(&mock.calls.release_dependents), 0);
}

#[tokio::test]
async fn indeterminate_first_probe_makes_resource_ineligible() {
    let mock = Arc::new(
        MockProvider::new().activity([Err(ProviderFault::Indeterminate("no agent".into()))]),
    );
    let orch = orchestrator(&mock, test_config(1, 0.0));
    let key = register(&orch, "h1").await;

    orch.report_liveness_loss(&key).await.unwrap();
    assert_eq!(cycle(&orch, &key).await, HaState::Ineligible);

    let counter = counter_of(&orch, &key).await;
    assert_eq!(counter.activity_samples, 0);
    assert_eq!(counter.activity_failures, 0);

    // Ineligible is terminal for the periodic path.
    assert_eq!(cycle(&orch, &key).await, HaState::Ineligible);
    assert_eq!(MockProvider::count(&mock.calls.fence), 0);
    assert_eq!(MockProvider::count(&mock.calls.activity), 1);

    assert_eq!(orch.enable(&key).await.unwrap(), Some(HaState::Available));
}

#[tokio::test]
async fn ratio_equal_to_threshold_degrades_instead_of_fencing() {
    let script = [false, false, false, true, true].map(Ok);
    let mock = Arc::new(MockProvider::new().activity(script));
    let orch = orchestrator(&mock, test_config(5, 0.6));
    let key = register(&orch, "h1").await;

    orch.report_liveness_loss(&key).await.unwrap();
    for _ in 0..4 {
        cycle(&orch, &key).await;
    }
    assert_eq!(cycle(&orch, &key).await, HaState::Degraded);

    let counter = counter_of(&orch, &key).await;
    assert!(counter.degraded);
    assert_eq!(counter.activity_samples, 0);
    assert_eq!(MockProvider::count(&mock.calls.fence), 0);
}

#[tokio::test]
async fn ratio_above_threshold_fences() {
    let script = [false, false, false, false, true].map(Ok);
    let mock = Arc::new(MockProvider::new().activity(script));
    let orch = orchestrator(&mock, test_config(5, 0.6));
    let key = register(&orch, "h1").await;

    orch.report_liveness_loss(&key).await.unwrap();
    for _ in 0..4 {
        cycle(&orch, &key).await;
    }
    assert_eq!(cycle(&orch, &key).await, HaState::Fencing);
}

#[tokio::test]
async fn probe_timeout_counts_as_inactive_sample() {
    let mock = Arc::new(
        MockProvider::new()
            .activity([Ok(true)])
            .activity_delay(Duration::from_millis(300)),
    );
    let config = ProviderConfig {
        probe_timeout: Duration::from_millis(30),
        ..test_config(1, 0.5)
    };
    let orch = orchestrator(&mock, config);
    let key = register(&orch, "h1").await;

    orch.report_liveness_loss(&key).await.unwrap();
    // The provider would have said "active", but too late.
    assert_eq!(cycle(&orch, &key).await, HaState::Fencing);
}

#[tokio::test]
async fn starved_worker_pool_takes_no_sample() {
    let mock = Arc::new(MockProvider::new().activity([Ok(true)]));
    let config = ProviderConfig {
        probe_timeout: Duration::from_millis(50),
        ..test_config(1, 0.5)
    };
    let runner = TaskRunner::new(1);
    let orch = orchestrator_on(&mock, config, runner.clone());
    let key = register(&orch, "h1").await;

    // The only worker stays busy long after its caller gave up.
    let held = runner
        .run(
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(true)
            },
            Some(Duration::from_millis(10)),
        )
        .await;
    assert_eq!(held, TaskOutcome::timed_out());
    assert_eq!(runner.idle_workers(), 0);

    orch.report_liveness_loss(&key).await.unwrap();
    assert_eq!(cycle(&orch, &key).await, HaState::Checking);
    assert_eq!(MockProvider::count(&mock.calls.activity), 0);
    assert_eq!(counter_of(&orch, &key).await.activity_samples, 0);
    assert_eq!(MockProvider::count(&mock.calls.fence), 0);
}

#[tokio::test]
async fn panicking_activity_check_makes_resource_ineligible() {
    let mock = Arc::new(MockProvider::new().activity_panics());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    orch.report_liveness_loss(&key).await.unwrap();
    assert_eq!(cycle(&orch, &key).await, HaState::Ineligible);
    assert_eq!(counter_of(&orch, &key).await.activity_samples, 0);
    assert_eq!(MockProvider::count(&mock.calls.fence), 0);
}

#[tokio::test]
async fn fence_failure_stays_fencing_and_retries() {
    let mock = Arc::new(MockProvider::new().fence_results([Ok(false)]));
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
    assert_eq!(cycle(&orch, &key).await, HaState::Fencing);
    assert_eq!(MockProvider::count(&mock.calls.fence_dependents), 0);
    assert_eq!(mock.alerts(), vec![AlertPhase::Fencing]);

    assert_eq!(cycle(&orch, &key).await, HaState::Fenced);
    assert_eq!(MockProvider::count(&mock.calls.fence), 2);
    assert_eq!(MockProvider::count(&mock.calls.fence_dependents), 1);
}

#[tokio::test]
async fn isolation_of_fenced_resource_is_a_no_op() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
    assert_eq!(orch.isolate(&key).await.unwrap(), HaState::Fenced);
    let fenced_at = orch.view(&key).await.unwrap().unwrap().record.last_transition_at;

    assert_eq!(orch.isolate(&key).await.unwrap(), HaState::Fenced);
    assert_eq!(MockProvider::count(&mock.calls.fence), 1);
    assert_eq!(MockProvider::count(&mock.calls.fence_dependents), 1);
    assert_eq!(MockProvider::count(&mock.calls.maintenance), 1);
    assert_eq!(mock.alerts(), vec![AlertPhase::Fencing]);
    assert_eq!(
        orch.view(&key).await.unwrap().unwrap().record.last_transition_at,
        fenced_at
    );
}

#[tokio::test]
async fn isolation_outside_fencing_is_ignored() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    assert_eq!(orch.isolate(&key).await.unwrap(), HaState::Available);
    assert_eq!(MockProvider::count(&mock.calls.fence), 0);
}

#[tokio::test]
async fn successful_recovery_returns_to_available() {
    let mock = Arc::new(
        MockProvider::new().recover_results([Err(ProviderFault::Action("bmc busy".into())), Ok(true)]),
    );
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
    assert_eq!(cycle(&orch, &key).await, HaState::Fenced);
    assert_eq!(cycle(&orch, &key).await, HaState::Fenced);
    assert_eq!(counter_of(&orch, &key).await.recovery_attempts, 1);

    assert_eq!(cycle(&orch, &key).await, HaState::Available);
    let counter = counter_of(&orch, &key).await;
    assert_eq!(counter.recovery_attempts, 0);
    assert_eq!(counter.suspect_since, None);
    assert_eq!(MockProvider::count(&mock.calls.release_dependents), 1);
    assert_eq!(mock.alerts_for(AlertPhase::Recovering), 2);
}

#[tokio::test]
async fn recovery_attempts_are_capped() {
    let faults = (0..5).map(|_| Ok(false));
    let mock = Arc::new(MockProvider::new().recover_results(faults));
    let config = ProviderConfig {
        max_recovery_attempts: 2,
        ..test_config(1, 0.5)
    };
    let orch = orchestrator(&mock, config);
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
    cycle(&orch, &key).await;
    for _ in 0..4 {
        assert_eq!(cycle(&orch, &key).await, HaState::Fenced);
    }
    assert_eq!(MockProvider::count(&mock.calls.recover), 2);
    assert_eq!(counter_of(&orch, &key).await.recovery_attempts, 2);
}

#[tokio::test]
async fn failed_health_check_makes_resource_suspect() {
    let mock = Arc::new(MockProvider::new().healthy([true, false]));
    let orch = orchestrator(&mock, test_config(3, 0.5));
    let key = register(&orch, "h1").await;

    assert_eq!(cycle(&orch, &key).await, HaState::Available);
    assert_eq!(cycle(&orch, &key).await, HaState::Suspect);
    assert!(counter_of(&orch, &key).await.suspect_since.is_some());
    assert_eq!(MockProvider::count(&mock.calls.activity), 0);
}

#[tokio::test]
async fn healthy_resource_never_transitions() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;
    let before = orch.view(&key).await.unwrap().unwrap().record;

    for _ in 0..3 {
        assert_eq!(cycle(&orch, &key).await, HaState::Available);
    }
    let after = orch.view(&key).await.unwrap().unwrap().record;
    assert_eq!(after.last_transition_at, before.last_transition_at);
    assert_eq!(MockProvider::count(&mock.calls.health), 3);
}

#[tokio::test]
async fn liveness_loss_ignored_outside_available() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
    assert_eq!(orch.report_liveness_loss(&key).await.unwrap(), None);
    assert_eq!(state_of(&orch, &key).await, HaState::Fencing);
}

// ── Degraded policy ────────────────────────────────────────────────

async fn drive_to_degraded(mock: &Arc<MockProvider>, config: ProviderConfig) -> (Orchestrator, String) {
    let orch = orchestrator(mock, config);
    let key = register(&orch, "h1").await;
    orch.report_liveness_loss(&key).await.unwrap();
    assert_eq!(cycle(&orch, &key).await, HaState::Degraded);
    (orch, key)
}

#[tokio::test]
async fn degraded_cools_down_to_available() {
    let mock = Arc::new(MockProvider::new().activity([Ok(true)]));
    let config = ProviderConfig {
        degraded_cooldown: Duration::ZERO,
        ..test_config(1, 0.5)
    };
    let (orch, key) = drive_to_degraded(&mock, config).await;

    assert_eq!(cycle(&orch, &key).await, HaState::Available);
}

#[tokio::test]
async fn degraded_waits_out_cooldown() {
    let mock = Arc::new(MockProvider::new().activity([Ok(true)]));
    let config = ProviderConfig {
        degraded_cooldown: Duration::from_secs(3600),
        ..test_config(1, 0.5)
    };
    let (orch, key) = drive_to_degraded(&mock, config).await;

    assert_eq!(cycle(&orch, &key).await, HaState::Degraded);
}

#[tokio::test]
async fn unbounded_cooldown_keeps_resource_degraded() {
    let mock = Arc::new(MockProvider::new().activity([Ok(true)]));
    let mut config = test_config(1, 0.5);
    config
        .set(ConfigKey::DegradedCooldown, &u64::MAX.to_string())
        .unwrap();
    let (orch, key) = drive_to_degraded(&mock, config).await;

    assert_eq!(cycle(&orch, &key).await, HaState::Degraded);
    assert_eq!(cycle(&orch, &key).await, HaState::Degraded);
}

#[tokio::test]
async fn degraded_health_failure_goes_suspect() {
    let mock = Arc::new(MockProvider::new().activity([Ok(true)]).healthy([false]));
    let config = ProviderConfig {
        degraded_cooldown: Duration::from_secs(3600),
        ..test_config(1, 0.5)
    };
    let (orch, key) = drive_to_degraded(&mock, config).await;

    assert_eq!(cycle(&orch, &key).await, HaState::Suspect);
}

#[tokio::test]
async fn degraded_recheck_policy_reenters_suspect() {
    let mock = Arc::new(MockProvider::new().activity([Ok(true)]));
    let config = ProviderConfig {
        degraded_policy: DegradedPolicy::Recheck,
        ..test_config(1, 0.5)
    };
    let (orch, key) = drive_to_degraded(&mock, config).await;

    assert_eq!(cycle(&orch, &key).await, HaState::Suspect);
    assert_eq!(cycle(&orch, &key).await, HaState::Fencing);
}

// ── Administration ─────────────────────────────────────────────────

#[tokio::test]
async fn disable_and_enable() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    assert_eq!(orch.disable(&key).await.unwrap(), Some(HaState::Disabled));
    let record = orch.view(&key).await.unwrap().unwrap().record;
    assert!(!record.ha_enabled);
    assert_eq!(orch.disable(&key).await.unwrap(), None);

    // Disabled resources are skipped by the sweep.
    assert_eq!(orch.run_all().await.unwrap(), 0);
    assert_eq!(MockProvider::count(&mock.calls.health), 0);

    assert_eq!(orch.enable(&key).await.unwrap(), Some(HaState::Available));
    assert!(orch.view(&key).await.unwrap().unwrap().record.ha_enabled);
    assert_eq!(orch.run_all().await.unwrap(), 1);
}

#[tokio::test]
async fn disable_mid_check_discards_samples() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(5, 0.5));
    let key = register(&orch, "h1").await;

    orch.report_liveness_loss(&key).await.unwrap();
    cycle(&orch, &key).await;
    assert_eq!(counter_of(&orch, &key).await.activity_samples, 1);

    orch.disable(&key).await.unwrap();
    orch.enable(&key).await.unwrap();
    assert_eq!(counter_of(&orch, &key).await.activity_samples, 0);
}

#[tokio::test]
async fn register_is_idempotent() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;
    orch.disable(&key).await.unwrap();

    let again = orch
        .register(&ResourceRef::new("h1", ResourceType::Host), true)
        .await
        .unwrap();
    assert_eq!(again.state, HaState::Disabled);
}

#[tokio::test]
async fn decommission_removes_record() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(1, 0.5));
    let key = register(&orch, "h1").await;

    assert!(orch.decommission(&key).await.unwrap());
    assert!(orch.view(&key).await.unwrap().is_none());
    assert!(!orch.decommission(&key).await.unwrap());
    assert!(matches!(
        orch.run_cycle(&key).await,
        Err(HealthError::UnknownResource(_))
    ));
}

#[tokio::test]
async fn provider_overrides_apply_per_resource() {
    let mock = Arc::new(MockProvider::new().override_value(ConfigKey::MinSamples, "1"));
    // Defaults alone would need ten samples.
    let orch = orchestrator(&mock, test_config(10, 0.5));
    let key = register(&orch, "h1").await;

    drive_to_fencing(&orch, &key).await;
}

#[tokio::test]
async fn views_serialize_with_counters() {
    let mock = Arc::new(MockProvider::new());
    let orch = orchestrator(&mock, test_config(5, 0.5));
    let h1 = register(&orch, "h1").await;
    register(&orch, "h2").await;

    orch.report_liveness_loss(&h1).await.unwrap();
    cycle(&orch, &h1).await;

    let views = orch.views().await.unwrap();
    assert_eq!(views.len(), 2);

    let json = serde_json::to_value(orch.view(&h1).await.unwrap().unwrap()).unwrap();
    assert_eq!(json["record"]["state"], "checking");
    assert_eq!(json["counter"]["activity_samples"], 1);
}

// ── Concurrency ────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_cycle_for_same_resource_is_skipped() {
    let mock = Arc::new(MockProvider::new().activity_delay(Duration::from_millis(200)));
    let orch = orchestrator(&mock, test_config(5, 0.5));
    let key = register(&orch, "h1").await;
    orch.report_liveness_loss(&key).await.unwrap();

    let first = {
        let orch = orch.clone();
        let key = key.clone();
        tokio::spawn(async move { orch.run_cycle(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(orch.run_cycle(&key).await.unwrap(), None);
    // A view taken mid-cycle carries no counter.
    assert!(orch.view(&key).await.unwrap().unwrap().counter.is_none());

    assert_eq!(first.await.unwrap().unwrap(), Some(HaState::Checking));
    assert_eq!(MockProvider::count(&mock.calls.activity), 1);
    assert_eq!(counter_of(&orch, &key).await.activity_samples, 1);
}

#[tokio::test]
async fn different_resources_cycle_concurrently() {
    let mock = Arc::new(MockProvider::new().activity_delay(Duration::from_millis(200)));
    let orch = orchestrator(&mock, test_config(5, 0.5));
    let h1 = register(&orch, "h1").await;
    let h2 = register(&orch, "h2").await;
    orch.report_liveness_loss(&h1).await.unwrap();
    orch.report_liveness_loss(&h2).await.unwrap();

    let started = Instant::now();
    assert_eq!(orch.run_all().await.unwrap(), 2);
    assert!(started.elapsed() < Duration::from_millis(390));

    assert_eq!(state_of(&orch, &h1).await, HaState::Checking);
    assert_eq!(state_of(&orch, &h2).await, HaState::Checking);
}
