//! Health orchestrator — the only component that mutates HA state.
//!
//! Each resource gets a slot holding its in-memory [`ResourceCounter`]
//! behind an async mutex. A cycle (observe → act → decide → persist) runs
//! with that mutex held, so two cycles for the same resource never decide
//! independently. Periodic cycles that find the slot busy skip the
//! resource; explicit operations wait for it. Different resources never
//! contend on anything but the worker pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hagrid_core::{DegradedPolicy, ProviderConfig, ResourceRef, ResourceType};
use hagrid_state::{HaState, HealthRecord, StateError, StateStore};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::counter::{CounterSnapshot, ResourceCounter};
use crate::error::{HealthError, HealthResult};
use crate::provider::{ProviderRegistry, ResourceProvider, resolve_config};
use crate::runner::TaskRunner;
use crate::task::{Task, TaskKind};
use crate::transition::{HaEvent, next_state};

/// Per-resource in-memory state.
#[derive(Debug, Default)]
struct ResourceSlot {
    counter: ResourceCounter,
}

/// Read model for one resource.
#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub record: HealthRecord,
    /// `None` while a cycle holds the resource.
    pub counter: Option<CounterSnapshot>,
}

/// Drives every HA-enabled resource through the HA state machine.
#[derive(Clone)]
pub struct Orchestrator {
    state: StateStore,
    providers: ProviderRegistry,
    runner: TaskRunner,
    defaults: ProviderConfig,
    type_configs: Arc<HashMap<ResourceType, ProviderConfig>>,
    slots: Arc<RwLock<HashMap<String, Arc<Mutex<ResourceSlot>>>>>,
}

impl Orchestrator {
    pub fn new(state: StateStore, providers: ProviderRegistry, runner: TaskRunner) -> Self {
        Self {
            state,
            providers,
            runner,
            defaults: ProviderConfig::default(),
            type_configs: Arc::new(HashMap::new()),
            slots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Settings used for resource types without their own config.
    pub fn with_defaults(mut self, defaults: ProviderConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_type_config(mut self, resource_type: ResourceType, config: ProviderConfig) -> Self {
        Arc::make_mut(&mut self.type_configs).insert(resource_type, config);
        self
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register a resource for HA. Re-registering returns the stored record.
    pub async fn register(
        &self,
        resource: &ResourceRef,
        ha_enabled: bool,
    ) -> HealthResult<HealthRecord> {
        if self.providers.get(resource.resource_type).is_none() {
            return Err(HealthError::NoProvider(resource.resource_type));
        }

        let record = HealthRecord::new(resource, ha_enabled, epoch_secs());
        match self.state.insert_record(&record) {
            Ok(()) => {
                info!(resource = %resource, state = %record.state, "resource registered for HA");
                self.slot(&record.table_key()).await;
                Ok(record)
            }
            Err(StateError::AlreadyExists(key)) => {
                debug!(resource = %resource, "resource already registered");
                self.state
                    .get_record(&key)?
                    .ok_or(HealthError::UnknownResource(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a resource from HA management entirely.
    pub async fn decommission(&self, key: &str) -> HealthResult<bool> {
        let slot = self.slot(key).await;
        let _guard = slot.lock().await;
        let existed = self.state.delete_record(key)?;
        self.slots.write().await.remove(key);
        if existed {
            info!(resource = %key, "resource decommissioned");
        }
        Ok(existed)
    }

    pub async fn enable(&self, key: &str) -> HealthResult<Option<HaState>> {
        self.signal(key, HaEvent::Enable).await
    }

    pub async fn disable(&self, key: &str) -> HealthResult<Option<HaState>> {
        self.signal(key, HaEvent::Disable).await
    }

    /// External liveness-loss signal. Ignored unless Available or Degraded.
    pub async fn report_liveness_loss(&self, key: &str) -> HealthResult<Option<HaState>> {
        self.signal(key, HaEvent::LivenessLost).await
    }

    async fn signal(&self, key: &str, event: HaEvent) -> HealthResult<Option<HaState>> {
        self.require(key)?;
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        self.apply(key, event, &mut guard.counter)
    }

    // ── Cycles ─────────────────────────────────────────────────────

    /// Run one cycle for a resource.
    ///
    /// Returns the state after the cycle, or `None` if another cycle for
    /// the same resource was already in flight.
    pub async fn run_cycle(&self, key: &str) -> HealthResult<Option<HaState>> {
        self.require(key)?;
        let slot = self.slot(key).await;
        let Ok(mut guard) = slot.try_lock() else {
            debug!(resource = %key, "cycle already in flight, skipping");
            return Ok(None);
        };
        let record = self.require(key)?;
        self.cycle(record, &mut guard.counter).await.map(Some)
    }

    /// Run one cycle for every HA-enabled resource, concurrently.
    ///
    /// Per-resource errors are logged, never propagated. Returns how many
    /// cycles actually ran.
    pub async fn run_all(&self) -> HealthResult<usize> {
        let records = self.state.list_records()?;
        let mut cycles = JoinSet::new();

        for record in records.into_iter().filter(|r| r.ha_enabled) {
            let this = self.clone();
            let key = record.table_key();
            cycles.spawn(async move {
                let outcome = this.run_cycle(&key).await;
                (key, outcome)
            });
        }

        let mut ran = 0;
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok((_, Ok(Some(_)))) => ran += 1,
                Ok((_, Ok(None))) => {}
                Ok((key, Err(e))) => error!(resource = %key, error = %e, "HA cycle failed"),
                Err(e) => error!(error = %e, "HA cycle task aborted"),
            }
        }
        Ok(ran)
    }

    /// Run cycles every `interval` until `shutdown` flips.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), workers = self.runner.workers(), "health orchestrator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.run_all().await {
                        Ok(ran) => debug!(
                            cycles = ran,
                            idle_workers = self.runner.idle_workers(),
                            "HA cycles complete"
                        ),
                        Err(e) => error!(error = %e, "HA cycle sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("health orchestrator shutting down");
                    break;
                }
            }
        }
    }

    /// Run the isolation task now. A no-op unless Fencing; an already
    /// Fenced resource is left alone.
    pub async fn isolate(&self, key: &str) -> HealthResult<HaState> {
        self.require(key)?;
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let record = self.require(key)?;
        match record.state {
            HaState::Fencing | HaState::Fenced => {
                let (provider, config) = self.provider_for(&record)?;
                let task = Task::new(TaskKind::Isolation, record.clone(), provider, &config);
                let event = task.execute(&self.runner, &mut guard.counter, &config).await;
                let next = match event {
                    Some(event) => self.apply(key, event, &mut guard.counter)?,
                    None => None,
                };
                Ok(next.unwrap_or(record.state))
            }
            other => {
                debug!(resource = %key, state = %other, "isolation requested outside fencing, ignored");
                Ok(other)
            }
        }
    }

    async fn cycle(&self, record: HealthRecord, counter: &mut ResourceCounter) -> HealthResult<HaState> {
        let key = record.table_key();
        let (provider, config) = self.provider_for(&record)?;
        let mut state = record.state;

        match record.state {
            HaState::Available => {
                let task = Task::new(TaskKind::HealthCheck, record, provider, &config);
                if let Some(event) = task.execute(&self.runner, counter, &config).await {
                    state = self.apply(&key, event, counter)?.unwrap_or(state);
                }
            }
            HaState::Suspect | HaState::Checking => {
                let mut record = record;
                if record.state == HaState::Suspect {
                    if self.apply(&key, HaEvent::PerformActivityCheck, counter)?.is_none() {
                        return Ok(state);
                    }
                    record = self.require(&key)?;
                    state = record.state;
                }
                let task = Task::new(TaskKind::ActivityCheck, record, provider, &config);
                if let Some(event) = task.execute(&self.runner, counter, &config).await {
                    state = self.apply(&key, event, counter)?.unwrap_or(state);
                }
            }
            HaState::Degraded => {
                state = self.cycle_degraded(record, provider, &config, counter).await?;
            }
            HaState::Fencing => {
                let task = Task::new(TaskKind::Isolation, record, provider, &config);
                if let Some(event) = task.execute(&self.runner, counter, &config).await {
                    state = self.apply(&key, event, counter)?.unwrap_or(state);
                }
            }
            HaState::Fenced | HaState::Recovering => {
                if !counter.can_attempt_recovery(config.max_recovery_attempts) {
                    debug!(
                        resource = %key,
                        attempts = counter.recovery_attempts(),
                        max = config.max_recovery_attempts,
                        "recovery attempts exhausted"
                    );
                    return Ok(state);
                }
                let mut record = record;
                if record.state == HaState::Fenced {
                    if self.apply(&key, HaEvent::StartRecovery, counter)?.is_none() {
                        return Ok(state);
                    }
                    record = self.require(&key)?;
                    state = record.state;
                }
                let task = Task::new(TaskKind::Recovery, record, provider, &config);
                if let Some(event) = task.execute(&self.runner, counter, &config).await {
                    state = self.apply(&key, event, counter)?.unwrap_or(state);
                }
                if state == HaState::Recovered {
                    state = self.apply(&key, HaEvent::Activated, counter)?.unwrap_or(state);
                }
            }
            HaState::Recovered => {
                state = self.apply(&key, HaEvent::Activated, counter)?.unwrap_or(state);
            }
            HaState::Ineligible | HaState::Disabled => {}
        }

        Ok(state)
    }

    async fn cycle_degraded(
        &self,
        record: HealthRecord,
        provider: Arc<dyn ResourceProvider>,
        config: &ProviderConfig,
        counter: &mut ResourceCounter,
    ) -> HealthResult<HaState> {
        let key = record.table_key();
        let state = record.state;

        if config.degraded_policy == DegradedPolicy::Recheck {
            return Ok(self.apply(&key, HaEvent::Recheck, counter)?.unwrap_or(state));
        }

        let cooled_at = record
            .last_transition_at
            .saturating_add(config.degraded_cooldown.as_secs());
        let task = Task::new(TaskKind::HealthCheck, record, provider, config);
        if let Some(event) = task.execute(&self.runner, counter, config).await {
            return Ok(self.apply(&key, event, counter)?.unwrap_or(state));
        }
        if epoch_secs() >= cooled_at {
            return Ok(self.apply(&key, HaEvent::DegradedCooled, counter)?.unwrap_or(state));
        }
        Ok(state)
    }

    // ── Transition ─────────────────────────────────────────────────

    /// Apply `event` to the persisted record and the counter.
    ///
    /// Returns the new state, or `None` if the event is not accepted in the
    /// current state (nothing is written).
    fn apply(
        &self,
        key: &str,
        event: HaEvent,
        counter: &mut ResourceCounter,
    ) -> HealthResult<Option<HaState>> {
        let now = epoch_secs();
        let outcome = self.state.update_record(key, |record| {
            let from = record.state;
            let to = next_state(from, event)?;
            record.state = to;
            record.last_transition_at = now;
            match event {
                HaEvent::Enable => record.ha_enabled = true,
                HaEvent::Disable => record.ha_enabled = false,
                _ => {}
            }
            Some((from, to))
        })?;

        let Some((from, to)) = outcome else {
            debug!(resource = %key, %event, "event not accepted in current state");
            return Ok(None);
        };

        match event {
            HaEvent::Enable | HaEvent::Disable => *counter = ResourceCounter::new(),
            HaEvent::Ineligible
            | HaEvent::ActivityOverThreshold
            | HaEvent::ActivityUnderThreshold => counter.reset_activity(),
            HaEvent::Activated => counter.clear_degraded(),
            _ => {}
        }
        if to == HaState::Suspect {
            counter.mark_suspect(now);
        }
        if to == HaState::Available {
            counter.reset_recovery();
            counter.clear_suspect();
        }

        if from == to {
            debug!(resource = %key, state = %to, %event, "state refreshed");
        } else {
            info!(resource = %key, %from, %to, %event, "HA state transition");
        }
        Ok(Some(to))
    }

    // ── Read model ─────────────────────────────────────────────────

    pub async fn view(&self, key: &str) -> HealthResult<Option<HealthView>> {
        let Some(record) = self.state.get_record(key)? else {
            return Ok(None);
        };
        Ok(Some(self.view_of(record).await))
    }

    pub async fn views(&self) -> HealthResult<Vec<HealthView>> {
        let mut views = Vec::new();
        for record in self.state.list_records()? {
            views.push(self.view_of(record).await);
        }
        Ok(views)
    }

    async fn view_of(&self, record: HealthRecord) -> HealthView {
        let slot = self.slot(&record.table_key()).await;
        let counter = slot.try_lock().ok().map(|s| s.counter.snapshot());
        HealthView { record, counter }
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn require(&self, key: &str) -> HealthResult<HealthRecord> {
        self.state
            .get_record(key)?
            .ok_or_else(|| HealthError::UnknownResource(key.to_string()))
    }

    fn provider_for(
        &self,
        record: &HealthRecord,
    ) -> HealthResult<(Arc<dyn ResourceProvider>, ProviderConfig)> {
        let provider = self
            .providers
            .get(record.resource_type)
            .ok_or(HealthError::NoProvider(record.resource_type))?;
        let base = self
            .type_configs
            .get(&record.resource_type)
            .unwrap_or(&self.defaults);
        let config = resolve_config(base, provider.as_ref(), &record.resource());
        Ok((provider, config))
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<ResourceSlot>> {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots.entry(key.to_string()).or_default().clone()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
