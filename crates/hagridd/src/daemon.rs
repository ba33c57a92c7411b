//! Daemon wiring: config → providers → orchestrator → loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hagrid_core::{HagridConfig, ResourceRef, ResourceType};
use hagrid_health::{HookProvider, Orchestrator, ProviderRegistry, TaskRunner};
use hagrid_state::StateStore;
use tokio::sync::watch;
use tracing::{info, warn};

pub const DEFAULT_DATA_DIR: &str = "/var/lib/hagrid";
pub const DB_FILE: &str = "hagrid.redb";

/// Run the daemon until Ctrl-C.
pub async fn run(config_path: PathBuf, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    info!(config = ?config_path, "hagrid daemon starting");

    let config = HagridConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let data_dir = data_dir
        .or_else(|| config.orchestrator.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join(DB_FILE);

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let orchestrator = build_orchestrator(&config, state)?;
    sync_resources(&orchestrator, &config).await?;

    // ── Orchestrator loop ──────────────────────────────────────

    let interval = config.interval()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.run(interval, shutdown_rx).await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;

    info!("hagrid daemon stopped");
    Ok(())
}

/// One hook provider per `[providers.<type>]` section, with resource
/// addresses attached.
pub fn build_registry(config: &HagridConfig) -> anyhow::Result<ProviderRegistry> {
    let mut providers: HashMap<ResourceType, HookProvider> = HashMap::new();
    for (resource_type, section) in config.provider_sections()? {
        let mut provider = HookProvider::new(resource_type, section.hooks.clone());
        if let Some(limit) = section.hooks.kill_after()? {
            provider = provider.with_kill_after(limit);
        }
        providers.insert(resource_type, provider);
    }

    for entry in &config.resources {
        let resource_type = entry.resource_type()?;
        if let (Some(address), Some(provider)) = (&entry.address, providers.get_mut(&resource_type)) {
            provider.add_address(&entry.id, address);
        }
    }

    let mut registry = ProviderRegistry::new();
    for (resource_type, provider) in providers {
        info!(%resource_type, "hook provider configured");
        registry.register(Arc::new(provider));
    }
    Ok(registry)
}

pub fn build_orchestrator(config: &HagridConfig, state: StateStore) -> anyhow::Result<Orchestrator> {
    let registry = build_registry(config)?;
    let runner = TaskRunner::new(config.workers());

    let mut orchestrator = Orchestrator::new(state, registry.clone(), runner)
        .with_defaults(config.base_provider_config()?);
    for resource_type in registry.resource_types() {
        orchestrator =
            orchestrator.with_type_config(resource_type, config.provider_config(resource_type)?);
    }
    Ok(orchestrator)
}

/// Register configured resources and align their HA switch with the file.
///
/// Records for resources no longer in the file are kept: they may hold a
/// fenced state an operator still needs to see.
pub async fn sync_resources(orchestrator: &Orchestrator, config: &HagridConfig) -> anyhow::Result<()> {
    let mut configured = Vec::with_capacity(config.resources.len());

    for entry in &config.resources {
        let resource = ResourceRef::new(&entry.id, entry.resource_type()?);
        let record = orchestrator
            .register(&resource, entry.ha_enabled)
            .await
            .with_context(|| format!("registering {resource}"))?;
        let key = record.table_key();

        match (entry.ha_enabled, record.ha_enabled) {
            (true, false) => {
                orchestrator.enable(&key).await?;
            }
            (false, true) => {
                orchestrator.disable(&key).await?;
            }
            _ => {}
        }
        configured.push(key);
    }

    for view in orchestrator.views().await? {
        let key = view.record.table_key();
        if !configured.contains(&key) {
            warn!(resource = %key, state = %view.record.state, "record not in config, left untouched");
        }
    }

    info!(resources = configured.len(), "resources registered");
    Ok(())
}
