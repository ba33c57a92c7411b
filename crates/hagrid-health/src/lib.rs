//! hagrid-health — activity checks, fencing, and recovery for hagrid.
//!
//! Watches HA-enabled resources, decides from repeated activity samples
//! whether an unresponsive resource is really dead, isolates it (fence,
//! cascade to dependents, maintenance, alert) and then retries recovery
//! until it comes back.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── Per-resource slot (async mutex)
//!   │   └── ResourceCounter (activity samples, recovery attempts)
//!   ├── Task (health check / activity check / isolation / recovery)
//!   │   └── TaskRunner → bounded, timed provider call → TaskOutcome
//!   ├── ProviderRegistry → ResourceProvider per resource type
//!   └── next_state() → HealthRecord in StateStore
//! ```
//!
//! # State machine
//!
//! ```text
//! Available ─LivenessLost→ Suspect ─→ Checking ─over→ Fencing → Fenced
//!     ↑                                  │under            ↕
//!     ├──────────── Degraded ←───────────┘             Recovering
//!     └──────────────────── Recovered ←─────────────────────┘
//! ```
//!
//! A check that cannot be evaluated parks the resource in `Ineligible`;
//! only an explicit enable brings it back.

pub mod counter;
pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod provider;
pub mod runner;
pub mod task;
pub mod transition;

pub use counter::{ActivityVerdict, CounterSnapshot, ResourceCounter};
pub use error::{HealthError, HealthResult};
pub use hooks::HookProvider;
pub use orchestrator::{HealthView, Orchestrator};
pub use provider::{
    AlertPhase, ProviderFault, ProviderFuture, ProviderRegistry, ResourceProvider, resolve_config,
};
pub use runner::{TaskOutcome, TaskRunner};
pub use task::{Task, TaskKind};
pub use transition::{HaEvent, next_state};
