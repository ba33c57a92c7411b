//! hagrid-state — persistent health records for the hagrid orchestrator.
//!
//! Backed by [redb](https://docs.rs/redb). One `HealthRecord` per HA-managed
//! resource, JSON-serialized under the composite key `{type}/{id}`.
//!
//! redb admits a single write transaction at a time, so
//! [`StateStore::update_record`] is a read-modify-write that no other writer
//! can interleave with. The orchestrator uses it as its per-key
//! serialization point.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
