//! redb table definitions.

use redb::TableDefinition;

/// Health records keyed by `{resource_type}/{resource_id}`.
pub const HEALTH_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("health_records");
