//! redb table definitions for the Berth state store.

use redb::TableDefinition;

/// Container records keyed by the engine-assigned container id.
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Scheduler nodes keyed by node id.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
