//! redb table definitions.

use redb::TableDefinition;

/// Latest setup output keyed by owner id.
pub const SETUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("setups");
