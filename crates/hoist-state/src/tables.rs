//! redb table definitions for the hoist registry.
//!
//! Values are JSON-serialized `AppRecord`s keyed by app name.

use redb::TableDefinition;

/// App records keyed by `{app_name}`.
pub const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");
