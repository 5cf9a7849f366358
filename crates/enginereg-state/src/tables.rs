//! redb table definitions for the binding store.

use redb::TableDefinition;

/// Binding rows keyed by `id`, JSON-serialized.
pub const BINDINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("bindings");

/// Unique index: `(instance, cluster)` → binding `id`.
pub const BINDING_KEYS: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("binding_keys");

/// Store metadata counters keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last id handed out.
pub const LAST_BINDING_ID: &str = "last_binding_id";
