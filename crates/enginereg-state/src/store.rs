//! StateStore — redb-backed binding persistence.
//!
//! Provides the storage primitives the membership layer builds on:
//! insert, partial update, bulk conditional update, bulk delete, ordered
//! query, count and distinct projection. Every call runs in a single redb
//! transaction. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Storage interface for bindings.
///
/// The `(instance, cluster)` uniqueness constraint is enforced here, beneath
/// any checks made by callers: `insert` and cluster-changing updates fail
/// with [`StateError::DuplicateKey`] rather than writing a second row.
pub trait BindingStore: Send + Sync {
    /// Persist a new binding and return it with its assigned id.
    fn insert(&self, binding: NewBinding) -> StateResult<Binding>;

    /// Partially update one binding by id.
    fn update_fields(&self, id: BindingId, update: &BindingUpdate) -> StateResult<Binding>;

    /// Apply `update` to every binding matching `filter`. Returns the number
    /// of rows matched; zero is not an error.
    fn update_matching(&self, filter: &BindingFilter, update: &BindingUpdate) -> StateResult<u64>;

    /// Delete bindings by id. Unknown ids are ignored. Returns rows removed.
    fn delete_by_ids(&self, ids: &[BindingId]) -> StateResult<u64>;

    /// Bindings matching `filter`, ordered by instance (then id).
    fn query(&self, filter: &BindingFilter) -> StateResult<Vec<Binding>>;

    fn count(&self, filter: &BindingFilter) -> StateResult<u64>;

    /// Distinct values of one column over the matching bindings.
    fn distinct_field(
        &self,
        field: BindingField,
        filter: &BindingFilter,
    ) -> StateResult<BTreeSet<String>>;

    fn get(&self, id: BindingId) -> StateResult<Option<Binding>>;
}

/// Thread-safe binding store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "binding store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory binding store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        txn.open_table(BINDING_KEYS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_matching(&self, filter: &BindingFilter) -> StateResult<Vec<Binding>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let rows = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        let keys = txn.open_table(BINDING_KEYS).map_err(map_err!(Table))?;
        collect_matching(&rows, &keys, filter)
    }
}

impl BindingStore for StateStore {
    fn insert(&self, binding: NewBinding) -> StateResult<Binding> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = insert_in(&txn, &binding);
        let stored = finish(txn, result)?;
        debug!(
            id = stored.id,
            instance = %stored.instance,
            cluster = %stored.cluster,
            "binding stored"
        );
        Ok(stored)
    }

    fn update_fields(&self, id: BindingId, update: &BindingUpdate) -> StateResult<Binding> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = update_one_in(&txn, id, update);
        let updated = finish(txn, result)?;
        debug!(id, cluster = %updated.cluster, "binding updated");
        Ok(updated)
    }

    fn update_matching(&self, filter: &BindingFilter, update: &BindingUpdate) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = update_matching_in(&txn, filter, update);
        let matched = finish(txn, result)?;
        debug!(matched, "bindings updated");
        Ok(matched)
    }

    fn delete_by_ids(&self, ids: &[BindingId]) -> StateResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = delete_in(&txn, ids);
        let removed = finish(txn, result)?;
        debug!(requested = ids.len(), removed, "bindings deleted");
        Ok(removed)
    }

    fn query(&self, filter: &BindingFilter) -> StateResult<Vec<Binding>> {
        self.read_matching(filter)
    }

    fn count(&self, filter: &BindingFilter) -> StateResult<u64> {
        Ok(self.read_matching(filter)?.len() as u64)
    }

    fn distinct_field(
        &self,
        field: BindingField,
        filter: &BindingFilter,
    ) -> StateResult<BTreeSet<String>> {
        Ok(self
            .read_matching(filter)?
            .iter()
            .map(|b| field.value(b).to_string())
            .collect())
    }

    fn get(&self, id: BindingId) -> StateResult<Option<Binding>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let rows = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        match rows.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }
}

// ── Transaction bodies ─────────────────────────────────────────────

/// Commit on success, abort on failure.
fn finish<T>(txn: WriteTransaction, result: StateResult<T>) -> StateResult<T> {
    match result {
        Ok(value) => {
            txn.commit().map_err(map_err!(Transaction))?;
            Ok(value)
        }
        Err(e) => {
            txn.abort().map_err(map_err!(Transaction))?;
            Err(e)
        }
    }
}

fn insert_in(txn: &WriteTransaction, new: &NewBinding) -> StateResult<Binding> {
    let mut keys = txn.open_table(BINDING_KEYS).map_err(map_err!(Table))?;
    let occupied = keys
        .get((new.instance.as_str(), new.cluster.as_str()))
        .map_err(map_err!(Read))?
        .is_some();
    if occupied {
        return Err(StateError::DuplicateKey {
            instance: new.instance.clone(),
            cluster: new.cluster.clone(),
        });
    }

    let binding = Binding {
        id: next_id(txn)?,
        instance: new.instance.clone(),
        cluster: new.cluster.clone(),
        last_heartbeat: new.last_heartbeat,
    };
    let value = encode(&binding)?;

    let mut rows = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
    rows.insert(binding.id, value.as_slice())
        .map_err(map_err!(Write))?;
    keys.insert(
        (binding.instance.as_str(), binding.cluster.as_str()),
        binding.id,
    )
    .map_err(map_err!(Write))?;
    Ok(binding)
}

/// Hand out the next binding id. Ids are never reused.
fn next_id(txn: &WriteTransaction) -> StateResult<BindingId> {
    let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
    let last = meta
        .get(LAST_BINDING_ID)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let id = last + 1;
    meta.insert(LAST_BINDING_ID, id).map_err(map_err!(Write))?;
    Ok(id)
}

fn update_one_in(
    txn: &WriteTransaction,
    id: BindingId,
    update: &BindingUpdate,
) -> StateResult<Binding> {
    let mut rows = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
    let mut keys = txn.open_table(BINDING_KEYS).map_err(map_err!(Table))?;
    let current = match rows.get(id).map_err(map_err!(Read))? {
        Some(guard) => decode(guard.value())?,
        None => return Err(StateError::NotFound(id)),
    };
    write_update(&mut rows, &mut keys, current, update)
}

fn update_matching_in(
    txn: &WriteTransaction,
    filter: &BindingFilter,
    update: &BindingUpdate,
) -> StateResult<u64> {
    let mut rows = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
    let mut keys = txn.open_table(BINDING_KEYS).map_err(map_err!(Table))?;
    let matched = collect_matching(&rows, &keys, filter)?;
    let count = matched.len() as u64;
    for binding in matched {
        write_update(&mut rows, &mut keys, binding, update)?;
    }
    Ok(count)
}

/// Apply `update` to `current`, keeping the unique index in step with the row.
fn write_update(
    rows: &mut Table<'_, u64, &'static [u8]>,
    keys: &mut Table<'_, (&'static str, &'static str), u64>,
    current: Binding,
    update: &BindingUpdate,
) -> StateResult<Binding> {
    let mut next = current.clone();
    if !update.apply(&mut next) {
        return Ok(current);
    }

    if next.cluster != current.cluster {
        let occupant = keys
            .get((next.instance.as_str(), next.cluster.as_str()))
            .map_err(map_err!(Read))?
            .map(|guard| guard.value());
        if occupant.is_some_and(|id| id != current.id) {
            return Err(StateError::DuplicateKey {
                instance: next.instance,
                cluster: next.cluster,
            });
        }
        keys.remove((current.instance.as_str(), current.cluster.as_str()))
            .map_err(map_err!(Write))?;
        keys.insert((next.instance.as_str(), next.cluster.as_str()), next.id)
            .map_err(map_err!(Write))?;
    }

    let value = encode(&next)?;
    rows.insert(next.id, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(next)
}

fn delete_in(txn: &WriteTransaction, ids: &[BindingId]) -> StateResult<u64> {
    let mut rows = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
    let mut keys = txn.open_table(BINDING_KEYS).map_err(map_err!(Table))?;
    let mut removed = 0;
    for &id in ids {
        let binding = match rows.remove(id).map_err(map_err!(Write))? {
            Some(guard) => decode(guard.value())?,
            None => continue,
        };
        keys.remove((binding.instance.as_str(), binding.cluster.as_str()))
            .map_err(map_err!(Write))?;
        removed += 1;
    }
    Ok(removed)
}

/// Collect bindings matching `filter`, ordered by instance then id.
///
/// A filter naming one exact `(instance, cluster)` pair is answered from the
/// unique index instead of a table scan.
fn collect_matching<R, K>(rows: &R, keys: &K, filter: &BindingFilter) -> StateResult<Vec<Binding>>
where
    R: ReadableTable<u64, &'static [u8]>,
    K: ReadableTable<(&'static str, &'static str), u64>,
{
    let mut results = Vec::new();

    if let Some((instance, cluster)) = filter.as_pair() {
        let id = keys
            .get((instance, cluster))
            .map_err(map_err!(Read))?
            .map(|guard| guard.value());
        if let Some(id) = id {
            if let Some(guard) = rows.get(id).map_err(map_err!(Read))? {
                let binding = decode(guard.value())?;
                if filter.matches(&binding) {
                    results.push(binding);
                }
            }
        }
        return Ok(results);
    }

    for entry in rows.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let binding = decode(value.value())?;
        if filter.matches(&binding) {
            results.push(binding);
        }
    }
    results.sort_by(|a, b| a.instance.cmp(&b.instance).then(a.id.cmp(&b.id)));
    Ok(results)
}

fn encode(binding: &Binding) -> StateResult<Vec<u8>> {
    serde_json::to_vec(binding).map_err(map_err!(Serialize))
}

fn decode(bytes: &[u8]) -> StateResult<Binding> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}
