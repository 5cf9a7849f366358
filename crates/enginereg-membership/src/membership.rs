//! Membership manager — bindings between worker instances and reader-clusters.
//!
//! Every call is a self-contained round of store transactions; the manager
//! keeps no mutable state of its own, so one instance can be shared freely
//! between operator sessions and heartbeat loops.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use enginereg_state::*;

use crate::clock::{Clock, SystemClock};
use crate::error::{MembershipError, MembershipResult};

/// A binding together with its read-time liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingLiveness {
    #[serde(flatten)]
    pub binding: Binding,
    /// Seconds since the last heartbeat.
    pub staleness_secs: i64,
    /// Whether the binding heartbeated within the threshold.
    pub alive: bool,
}

/// Enforces binding invariants on top of a [`BindingStore`].
pub struct MembershipManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: BindingStore> MembershipManager<S> {
    /// Create a manager over `store` using the wall clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now_secs(&self) -> i64 {
        self.clock.now_secs()
    }

    // ── Assignment ─────────────────────────────────────────────────

    /// Bind `instance` to `cluster` with a fresh heartbeat.
    ///
    /// Fails with [`MembershipError::DuplicateAssignment`] if the pair is
    /// already bound, whether that is seen by the pre-check or by the
    /// store's unique index after a concurrent insert.
    pub fn register(&self, instance: &str, cluster: &str) -> MembershipResult<Binding> {
        if self.store.count(&BindingFilter::pair(instance, cluster))? > 0 {
            warn!(%instance, %cluster, "register rejected: pair already bound");
            return Err(duplicate(instance, cluster));
        }

        let binding = self
            .store
            .insert(NewBinding::new(instance, cluster, self.now_secs()))?;
        info!(id = binding.id, %instance, %cluster, "binding registered");
        Ok(binding)
    }

    /// Move `binding` to `cluster`, leaving its heartbeat untouched.
    ///
    /// Fails without modifying anything if the same instance already holds
    /// `cluster` under another binding.
    pub fn reassign(&self, binding: &Binding, cluster: &str) -> MembershipResult<Binding> {
        let peers = BindingFilter::pair(&binding.instance, cluster).excluding(binding.id);
        if self.store.count(&peers)? > 0 {
            warn!(
                id = binding.id,
                instance = %binding.instance,
                %cluster,
                "reassign rejected: pair already bound"
            );
            return Err(duplicate(&binding.instance, cluster));
        }

        let updated = self
            .store
            .update_fields(binding.id, &BindingUpdate::cluster(cluster))?;
        info!(
            id = updated.id,
            instance = %updated.instance,
            from = %binding.cluster,
            to = %updated.cluster,
            "binding reassigned"
        );
        Ok(updated)
    }

    /// Load a binding by id and [`reassign`](Self::reassign) it.
    pub fn reassign_by_id(&self, id: BindingId, cluster: &str) -> MembershipResult<Binding> {
        let binding = self
            .store
            .get(id)?
            .ok_or(MembershipError::NotFound(id))?;
        self.reassign(&binding, cluster)
    }

    /// Delete bindings by id. Empty or unknown ids are not an error.
    pub fn deregister(&self, ids: &[BindingId]) -> MembershipResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_by_ids(ids)?;
        info!(requested = ids.len(), removed, "bindings deregistered");
        Ok(removed)
    }

    // ── Heartbeats ─────────────────────────────────────────────────

    /// Refresh the heartbeat of `(instance, cluster)`, creating the binding
    /// on first sight.
    pub fn heartbeat_with_cluster(&self, instance: &str, cluster: &str) -> MembershipResult<()> {
        let now = self.now_secs();
        let key = BindingFilter::pair(instance, cluster);

        if self.store.count(&key)? == 0 {
            match self.store.insert(NewBinding::new(instance, cluster, now)) {
                Ok(binding) => {
                    info!(id = binding.id, %instance, %cluster, "binding created by heartbeat");
                    return Ok(());
                }
                // Another heartbeat for the same pair got there first.
                Err(StateError::DuplicateKey { .. }) => {
                    debug!(%instance, %cluster, "heartbeat insert raced, updating instead");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.store
            .update_matching(&key, &BindingUpdate::heartbeat(now))?;
        debug!(%instance, %cluster, now, "heartbeat");
        Ok(())
    }

    /// Refresh the heartbeat of every binding owned by `instance`.
    ///
    /// An instance with no bindings yet is a silent no-op. Returns the
    /// number of bindings refreshed.
    pub fn heartbeat(&self, instance: &str) -> MembershipResult<u64> {
        let now = self.now_secs();
        let refreshed = self.store.update_matching(
            &BindingFilter::instance(instance),
            &BindingUpdate::heartbeat(now),
        )?;
        debug!(%instance, refreshed, now, "heartbeat");
        Ok(refreshed)
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Bindings matching `filter`, ordered by instance.
    pub fn list_bindings(&self, filter: &BindingFilter) -> MembershipResult<Vec<Binding>> {
        Ok(self.store.query(filter)?)
    }

    /// First binding (in instance order) matching `filter`.
    pub fn get_binding(&self, filter: &BindingFilter) -> MembershipResult<Option<Binding>> {
        Ok(self.store.query(filter)?.into_iter().next())
    }

    /// Distinct instances matching `filter`, ascending.
    pub fn list_instances(&self, filter: &BindingFilter) -> MembershipResult<Vec<String>> {
        let instances = self.store.distinct_field(BindingField::Instance, filter)?;
        Ok(instances.into_iter().collect())
    }

    /// Distinct clusters matching `filter`, ascending.
    pub fn list_clusters(&self, filter: &BindingFilter) -> MembershipResult<Vec<String>> {
        let clusters = self.store.distinct_field(BindingField::Cluster, filter)?;
        Ok(clusters.into_iter().collect())
    }

    /// Clusters `instance` is bound to; empty if it has no bindings.
    pub fn clusters_for_instance(&self, instance: &str) -> MembershipResult<Vec<String>> {
        let bindings = self.store.query(&BindingFilter::instance(instance))?;
        Ok(bindings.into_iter().map(|b| b.cluster).collect())
    }

    /// Bindings matching `filter` classified against `stale_after`.
    ///
    /// Staleness is only reported; stale bindings stay in the registry until
    /// an operator deregisters them.
    pub fn liveness(
        &self,
        filter: &BindingFilter,
        stale_after: Duration,
    ) -> MembershipResult<Vec<BindingLiveness>> {
        let now = self.now_secs();
        let threshold = i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX);
        let bindings = self.store.query(filter)?;

        Ok(bindings
            .into_iter()
            .map(|binding| {
                let staleness_secs = binding.staleness_secs(now);
                BindingLiveness {
                    alive: staleness_secs <= threshold,
                    staleness_secs,
                    binding,
                }
            })
            .collect())
    }
}

fn duplicate(instance: &str, cluster: &str) -> MembershipError {
    MembershipError::DuplicateAssignment {
        instance: instance.to_string(),
        cluster: cluster.to_string(),
    }
}
