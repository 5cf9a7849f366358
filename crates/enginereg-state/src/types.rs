//! Domain types for the binding store.
//!
//! A [`Binding`] ties one worker instance to one reader-cluster and carries
//! the time of its latest heartbeat. Queries are expressed with the typed
//! [`BindingFilter`] rather than free-form predicates.

use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a binding.
pub type BindingId = u64;

// ── Binding ───────────────────────────────────────────────────────

/// A persisted `(instance, cluster, last_heartbeat)` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    pub id: BindingId,
    /// Worker identity, usually `host:port`.
    pub instance: String,
    /// Reader-cluster this instance works against.
    pub cluster: String,
    /// Unix timestamp (seconds) of the latest heartbeat.
    pub last_heartbeat: i64,
}

impl Binding {
    /// Seconds elapsed since the last heartbeat, as seen at `now`.
    pub fn staleness_secs(&self, now: i64) -> i64 {
        now - self.last_heartbeat
    }
}

/// A binding that has not been stored yet (no id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBinding {
    pub instance: String,
    pub cluster: String,
    pub last_heartbeat: i64,
}

impl NewBinding {
    pub fn new(instance: &str, cluster: &str, last_heartbeat: i64) -> Self {
        Self {
            instance: instance.to_string(),
            cluster: cluster.to_string(),
            last_heartbeat,
        }
    }
}

// ── Updates ───────────────────────────────────────────────────────

/// Partial update of a binding's mutable fields. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingUpdate {
    pub cluster: Option<String>,
    /// Applied only if newer than the stored value.
    pub last_heartbeat: Option<i64>,
}

impl BindingUpdate {
    /// Move the binding to another cluster.
    pub fn cluster(cluster: &str) -> Self {
        Self {
            cluster: Some(cluster.to_string()),
            last_heartbeat: None,
        }
    }

    /// Refresh the heartbeat timestamp.
    pub fn heartbeat(at: i64) -> Self {
        Self {
            cluster: None,
            last_heartbeat: Some(at),
        }
    }

    /// Apply to `binding`; returns true if anything changed.
    pub fn apply(&self, binding: &mut Binding) -> bool {
        let mut changed = false;
        if let Some(cluster) = &self.cluster {
            if binding.cluster != *cluster {
                binding.cluster = cluster.clone();
                changed = true;
            }
        }
        if let Some(at) = self.last_heartbeat {
            if at > binding.last_heartbeat {
                binding.last_heartbeat = at;
                changed = true;
            }
        }
        changed
    }
}

// ── Queries ───────────────────────────────────────────────────────

/// Column that can be projected with `distinct_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingField {
    Instance,
    Cluster,
}

impl BindingField {
    pub fn value<'a>(&self, binding: &'a Binding) -> &'a str {
        match self {
            BindingField::Instance => &binding.instance,
            BindingField::Cluster => &binding.cluster,
        }
    }
}

/// Typed query over bindings. All set criteria must hold; the default
/// filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingFilter {
    pub instance: Option<String>,
    pub cluster: Option<String>,
    /// Restrict to these ids. An empty set matches nothing.
    pub ids: Option<Vec<BindingId>>,
    /// Skip this id (used when checking a row against its peers).
    pub exclude_id: Option<BindingId>,
}

impl BindingFilter {
    /// Match every binding.
    pub fn all() -> Self {
        Self::default()
    }

    /// Bindings owned by `instance`.
    pub fn instance(instance: &str) -> Self {
        Self {
            instance: Some(instance.to_string()),
            ..Self::default()
        }
    }

    /// Bindings assigned to `cluster`.
    pub fn cluster(cluster: &str) -> Self {
        Self {
            cluster: Some(cluster.to_string()),
            ..Self::default()
        }
    }

    /// The binding with natural key `(instance, cluster)`, if any.
    pub fn pair(instance: &str, cluster: &str) -> Self {
        Self {
            instance: Some(instance.to_string()),
            cluster: Some(cluster.to_string()),
            ..Self::default()
        }
    }

    pub fn ids(ids: &[BindingId]) -> Self {
        Self {
            ids: Some(ids.to_vec()),
            ..Self::default()
        }
    }

    pub fn excluding(mut self, id: BindingId) -> Self {
        self.exclude_id = Some(id);
        self
    }

    /// If the filter pins down exactly one natural key, return it.
    pub fn as_pair(&self) -> Option<(&str, &str)> {
        match (&self.instance, &self.cluster, &self.ids) {
            (Some(instance), Some(cluster), None) => Some((instance.as_str(), cluster.as_str())),
            _ => None,
        }
    }

    pub fn matches(&self, binding: &Binding) -> bool {
        if self.exclude_id == Some(binding.id) {
            return false;
        }
        if let Some(instance) = &self.instance {
            if binding.instance != *instance {
                return false;
            }
        }
        if let Some(cluster) = &self.cluster {
            if binding.cluster != *cluster {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&binding.id) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(id: BindingId, instance: &str, cluster: &str) -> Binding {
        Binding {
            id,
            instance: instance.to_string(),
            cluster: cluster.to_string(),
            last_heartbeat: 1000,
        }
    }

    #[test]
    fn default_filter_matches_everything() {
        assert!(BindingFilter::all().matches(&binding(1, "a:1", "Default")));
    }

    #[test]
    fn pair_filter_requires_both_fields() {
        let filter = BindingFilter::pair("a:1", "Default");
        assert!(filter.matches(&binding(1, "a:1", "Default")));
        assert!(!filter.matches(&binding(2, "a:1", "Prod")));
        assert!(!filter.matches(&binding(3, "b:1", "Default")));
        assert_eq!(filter.as_pair(), Some(("a:1", "Default")));
    }

    #[test]
    fn excluded_id_never_matches() {
        let filter = BindingFilter::pair("a:1", "Default").excluding(1);
        assert!(!filter.matches(&binding(1, "a:1", "Default")));
        assert!(filter.matches(&binding(2, "a:1", "Default")));
    }

    #[test]
    fn empty_id_set_matches_nothing() {
        let filter = BindingFilter::ids(&[]);
        assert!(!filter.matches(&binding(1, "a:1", "Default")));
        assert!(filter.as_pair().is_none());
    }

    #[test]
    fn heartbeat_update_never_moves_backwards() {
        let mut b = binding(1, "a:1", "Default");
        assert!(!BindingUpdate::heartbeat(900).apply(&mut b));
        assert_eq!(b.last_heartbeat, 1000);

        assert!(BindingUpdate::heartbeat(1100).apply(&mut b));
        assert_eq!(b.last_heartbeat, 1100);
    }

    #[test]
    fn cluster_update_leaves_heartbeat() {
        let mut b = binding(1, "a:1", "Default");
        assert!(BindingUpdate::cluster("Prod").apply(&mut b));
        assert_eq!(b.cluster, "Prod");
        assert_eq!(b.last_heartbeat, 1000);
    }

    #[test]
    fn staleness_is_elapsed_seconds() {
        let b = binding(1, "a:1", "Default");
        assert_eq!(b.staleness_secs(1030), 30);
    }
}
