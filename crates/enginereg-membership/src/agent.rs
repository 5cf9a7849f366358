//! Heartbeat agent — worker-side liveness loop.
//!
//! A worker runs one agent for its own instance identity. Each tick
//! refreshes the configured cluster bindings (creating them on first
//! sight), or every existing binding of the instance when no clusters
//! are configured.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use enginereg_state::BindingStore;

use crate::membership::MembershipManager;

/// Shortest period between heartbeats; a zero interval is raised to this.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the heartbeat agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// This worker's identity, usually `host:port`.
    pub instance: String,
    /// Clusters to heartbeat explicitly. Empty means "all of mine".
    pub clusters: Vec<String>,
    pub interval: Duration,
}

/// Periodically heartbeats one instance through a shared manager.
pub struct HeartbeatAgent<S> {
    config: AgentConfig,
    membership: Arc<MembershipManager<S>>,
}

impl<S: BindingStore> HeartbeatAgent<S> {
    pub fn new(mut config: AgentConfig, membership: Arc<MembershipManager<S>>) -> Self {
        config.interval = config.interval.max(MIN_INTERVAL);
        Self { config, membership }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Send one round of heartbeats.
    ///
    /// Every configured cluster is attempted; the first failure is returned
    /// after the round completes.
    pub fn beat(&self) -> crate::MembershipResult<()> {
        let instance = &self.config.instance;
        if self.config.clusters.is_empty() {
            self.membership.heartbeat(instance)?;
            return Ok(());
        }

        let mut first_err = None;
        for cluster in &self.config.clusters {
            if let Err(e) = self.membership.heartbeat_with_cluster(instance, cluster) {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    warn!(%instance, %cluster, error = %e, "heartbeat failed");
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run the heartbeat loop until `shutdown` flips.
    ///
    /// The first heartbeat is sent immediately. Failed heartbeats are
    /// logged and retried on the next tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let instance = &self.config.instance;

        match self.membership.clusters_for_instance(instance) {
            Ok(clusters) => info!(%instance, ?clusters, "current cluster assignments"),
            Err(e) => warn!(%instance, error = %e, "failed to load cluster assignments"),
        }

        info!(%instance, interval = ?self.config.interval, "heartbeat loop started");
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.beat() {
                        Ok(()) => debug!(%instance, "heartbeat sent"),
                        Err(e) => warn!(%instance, error = %e, "heartbeat failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(%instance, "heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::clock::ManualClock;
    use enginereg_state::{
        Binding, BindingField, BindingFilter, BindingId, BindingUpdate, NewBinding, StateError,
        StateResult, StateStore,
    };

    /// Store that refuses to create bindings for one cluster.
    struct FailingStore {
        inner: StateStore,
        broken_cluster: &'static str,
    }

    impl BindingStore for FailingStore {
        fn insert(&self, binding: NewBinding) -> StateResult<Binding> {
            if binding.cluster == self.broken_cluster {
                return Err(StateError::Write(format!("cluster {} unavailable", binding.cluster)));
            }
            self.inner.insert(binding)
        }

        fn update_fields(&self, id: BindingId, update: &BindingUpdate) -> StateResult<Binding> {
            self.inner.update_fields(id, update)
        }

        fn update_matching(&self, filter: &BindingFilter, update: &BindingUpdate) -> StateResult<u64> {
            self.inner.update_matching(filter, update)
        }

        fn delete_by_ids(&self, ids: &[BindingId]) -> StateResult<u64> {
            self.inner.delete_by_ids(ids)
        }

        fn query(&self, filter: &BindingFilter) -> StateResult<Vec<Binding>> {
            self.inner.query(filter)
        }

        fn count(&self, filter: &BindingFilter) -> StateResult<u64> {
            self.inner.count(filter)
        }

        fn distinct_field(
            &self,
            field: BindingField,
            filter: &BindingFilter,
        ) -> StateResult<BTreeSet<String>> {
            self.inner.distinct_field(field, filter)
        }

        fn get(&self, id: BindingId) -> StateResult<Option<Binding>> {
            self.inner.get(id)
        }
    }

    fn test_membership(clock: &ManualClock) -> Arc<MembershipManager<StateStore>> {
        Arc::new(
            MembershipManager::new(StateStore::open_in_memory().unwrap())
                .with_clock(Arc::new(clock.clone())),
        )
    }

    fn config(clusters: &[&str]) -> AgentConfig {
        AgentConfig {
            instance: "n9e-1:19000".to_string(),
            clusters: clusters.iter().map(|c| c.to_string()).collect(),
            interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn beat_with_clusters_creates_bindings() {
        let clock = ManualClock::new(1000);
        let membership = test_membership(&clock);
        let agent = HeartbeatAgent::new(config(&["Default", "Prod"]), Arc::clone(&membership));

        agent.beat().unwrap();
        agent.beat().unwrap();

        assert_eq!(
            membership.clusters_for_instance("n9e-1:19000").unwrap(),
            vec!["Default", "Prod"]
        );
    }

    #[test]
    fn beat_without_clusters_only_refreshes() {
        let clock = ManualClock::new(1000);
        let membership = test_membership(&clock);
        let agent = HeartbeatAgent::new(config(&[]), Arc::clone(&membership));

        agent.beat().unwrap();
        assert!(membership.list_bindings(&BindingFilter::all()).unwrap().is_empty());

        membership.register("n9e-1:19000", "Default").unwrap();
        clock.advance(15);
        agent.beat().unwrap();

        let bindings = membership.list_bindings(&BindingFilter::all()).unwrap();
        assert_eq!(bindings[0].last_heartbeat, 1015);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let clock = ManualClock::new(1000);
        let membership = test_membership(&clock);
        let agent = HeartbeatAgent::new(config(&["Default"]), Arc::clone(&membership));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let bindings = membership.list_bindings(&BindingFilter::all()).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].cluster, "Default");
    }

    #[test]
    fn beat_attempts_every_cluster_after_a_failure() {
        let membership = Arc::new(
            MembershipManager::new(FailingStore {
                inner: StateStore::open_in_memory().unwrap(),
                broken_cluster: "Default",
            })
            .with_clock(Arc::new(ManualClock::new(1000))),
        );
        let agent = HeartbeatAgent::new(
            config(&["Default", "Prod", "Staging"]),
            Arc::clone(&membership),
        );

        let err = agent.beat().unwrap_err();
        assert!(err.to_string().contains("cluster Default unavailable"));
        assert_eq!(
            membership.clusters_for_instance("n9e-1:19000").unwrap(),
            vec!["Prod", "Staging"]
        );
    }

    #[test]
    fn zero_interval_is_raised_to_minimum() {
        let clock = ManualClock::new(1000);
        let mut cfg = config(&["Default"]);
        cfg.interval = Duration::ZERO;
        let agent = HeartbeatAgent::new(cfg, test_membership(&clock));
        assert_eq!(agent.interval(), MIN_INTERVAL);
    }

    #[tokio::test]
    async fn run_with_zero_interval_keeps_heartbeating() {
        let clock = ManualClock::new(1000);
        let membership = test_membership(&clock);
        let mut cfg = config(&["Default"]);
        cfg.interval = Duration::ZERO;
        let agent = HeartbeatAgent::new(cfg, Arc::clone(&membership));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let bindings = membership.list_bindings(&BindingFilter::all()).unwrap();
        assert_eq!(bindings.len(), 1);
    }
}
