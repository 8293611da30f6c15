//! The cluster: topology snapshots and server selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::monitor::{MonitorHandle, spawn_monitor};
use crate::selector::ServerSelector;
use crate::server::{HealthProbe, ServerDescription, ServerEndpoint};

/// An immutable snapshot of the topology.
///
/// Snapshots are replaced atomically on every observed change and never
/// mutated in place; a reader always sees a consistent view.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterDescription {
    /// The servers, one description each.
    pub servers: Vec<ServerDescription>,
    /// Monotonic change counter.
    pub version: u64,
}

impl ClusterDescription {
    /// Find one server's description.
    pub fn server(&self, endpoint: &ServerEndpoint) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| &s.endpoint == endpoint)
    }

    /// The servers currently available for operations.
    pub fn available(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.iter().filter(|s| s.is_available())
    }
}

pub(crate) struct ClusterShared {
    description: RwLock<Arc<ClusterDescription>>,
    version: AtomicU64,
    changes: watch::Sender<u64>,
}

impl ClusterShared {
    pub(crate) fn update(&self, server: ServerDescription) {
        let mut guard = self.description.write();
        let mut next = (**guard).clone();
        match next
            .servers
            .iter_mut()
            .find(|s| s.endpoint == server.endpoint)
        {
            Some(slot) => {
                if slot.state != server.state || slot.server_type != server.server_type {
                    info!(
                        endpoint = %server.endpoint,
                        from = ?slot.state,
                        to = ?server.state,
                        server_type = ?server.server_type,
                        "server description changed"
                    );
                }
                *slot = server;
            }
            None => next.servers.push(server),
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        next.version = version;
        *guard = Arc::new(next);
        drop(guard);
        let _ = self.changes.send(version);
    }

    fn remove(&self, endpoint: &ServerEndpoint) {
        let mut guard = self.description.write();
        let mut next = (**guard).clone();
        next.servers.retain(|s| &s.endpoint != endpoint);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        next.version = version;
        *guard = Arc::new(next);
        drop(guard);
        let _ = self.changes.send(version);
    }
}

/// Tracks server descriptions via background heartbeats and selects
/// servers for operations.
pub struct Cluster {
    config: ClusterConfig,
    probe: Arc<dyn HealthProbe>,
    shared: Arc<ClusterShared>,
    monitors: Mutex<HashMap<ServerEndpoint, MonitorHandle>>,
    changes: watch::Receiver<u64>,
}

impl Cluster {
    /// Create a cluster and start monitoring the seed endpoints.
    pub fn new(
        config: ClusterConfig,
        probe: Arc<dyn HealthProbe>,
        endpoints: Vec<ServerEndpoint>,
    ) -> Self {
        let initial = ClusterDescription {
            servers: endpoints
                .iter()
                .cloned()
                .map(ServerDescription::unknown)
                .collect(),
            version: 0,
        };
        let (changes_tx, changes_rx) = watch::channel(0);
        let shared = Arc::new(ClusterShared {
            description: RwLock::new(Arc::new(initial)),
            version: AtomicU64::new(0),
            changes: changes_tx,
        });

        let cluster = Self {
            config,
            probe,
            shared,
            monitors: Mutex::new(HashMap::new()),
            changes: changes_rx,
        };
        for endpoint in endpoints {
            cluster.start_monitor(endpoint);
        }
        cluster
    }

    /// The current topology snapshot.
    pub fn description(&self) -> Arc<ClusterDescription> {
        self.shared.description.read().clone()
    }

    /// The snapshot as diagnostic JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&*self.description()).unwrap_or_default()
    }

    /// A receiver notified on every topology change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    /// Start monitoring an additional server.
    pub fn add_server(&self, endpoint: ServerEndpoint) {
        self.shared
            .update(ServerDescription::unknown(endpoint.clone()));
        self.start_monitor(endpoint);
    }

    /// Stop monitoring a server and drop it from the topology.
    pub fn remove_server(&self, endpoint: &ServerEndpoint) {
        if let Some(handle) = self.monitors.lock().remove(endpoint) {
            handle.abort();
        }
        self.shared.remove(endpoint);
        info!(endpoint = %endpoint, "server removed from topology");
    }

    /// Ask a server's monitor (or all monitors) to heartbeat sooner than
    /// scheduled.
    pub fn request_heartbeat(&self, endpoint: Option<&ServerEndpoint>) {
        let monitors = self.monitors.lock();
        match endpoint {
            Some(endpoint) => {
                if let Some(handle) = monitors.get(endpoint) {
                    handle.request_heartbeat();
                }
            }
            None => {
                for handle in monitors.values() {
                    handle.request_heartbeat();
                }
            }
        }
    }

    /// Select a server matching the selector, waiting for topology changes
    /// until one qualifies or the selection timeout elapses.
    ///
    /// The first survivor of the selector chain is chosen; selectors that
    /// care about tie-breaking order their output. A selection timeout is
    /// a distinct failure from any connectivity error.
    pub async fn select_server(
        &self,
        selector: &dyn ServerSelector,
    ) -> ClusterResult<ServerDescription> {
        let timeout = self.config.selection_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut changes = self.changes.clone();

        loop {
            let snapshot = self.description();
            let candidates: Vec<&ServerDescription> = snapshot.servers.iter().collect();
            if let Some(chosen) = selector.select(candidates).first() {
                debug!(
                    endpoint = %chosen.endpoint,
                    selector = %selector.describe(),
                    "server selected"
                );
                return Ok((*chosen).clone());
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ClusterError::SelectionTimeout(timeout));
            }
            match tokio::time::timeout(remaining, changes.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(ClusterError::invalid_state(
                        "cluster change notifications closed",
                    ));
                }
                Err(_) => return Err(ClusterError::SelectionTimeout(timeout)),
            }
        }
    }

    /// Stop all monitors and wait for them to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<MonitorHandle> = {
            let mut monitors = self.monitors.lock();
            monitors.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown().await;
        }
        info!("cluster monitors stopped");
    }

    fn start_monitor(&self, endpoint: ServerEndpoint) {
        let handle = spawn_monitor(
            self.shared.clone(),
            endpoint.clone(),
            self.probe.clone(),
            self.config.clone(),
        );
        self.monitors.lock().insert(endpoint, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{ReadPreference, ReadPreferenceSelector, WritableSelector};
    use crate::server::{ServerState, ServerType};
    use crate::testing::{MapProbe, ScriptedProbe};
    use std::time::Duration;

    fn fast_config() -> ClusterConfig {
        ClusterConfig::new()
            .heartbeat_interval(Duration::from_secs(10))
            .rapid_heartbeat_interval(Duration::from_millis(100))
            .selection_timeout(Duration::from_secs(30))
    }

    async fn wait_for(
        cluster: &Cluster,
        mut predicate: impl FnMut(&ClusterDescription) -> bool,
    ) {
        let mut changes = cluster.changes();
        loop {
            if predicate(&cluster.description()) {
                return;
            }
            changes.changed().await.expect("cluster alive");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_and_selection() {
        let probe = ScriptedProbe::new(vec![ScriptedProbe::healthy()]);
        let cluster = Cluster::new(
            fast_config(),
            probe,
            vec![ServerEndpoint::new("db1", 27017)],
        );

        let chosen = cluster.select_server(&WritableSelector).await.unwrap();
        assert_eq!(chosen.endpoint.host, "db1");
        assert_eq!(chosen.server_type, ServerType::Standalone);
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_marks_unknown_and_recovers_rapidly() {
        let probe = ScriptedProbe::new(vec![
            ScriptedProbe::healthy(),
            ScriptedProbe::down(),
            ScriptedProbe::healthy(),
        ]);
        let endpoint = ServerEndpoint::new("db1", 27017);
        let cluster = Cluster::new(fast_config(), probe.clone(), vec![endpoint.clone()]);

        wait_for(&cluster, |d| {
            d.server(&endpoint).is_some_and(ServerDescription::is_available)
        })
        .await;

        // the next heartbeat (after the steady-state interval) fails
        wait_for(&cluster, |d| {
            d.server(&endpoint)
                .is_some_and(|s| s.state == ServerState::Disconnected && s.last_error.is_some())
        })
        .await;
        let failed_at = tokio::time::Instant::now();

        // the rapid re-heartbeat rediscovers the server well before the
        // steady-state interval would have
        wait_for(&cluster, |d| {
            d.server(&endpoint).is_some_and(ServerDescription::is_available)
        })
        .await;
        let recovered_in = tokio::time::Instant::now() - failed_at;
        assert!(
            recovered_in < Duration::from_secs(1),
            "recovered in {recovered_in:?}, expected the rapid interval"
        );
        assert!(probe.checks() >= 3);
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_timeout_is_distinct_failure() {
        let probe = ScriptedProbe::new(vec![ScriptedProbe::down()]);
        let cluster = Cluster::new(
            fast_config().selection_timeout(Duration::from_secs(1)),
            probe,
            vec![ServerEndpoint::new("db1", 27017)],
        );

        let err = cluster.select_server(&WritableSelector).await.unwrap_err();
        assert!(err.is_selection_timeout());
        assert!(!err.is_connectivity_error());
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_unblocks_on_topology_change() {
        // down twice, then healthy: selection should wait it out
        let probe = ScriptedProbe::new(vec![
            ScriptedProbe::down(),
            ScriptedProbe::down(),
            ScriptedProbe::primary(),
        ]);
        let cluster = Cluster::new(
            fast_config(),
            probe,
            vec![ServerEndpoint::new("db1", 27017)],
        );

        let chosen = cluster.select_server(&WritableSelector).await.unwrap();
        assert_eq!(chosen.server_type, ServerType::Primary);
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_preference_routes_to_secondary() {
        let probe = MapProbe::new([
            ("a", ScriptedProbe::primary()),
            (
                "b",
                Ok(crate::server::HeartbeatReply {
                    server_type: ServerType::Secondary,
                    latency: Duration::from_millis(1),
                }),
            ),
        ]);
        let cluster = Cluster::new(
            fast_config(),
            probe,
            vec![
                ServerEndpoint::new("a", 27017),
                ServerEndpoint::new("b", 27017),
            ],
        );

        let selector = ReadPreferenceSelector::new(ReadPreference::Secondary);
        let chosen = cluster.select_server(&selector).await.unwrap();
        assert_eq!(chosen.endpoint.host, "b");
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_server_drops_description() {
        let probe = ScriptedProbe::new(vec![ScriptedProbe::healthy()]);
        let a = ServerEndpoint::new("a", 27017);
        let b = ServerEndpoint::new("b", 27017);
        let cluster = Cluster::new(fast_config(), probe, vec![a.clone(), b.clone()]);

        wait_for(&cluster, |d| d.available().count() == 2).await;
        cluster.remove_server(&b);
        wait_for(&cluster, |d| d.server(&b).is_none()).await;
        assert!(cluster.description().server(&a).is_some());
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_are_immutable() {
        let probe = ScriptedProbe::new(vec![ScriptedProbe::healthy()]);
        let endpoint = ServerEndpoint::new("db1", 27017);
        let cluster = Cluster::new(fast_config(), probe, vec![endpoint.clone()]);

        let before = cluster.description();
        wait_for(&cluster, |d| {
            d.server(&endpoint).is_some_and(ServerDescription::is_available)
        })
        .await;
        let after = cluster.description();

        // the earlier snapshot still shows the old state
        assert_ne!(before.version, after.version);
        assert!(!before.server(&endpoint).unwrap().is_available());
        cluster.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_heartbeat_wakes_monitor_early() {
        let probe = ScriptedProbe::new(vec![ScriptedProbe::healthy()]);
        let endpoint = ServerEndpoint::new("db1", 27017);
        let cluster = Cluster::new(fast_config(), probe.clone(), vec![endpoint.clone()]);

        wait_for(&cluster, |d| {
            d.server(&endpoint).is_some_and(ServerDescription::is_available)
        })
        .await;
        let checks_before = probe.checks();

        cluster.request_heartbeat(Some(&endpoint));
        wait_for(&cluster, |d| d.version >= 3).await;
        assert!(probe.checks() > checks_before);
        cluster.shutdown().await;
    }
}
