//! Per-server heartbeat monitors.
//!
//! One background task per server drives its description through
//! `Disconnected → Connecting → Connected`. A failed heartbeat marks the
//! server unreachable and accelerates the next check to the rapid
//! interval. Because each server has exactly one monitor task, a
//! heartbeat already in flight can never overlap with another: an early
//! wake-up request arriving mid-check is remembered and honored once the
//! current check finishes.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cluster::ClusterShared;
use crate::config::ClusterConfig;
use crate::server::{HealthProbe, ServerDescription, ServerEndpoint};

pub(crate) struct MonitorHandle {
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the monitor to heartbeat sooner than scheduled.
    pub(crate) fn request_heartbeat(&self) {
        self.wake.notify_one();
    }

    /// Stop the monitor and wait for its task to finish.
    pub(crate) async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }

    /// Stop the monitor without waiting.
    pub(crate) fn abort(self) {
        self.shutdown.notify_one();
    }
}

pub(crate) fn spawn_monitor(
    shared: Arc<ClusterShared>,
    endpoint: ServerEndpoint,
    probe: Arc<dyn HealthProbe>,
    config: ClusterConfig,
) -> MonitorHandle {
    let wake = Arc::new(Notify::new());
    let shutdown = Arc::new(Notify::new());
    let task = tokio::spawn(run(
        shared,
        endpoint,
        probe,
        config,
        wake.clone(),
        shutdown.clone(),
    ));
    MonitorHandle {
        wake,
        shutdown,
        task,
    }
}

async fn run(
    shared: Arc<ClusterShared>,
    endpoint: ServerEndpoint,
    probe: Arc<dyn HealthProbe>,
    config: ClusterConfig,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    shared.update(ServerDescription::connecting(endpoint.clone()));
    loop {
        let (description, delay) = match probe.check(&endpoint).await {
            Ok(reply) => {
                debug!(
                    endpoint = %endpoint,
                    server_type = ?reply.server_type,
                    latency = ?reply.latency,
                    "heartbeat succeeded"
                );
                (
                    ServerDescription::connected(endpoint.clone(), reply.server_type, reply.latency),
                    config.heartbeat_interval,
                )
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "heartbeat failed, scheduling rapid re-check");
                (
                    ServerDescription::unreachable(endpoint.clone(), err.to_string()),
                    config.rapid_heartbeat_interval,
                )
            }
        };
        shared.update(description);

        tokio::select! {
            _ = shutdown.notified() => break,
            _ = wake.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!(endpoint = %endpoint, "server monitor stopped");
}
