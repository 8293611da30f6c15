//! Test doubles shared by the crate's tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::channel::{ChannelError, ChannelFactory, WireChannel};
use crate::credential::{Credential, CredentialProvider};
use crate::error::{ClusterError, ClusterResult};
use crate::server::{HealthProbe, HeartbeatReply, ServerEndpoint, ServerType};

/// A channel that answers every request with an empty response, or fails
/// every call with an i/o error.
#[derive(Debug, Default)]
pub struct NullChannel {
    fail: bool,
}

impl NullChannel {
    /// A channel whose every call fails with a connectivity error.
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl WireChannel for NullChannel {
    async fn send(&mut self, _request: &[u8]) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Io("connection reset".into()));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        if self.fail {
            return Err(ChannelError::Io("connection reset".into()));
        }
        Ok(Vec::new())
    }

    async fn close(&mut self) {}
}

/// A factory producing [`NullChannel`]s, counting how many were opened.
#[derive(Default)]
pub struct RecordingFactory {
    opened: AtomicUsize,
}

impl RecordingFactory {
    /// How many channels were opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelFactory for RecordingFactory {
    async fn connect(
        &self,
        _endpoint: &ServerEndpoint,
    ) -> Result<Box<dyn WireChannel>, ChannelError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NullChannel::default()))
    }
}

/// A provider that accepts or rejects every authentication, counting the
/// exchanges it performed.
pub struct StaticProvider {
    reject_with: Option<String>,
    exchanges: AtomicUsize,
}

impl StaticProvider {
    /// A provider that accepts everything.
    pub fn accepting() -> Self {
        Self {
            reject_with: None,
            exchanges: AtomicUsize::new(0),
        }
    }

    /// A provider that rejects everything with a message.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reject_with: Some(message.into()),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// How many authentication exchanges ran.
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    async fn authenticate(
        &self,
        _channel: &mut dyn WireChannel,
        database: &str,
        _credential: &Credential,
    ) -> ClusterResult<()> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        match &self.reject_with {
            Some(message) => Err(ClusterError::authentication(database, message.clone())),
            None => Ok(()),
        }
    }
}

/// A provider whose authentication exchange never completes, for
/// cancellation tests.
pub struct HangingProvider;

#[async_trait]
impl CredentialProvider for HangingProvider {
    async fn authenticate(
        &self,
        _channel: &mut dyn WireChannel,
        _database: &str,
        _credential: &Credential,
    ) -> ClusterResult<()> {
        futures::future::pending::<()>().await;
        unreachable!("pending future resolved")
    }
}

/// A probe that replays a scripted sequence of heartbeat outcomes, then
/// repeats the last one. Records the number of checks performed.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Result<HeartbeatReply, ChannelError>>>,
    last: Mutex<Result<HeartbeatReply, ChannelError>>,
    checks: AtomicUsize,
}

impl ScriptedProbe {
    /// A probe replaying the given outcomes.
    pub fn new(outcomes: Vec<Result<HeartbeatReply, ChannelError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            last: Mutex::new(Err(ChannelError::Io("no script".into()))),
            checks: AtomicUsize::new(0),
        })
    }

    /// A healthy standalone reply.
    pub fn healthy() -> Result<HeartbeatReply, ChannelError> {
        Ok(HeartbeatReply {
            server_type: ServerType::Standalone,
            latency: Duration::from_millis(1),
        })
    }

    /// A primary reply.
    pub fn primary() -> Result<HeartbeatReply, ChannelError> {
        Ok(HeartbeatReply {
            server_type: ServerType::Primary,
            latency: Duration::from_millis(1),
        })
    }

    /// A connectivity failure.
    pub fn down() -> Result<HeartbeatReply, ChannelError> {
        Err(ChannelError::Io("connection refused".into()))
    }

    /// How many checks have run.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, _endpoint: &ServerEndpoint) -> Result<HeartbeatReply, ChannelError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock();
        match script.pop_front() {
            Some(outcome) => {
                *self.last.lock() = outcome.clone();
                outcome
            }
            None => self.last.lock().clone(),
        }
    }
}

/// A probe answering per host name, for multi-server topologies.
pub struct MapProbe {
    replies: Mutex<std::collections::HashMap<String, Result<HeartbeatReply, ChannelError>>>,
}

impl MapProbe {
    /// A probe with a fixed reply per host.
    pub fn new<const N: usize>(
        replies: [(&str, Result<HeartbeatReply, ChannelError>); N],
    ) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|(host, reply)| (host.to_string(), reply))
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl HealthProbe for MapProbe {
    async fn check(&self, endpoint: &ServerEndpoint) -> Result<HeartbeatReply, ChannelError> {
        self.replies
            .lock()
            .get(&endpoint.host)
            .cloned()
            .unwrap_or_else(|| Err(ChannelError::Io("no scripted reply".into())))
    }
}
