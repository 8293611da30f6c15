//! Composable server selectors.
//!
//! A selector filters (and may reorder) the qualifying servers of a
//! topology snapshot. Selectors compose with [`ServerSelector::and`]:
//! each stage sees the previous stage's survivors. Selection ultimately
//! picks the first survivor, so a selector that cares about tie-breaking
//! expresses it by ordering its output (the latency selector orders by
//! measured latency; compose your own selector for a different rule).

use std::time::Duration;

use crate::server::{ServerDescription, ServerEndpoint, ServerType};

/// Filters the servers an operation may be routed to.
pub trait ServerSelector: Send + Sync {
    /// Keep the qualifying servers, in preference order.
    fn select<'a>(&self, candidates: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription>;

    /// A short description for logging.
    fn describe(&self) -> String;

    /// Chain another selector after this one.
    fn and<S: ServerSelector + Sized>(self, next: S) -> CompositeSelector<Self, S>
    where
        Self: Sized,
    {
        CompositeSelector { first: self, next }
    }
}

/// Two selectors applied in sequence.
pub struct CompositeSelector<A, B> {
    first: A,
    next: B,
}

impl<A: ServerSelector, B: ServerSelector> ServerSelector for CompositeSelector<A, B> {
    fn select<'a>(&self, candidates: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        self.next.select(self.first.select(candidates))
    }

    fn describe(&self) -> String {
        format!("{} and {}", self.first.describe(), self.next.describe())
    }
}

/// Keeps servers that accept writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritableSelector;

impl ServerSelector for WritableSelector {
    fn select<'a>(&self, candidates: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        candidates
            .into_iter()
            .filter(|s| s.is_available() && s.server_type.is_writable())
            .collect()
    }

    fn describe(&self) -> String {
        "writable".to_string()
    }
}

/// Read routing preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    /// The primary only.
    Primary,
    /// Secondaries only.
    Secondary,
    /// The primary if available, otherwise any secondary.
    PrimaryPreferred,
    /// Any secondary if available, otherwise the primary.
    SecondaryPreferred,
    /// Any readable server, nearest first.
    Nearest,
}

/// Keeps servers matching a read preference.
#[derive(Debug, Clone, Copy)]
pub struct ReadPreferenceSelector {
    /// The preference to match.
    pub mode: ReadPreference,
}

impl ReadPreferenceSelector {
    /// Create a selector for a read preference.
    pub fn new(mode: ReadPreference) -> Self {
        Self { mode }
    }
}

impl ServerSelector for ReadPreferenceSelector {
    fn select<'a>(&self, candidates: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        let available: Vec<_> = candidates.into_iter().filter(|s| s.is_available()).collect();
        let of_type = |ty: ServerType| -> Vec<&'a ServerDescription> {
            available
                .iter()
                .copied()
                .filter(|s| s.server_type == ty || s.server_type == ServerType::Standalone)
                .collect()
        };
        match self.mode {
            ReadPreference::Primary => of_type(ServerType::Primary),
            ReadPreference::Secondary => of_type(ServerType::Secondary),
            ReadPreference::PrimaryPreferred => {
                let primaries = of_type(ServerType::Primary);
                if primaries.is_empty() {
                    of_type(ServerType::Secondary)
                } else {
                    primaries
                }
            }
            ReadPreference::SecondaryPreferred => {
                let secondaries = of_type(ServerType::Secondary);
                if secondaries.is_empty() {
                    of_type(ServerType::Primary)
                } else {
                    secondaries
                }
            }
            ReadPreference::Nearest => {
                let mut readable: Vec<_> = available
                    .into_iter()
                    .filter(|s| s.server_type.is_readable())
                    .collect();
                readable.sort_by_key(|s| s.latency.unwrap_or(Duration::MAX));
                readable
            }
        }
    }

    fn describe(&self) -> String {
        format!("read preference {:?}", self.mode)
    }
}

/// Keeps the server at one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointSelector {
    /// The endpoint to match.
    pub endpoint: ServerEndpoint,
}

impl EndpointSelector {
    /// Create a selector for one endpoint.
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self { endpoint }
    }
}

impl ServerSelector for EndpointSelector {
    fn select<'a>(&self, candidates: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        candidates
            .into_iter()
            .filter(|s| s.endpoint == self.endpoint)
            .collect()
    }

    fn describe(&self) -> String {
        format!("endpoint {}", self.endpoint)
    }
}

/// Keeps servers within a latency window of the fastest candidate, fastest
/// first. Ties inside the window keep their incoming order.
#[derive(Debug, Clone, Copy)]
pub struct LatencySelector {
    /// Allowed distance from the fastest candidate's latency.
    pub window: Duration,
}

impl LatencySelector {
    /// Create a selector with a latency window.
    pub fn new(window: Duration) -> Self {
        Self { window }
    }
}

impl ServerSelector for LatencySelector {
    fn select<'a>(&self, candidates: Vec<&'a ServerDescription>) -> Vec<&'a ServerDescription> {
        let mut measured: Vec<_> = candidates
            .into_iter()
            .filter(|s| s.latency.is_some())
            .collect();
        let Some(fastest) = measured.iter().filter_map(|s| s.latency).min() else {
            return Vec::new();
        };
        measured.retain(|s| {
            s.latency
                .is_some_and(|latency| latency <= fastest + self.window)
        });
        measured.sort_by_key(|s| s.latency);
        measured
    }

    fn describe(&self) -> String {
        format!("within {:?} of the fastest server", self.window)
    }
}
