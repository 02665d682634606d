//! Per-endpoint lifecycle status, readable by health probes.

use crate::config::EndpointId;
use dashmap::DashMap;
use std::fmt;
use tokio::sync::broadcast;

/// Label reported for an endpoint with no recorded status.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Loading,
    /// Every bootstrap step succeeded. Reported as `"OK"`.
    Ready,
    /// Bootstrap finished but at least one step failed or timed out.
    Degraded(String),
    /// Bootstrap could not run (no connection, unreachable, panicked).
    Failed(String),
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Loading => "Loading",
            Status::Ready => "OK",
            Status::Degraded(_) => "Degraded",
            Status::Failed(_) => "Failed",
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Status::Degraded(cause) | Status::Failed(cause) => Some(cause),
            Status::Loading | Status::Ready => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Loading)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause() {
            Some(cause) => write!(f, "{} ({})", self.as_str(), cause),
            None => f.write_str(self.as_str()),
        }
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub endpoint: EndpointId,
    pub status: Status,
}

/// Concurrent map of endpoint id to current status. Last write wins per id.
#[derive(Debug)]
pub struct StatusRegistry {
    statuses: DashMap<EndpointId, Status>,
    events: broadcast::Sender<StatusChange>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            statuses: DashMap::new(),
            events,
        }
    }

    /// Store `status` and notify subscribers. The map is updated before the event is sent.
    pub fn set(&self, endpoint: EndpointId, status: Status) {
        self.statuses.insert(endpoint, status.clone());
        let _ = self.events.send(StatusChange { endpoint, status });
    }

    pub fn get(&self, endpoint: EndpointId) -> Option<Status> {
        self.statuses.get(&endpoint).map(|s| s.value().clone())
    }

    /// Wire label for `endpoint`, or [UNKNOWN].
    pub fn label(&self, endpoint: EndpointId) -> &'static str {
        self.statuses
            .get(&endpoint)
            .map(|s| s.as_str())
            .unwrap_or(UNKNOWN)
    }

    /// All statuses, ascending by id.
    pub fn snapshot(&self) -> Vec<(EndpointId, Status)> {
        let mut all: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Transitions recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }
}
