//! Per-connection teardown signal and the registry of live connections.

use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use metrics::gauge;
use perch_core::ConnectionId;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

use crate::metrics::CONNECTIONS;

/// Why a connection was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownReason {
    /// Reading from or writing to the transport failed.
    Transport,
    /// A frame was not a JSON object.
    Decode,
    /// A message arrived without a usable `id`.
    MissingCorrelationId,
    /// The peer closed the connection.
    Closed,
    /// Process-wide shutdown, or an external kill.
    Shutdown,
    /// The broker stopped accepting requests.
    BrokerClosed,
}

impl TeardownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::MissingCorrelationId => "missing_correlation_id",
            Self::Closed => "closed",
            Self::Shutdown => "shutdown",
            Self::BrokerClosed => "broker_closed",
        }
    }
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use, idempotent teardown signal for one connection.
///
/// The token is a child of the process shutdown token, so shutdown tears down
/// every connection. The first recorded reason wins; later `fire` calls only
/// re-cancel the (already cancelled) token.
#[derive(Clone, Debug)]
pub struct Teardown {
    token: CancellationToken,
    reason: Arc<OnceLock<TeardownReason>>,
}

impl Teardown {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Signal teardown. Returns `true` if this call recorded the reason.
    pub fn fire(&self, reason: TeardownReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded reason. A token cancelled through its parent without an
    /// explicit `fire` reports [`TeardownReason::Shutdown`].
    pub fn reason(&self) -> Option<TeardownReason> {
        match self.reason.get() {
            Some(reason) => Some(*reason),
            None if self.token.is_cancelled() => Some(TeardownReason::Shutdown),
            None => None,
        }
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Live connections, keyed by id, with their teardown signals.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Teardown>,
    shutdown: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            connections: DashMap::new(),
            shutdown,
        }
    }

    /// Register a new connection and return its id and teardown signal.
    pub fn register(&self) -> (ConnectionId, Teardown) {
        let id = ConnectionId::new();
        let teardown = Teardown::new(&self.shutdown);
        let _ = self.connections.insert(id.clone(), teardown.clone());
        gauge!(CONNECTIONS).increment(1.0);
        (id, teardown)
    }

    /// Forget a connection. Safe to call more than once.
    pub fn unregister(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            gauge!(CONNECTIONS).decrement(1.0);
            debug!(connection_id = %id, "connection unregistered");
        }
    }

    /// Tear down one connection from outside its translator.
    ///
    /// Returns `false` if the id is unknown.
    pub fn teardown(&self, id: &ConnectionId, reason: TeardownReason) -> bool {
        match self.connections.get(id) {
            Some(entry) => {
                let _ = entry.value().fire(reason);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }
}
