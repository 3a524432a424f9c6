//! A resolved request and its one-shot reply handoff.

use std::fmt;
use std::sync::Arc;

use perch_core::{Command, ConnectionId, CorrelationId, Outcome, Payload, Reply};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::registry::CommandHandler;

/// A validated inbound message bound to its handler.
pub struct Request {
    pub connection_id: ConnectionId,
    pub id: CorrelationId,
    pub command: Command,
    pub handler: Arc<dyn CommandHandler>,
    pub payload: Payload,
    /// Past this instant the reply is a timeout error.
    pub deadline: Instant,
    pub reply: ReplySlot,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("connection_id", &self.connection_id)
            .field("id", &self.id)
            .field("command", &self.command)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Create a fresh slot/pending pair for one request.
pub fn reply_pair(id: CorrelationId) -> (ReplySlot, PendingReply) {
    let (tx, rx) = oneshot::channel();
    (ReplySlot { id, tx }, PendingReply { id, rx })
}

/// Write side: filled exactly once by the worker.
#[derive(Debug)]
pub struct ReplySlot {
    id: CorrelationId,
    tx: oneshot::Sender<Reply>,
}

impl ReplySlot {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Deliver the outcome. Returns `false` if the requester has gone away.
    pub fn fill(self, outcome: Outcome) -> bool {
        self.tx.send(Reply::new(self.id, outcome)).is_ok()
    }

    /// Whether the requester stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read side: awaited exactly once by the translator.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// `None` if the slot was dropped without being filled.
    pub async fn wait(self) -> Option<Reply> {
        self.rx.await.ok()
    }
}
