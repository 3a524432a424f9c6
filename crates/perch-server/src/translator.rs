//! Per-connection frame translator.
//!
//! Reads one frame, validates it, submits it to the broker, waits for the
//! reply, writes it, and only then reads the next frame. A connection never
//! has more than one request in flight, so replies on one connection come
//! back in request order.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use perch_core::{ConnectionId, CorrelationId, Envelope, Reply};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{BrokerHandle, SubmitError, BUSY_MESSAGE, INTERNAL_MESSAGE, TIMEOUT_MESSAGE};
use crate::connection::{Teardown, TeardownReason};
use crate::metrics::DROPPED_MESSAGES_TOTAL;
use crate::registry::HandlerRegistry;
use crate::request::{reply_pair, PendingReply, Request};

/// Extra time the translator waits past a request's deadline for the worker's
/// own timeout reply before synthesizing one.
const REPLY_GRACE: Duration = Duration::from_millis(250);

/// Failure reading the next inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("binary frame is not valid UTF-8")]
    InvalidUtf8,
}

enum Flow {
    Continue,
    Stop(TeardownReason),
}

/// One connection's decode/dispatch/reply loop.
pub struct Translator<R, W> {
    id: ConnectionId,
    reader: R,
    writer: W,
    registry: Arc<HandlerRegistry>,
    broker: BrokerHandle,
    teardown: Teardown,
}

impl<R, W> Translator<R, W>
where
    R: Stream<Item = Result<String, TransportError>> + Unpin,
    W: Sink<String> + Unpin,
    W::Error: Display,
{
    pub fn new(
        id: ConnectionId,
        reader: R,
        writer: W,
        registry: Arc<HandlerRegistry>,
        broker: BrokerHandle,
        teardown: Teardown,
    ) -> Self {
        Self {
            id,
            reader,
            writer,
            registry,
            broker,
            teardown,
        }
    }

    /// Run until teardown. Returns the reason that ended the connection.
    pub async fn run(mut self) -> TeardownReason {
        debug!(connection_id = %self.id, "translator started");
        loop {
            let next = tokio::select! {
                biased;
                () = self.teardown.cancelled() => break,
                next = self.reader.next() => next,
            };

            let flow = match next {
                None => Flow::Stop(TeardownReason::Closed),
                Some(Err(TransportError::InvalidUtf8)) => {
                    warn!(connection_id = %self.id, "undecodable binary frame");
                    Flow::Stop(TeardownReason::Decode)
                }
                Some(Err(e)) => {
                    warn!(connection_id = %self.id, error = %e, "transport read failed");
                    Flow::Stop(TeardownReason::Transport)
                }
                Some(Ok(frame)) => self.handle_frame(&frame).await,
            };

            if let Flow::Stop(reason) = flow {
                let _ = self.teardown.fire(reason);
                break;
            }
        }

        let _ = self.writer.close().await;
        let reason = self.teardown.reason().unwrap_or(TeardownReason::Shutdown);
        info!(connection_id = %self.id, reason = %reason, "connection closed");
        reason
    }

    async fn handle_frame(&mut self, frame: &str) -> Flow {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "frame decode failed");
                return Flow::Stop(TeardownReason::Decode);
            }
        };

        let Some(id) = envelope.id else {
            counter!(DROPPED_MESSAGES_TOTAL, "reason" => "missing_id").increment(1);
            warn!(connection_id = %self.id, command = ?envelope.command, "message without a valid id");
            return Flow::Stop(TeardownReason::MissingCorrelationId);
        };

        let Some(resolved) = envelope
            .command
            .as_deref()
            .and_then(|name| self.registry.resolve(name))
        else {
            counter!(DROPPED_MESSAGES_TOTAL, "reason" => "unknown_command").increment(1);
            warn!(connection_id = %self.id, id = %id, command = ?envelope.command, "no handler for command, dropping");
            return Flow::Continue;
        };

        debug!(connection_id = %self.id, id = %id, command = %resolved.command, "dispatching");
        let deadline = Instant::now() + self.broker.request_timeout();
        let (slot, pending) = reply_pair(id);
        let request = Request {
            connection_id: self.id.clone(),
            id,
            command: resolved.command,
            handler: resolved.handler,
            payload: envelope.payload,
            deadline,
            reply: slot,
        };

        let submitted = tokio::select! {
            biased;
            () = self.teardown.cancelled() => return Flow::Stop(TeardownReason::Shutdown),
            submitted = self.broker.submit(request) => submitted,
        };

        let reply = match submitted {
            Ok(()) => match self.await_reply(pending, deadline).await {
                Some(reply) => reply,
                None => return Flow::Stop(TeardownReason::Shutdown),
            },
            Err(SubmitError::Saturated) => {
                counter!(DROPPED_MESSAGES_TOTAL, "reason" => "busy").increment(1);
                warn!(connection_id = %self.id, id = %id, "intake full, refusing request");
                Reply::error(id, BUSY_MESSAGE)
            }
            Err(SubmitError::TimedOut) => {
                counter!(DROPPED_MESSAGES_TOTAL, "reason" => "intake_timeout").increment(1);
                warn!(connection_id = %self.id, id = %id, "deadline passed waiting for intake");
                Reply::error(id, TIMEOUT_MESSAGE)
            }
            Err(SubmitError::Closed) => return Flow::Stop(TeardownReason::BrokerClosed),
        };

        self.write(reply).await
    }

    /// Wait for the worker's reply. `None` means the connection is being torn
    /// down and nothing should be written.
    async fn await_reply(&self, pending: PendingReply, deadline: Instant) -> Option<Reply> {
        let id = pending.id();
        let waited = tokio::select! {
            biased;
            () = self.teardown.cancelled() => return None,
            waited = tokio::time::timeout_at(deadline + REPLY_GRACE, pending.wait()) => waited,
        };
        Some(match waited {
            Ok(Some(reply)) => reply,
            Ok(None) => self.synthesized(id, INTERNAL_MESSAGE, "reply slot dropped"),
            Err(_) => self.synthesized(id, TIMEOUT_MESSAGE, "no reply before deadline"),
        })
    }

    fn synthesized(&self, id: CorrelationId, message: &str, why: &str) -> Reply {
        warn!(connection_id = %self.id, id = %id, "{why}");
        Reply::error(id, message)
    }

    async fn write(&mut self, reply: Reply) -> Flow {
        let id = reply.id;
        match self.writer.send(reply.encode()).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(connection_id = %self.id, id = %id, error = %e, "reply write failed");
                Flow::Stop(TeardownReason::Transport)
            }
        }
    }
}
