//! Shared intake queue and bounded worker pool.
//!
//! Every translator submits through a cloned [`BrokerHandle`]. The [`Broker`]
//! task pulls requests off the bounded intake queue, waits for one of
//! `max_workers` permits, and spawns a worker per request. A worker runs the
//! resolved handler against its deadline and fills the request's reply slot
//! exactly once, whatever happens.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use futures::FutureExt;
use metrics::{counter, histogram};
use perch_core::protocol::error_outcome;
use perch_settings::OverflowPolicy;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::metrics::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS, REQUEST_ERRORS_TOTAL};
use crate::registry::HandlerContext;
use crate::request::Request;

/// Reply text when the intake queue is full under [`OverflowPolicy::Reject`].
pub const BUSY_MESSAGE: &str = "server busy";
/// Reply text when a request outlives its deadline.
pub const TIMEOUT_MESSAGE: &str = "request timed out";
/// Reply text when a handler panics or vanishes without answering.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// Requests slower than this are logged.
const SLOW_REQUEST: Duration = Duration::from_secs(5);

/// Why a request could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("intake queue is full")]
    Saturated,
    #[error("deadline passed while waiting for intake")]
    TimedOut,
    #[error("broker is no longer accepting requests")]
    Closed,
}

/// Submission side of the intake queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct BrokerHandle {
    intake: mpsc::Sender<Request>,
    overflow: OverflowPolicy,
    request_timeout: Duration,
}

impl BrokerHandle {
    /// Queue a request for execution.
    ///
    /// Under `Block` this waits for room until the request's deadline; under
    /// `Reject` a full queue fails immediately.
    pub async fn submit(&self, request: Request) -> Result<(), SubmitError> {
        match self.overflow {
            OverflowPolicy::Reject => self.intake.try_send(request).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SubmitError::Saturated,
                mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
            }),
            OverflowPolicy::Block => {
                let deadline = request.deadline;
                match tokio::time::timeout_at(deadline, self.intake.send(request)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SubmitError::Closed),
                    Err(_) => Err(SubmitError::TimedOut),
                }
            }
        }
    }

    /// Deadline offset applied to each new request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }
}

/// The dispatch loop. Run it with [`Broker::run`].
pub struct Broker {
    intake: mpsc::Receiver<Request>,
    workers: Arc<Semaphore>,
    ctx: HandlerContext,
    shutdown: CancellationToken,
}

impl Broker {
    /// Create the broker and its submission handle.
    pub fn new(
        config: &BrokerConfig,
        ctx: HandlerContext,
        shutdown: CancellationToken,
    ) -> (Self, BrokerHandle) {
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));
        let broker = Self {
            intake: rx,
            workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
            ctx,
            shutdown,
        };
        let handle = BrokerHandle {
            intake: tx,
            overflow: config.overflow,
            request_timeout: config.request_timeout,
        };
        (broker, handle)
    }

    /// Dispatch until shutdown or until every handle is dropped.
    ///
    /// Workers already spawned run to completion, bounded by their
    /// deadlines. Requests still queued are dropped with the receiver, which
    /// their translators see as a vanished reply.
    pub async fn run(mut self) {
        info!(
            max_workers = self.workers.available_permits(),
            "broker started"
        );
        loop {
            let request = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = self.intake.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let ctx = self.ctx.clone();
            drop(tokio::spawn(execute(request, ctx, permit)));
        }
        self.intake.close();
        info!("broker stopped");
    }
}

/// Run one request to completion and fill its reply slot.
pub(crate) async fn execute(request: Request, ctx: HandlerContext, _permit: OwnedSemaphorePermit) {
    let Request {
        connection_id,
        id,
        command,
        handler,
        payload,
        deadline,
        reply,
    } = request;
    let command_label = command.as_str();
    counter!(REQUESTS_TOTAL, "command" => command_label).increment(1);

    if Instant::now() >= deadline {
        counter!(REQUEST_ERRORS_TOTAL, "command" => command_label, "kind" => "timeout").increment(1);
        warn!(connection_id = %connection_id, id = %id, command = command_label, "deadline passed before start");
        let _ = reply.fill(error_outcome(TIMEOUT_MESSAGE));
        return;
    }

    let started = StdInstant::now();
    let run = AssertUnwindSafe(handler.handle(payload, &ctx)).catch_unwind();
    let outcome = match tokio::time::timeout_at(deadline, run).await {
        Ok(Ok(Ok(outcome))) => outcome,
        Ok(Ok(Err(err))) => {
            counter!(REQUEST_ERRORS_TOTAL, "command" => command_label, "kind" => err.kind()).increment(1);
            debug!(connection_id = %connection_id, id = %id, command = command_label, error = %err, "handler failed");
            err.to_outcome()
        }
        Ok(Err(_panic)) => {
            counter!(REQUEST_ERRORS_TOTAL, "command" => command_label, "kind" => "panic").increment(1);
            error!(connection_id = %connection_id, id = %id, command = command_label, "handler panicked");
            error_outcome(INTERNAL_MESSAGE)
        }
        Err(_elapsed) => {
            counter!(REQUEST_ERRORS_TOTAL, "command" => command_label, "kind" => "timeout").increment(1);
            warn!(connection_id = %connection_id, id = %id, command = command_label, "handler timed out");
            error_outcome(TIMEOUT_MESSAGE)
        }
    };

    let elapsed = started.elapsed();
    histogram!(REQUEST_DURATION_SECONDS, "command" => command_label).record(elapsed.as_secs_f64());
    if elapsed >= SLOW_REQUEST {
        warn!(
            connection_id = %connection_id,
            id = %id,
            command = command_label,
            duration_secs = elapsed.as_secs_f64(),
            "slow request"
        );
    }

    if !reply.fill(outcome) {
        debug!(connection_id = %connection_id, id = %id, "requester gone, reply discarded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use perch_core::{Command, ConnectionId, CorrelationId, HandlerError, Outcome, Payload, Reply};
    use serde_json::{json, Value};

    use crate::registry::CommandHandler;
    use crate::request::{reply_pair, PendingReply};
    use crate::test_helpers::make_context;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(&self, payload: Payload, _ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
            Ok(payload)
        }
    }

    struct FailHandler;

    #[async_trait]
    impl CommandHandler for FailHandler {
        async fn handle(&self, _payload: Payload, _ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
            Err(HandlerError::MissingParam("names".into()))
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl CommandHandler for PanicHandler {
        async fn handle(&self, _payload: Payload, _ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
            panic!("boom");
        }
    }

    struct SleepHandler(Duration);

    #[async_trait]
    impl CommandHandler for SleepHandler {
        async fn handle(&self, _payload: Payload, _ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
            tokio::time::sleep(self.0).await;
            Ok(Outcome::new())
        }
    }

    /// Tracks the peak number of concurrently running handlers.
    struct GaugeHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CommandHandler for Arc<GaugeHandler> {
        async fn handle(&self, _payload: Payload, _ctx: &HandlerContext) -> Result<Outcome, HandlerError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Outcome::new())
        }
    }

    fn cid(raw: u64) -> CorrelationId {
        CorrelationId::new(raw).unwrap()
    }

    fn make_request(
        raw_id: u64,
        handler: Arc<dyn CommandHandler>,
        payload: Value,
        timeout: Duration,
    ) -> (Request, PendingReply) {
        let id = cid(raw_id);
        let (slot, pending) = reply_pair(id);
        let payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        let request = Request {
            connection_id: ConnectionId::new(),
            id,
            command: Command::CheckNames,
            handler,
            payload,
            deadline: Instant::now() + timeout,
            reply: slot,
        };
        (request, pending)
    }

    async fn run_one(handler: Arc<dyn CommandHandler>, payload: Value, timeout: Duration) -> Reply {
        let (request, pending) = make_request(1, handler, payload, timeout);
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();
        execute(request, make_context(), permit).await;
        pending.wait().await.unwrap()
    }

    fn config(max_workers: usize, intake_capacity: usize, overflow: OverflowPolicy) -> BrokerConfig {
        BrokerConfig {
            intake_capacity,
            max_workers,
            request_timeout: Duration::from_secs(5),
            overflow,
        }
    }

    #[tokio::test]
    async fn execute_success() {
        let reply = run_one(Arc::new(EchoHandler), json!({"a": 1}), Duration::from_secs(1)).await;
        assert_eq!(reply.id, cid(1));
        assert_eq!(reply.outcome["a"], 1);
    }

    #[tokio::test]
    async fn execute_handler_error() {
        let reply = run_one(Arc::new(FailHandler), json!({}), Duration::from_secs(1)).await;
        assert_eq!(reply.outcome["error"], "missing parameter: names");
    }

    #[tokio::test]
    async fn execute_panic_becomes_internal_error() {
        let reply = run_one(Arc::new(PanicHandler), json!({}), Duration::from_secs(1)).await;
        assert_eq!(reply.outcome["error"], INTERNAL_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_timeout() {
        let reply = run_one(
            Arc::new(SleepHandler(Duration::from_secs(60))),
            json!({}),
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(reply.outcome["error"], TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn execute_past_deadline_skips_handler() {
        let (request, pending) = make_request(2, Arc::new(PanicHandler), json!({}), Duration::ZERO);
        let permit = Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap();
        execute(request, make_context(), permit).await;
        assert_eq!(pending.wait().await.unwrap().outcome["error"], TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn broker_round_trip() {
        let shutdown = CancellationToken::new();
        let (broker, handle) = Broker::new(
            &config(4, 8, OverflowPolicy::Block),
            make_context(),
            shutdown.clone(),
        );
        let task = tokio::spawn(broker.run());

        let (request, pending) = make_request(7, Arc::new(EchoHandler), json!({"x": "y"}), Duration::from_secs(5));
        handle.submit(request).await.unwrap();
        let reply = pending.wait().await.unwrap();
        assert_eq!(reply.id, cid(7));
        assert_eq!(reply.outcome["x"], "y");

        shutdown.cancel();
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let shutdown = CancellationToken::new();
        let (broker, handle) = Broker::new(
            &config(2, 32, OverflowPolicy::Block),
            make_context(),
            shutdown.clone(),
        );
        let _task = tokio::spawn(broker.run());

        let gauge = Arc::new(GaugeHandler {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut pending = Vec::new();
        for i in 1..=10 {
            let (request, p) = make_request(i, Arc::new(Arc::clone(&gauge)), json!({}), Duration::from_secs(5));
            handle.submit(request).await.unwrap();
            pending.push(p);
        }
        for p in pending {
            assert!(!p.wait().await.unwrap().is_error());
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn reject_policy_reports_saturation() {
        let shutdown = CancellationToken::new();
        // Broker task never started, so nothing drains the queue.
        let (_broker, handle) = Broker::new(
            &config(1, 1, OverflowPolicy::Reject),
            make_context(),
            shutdown,
        );
        let (first, _p1) = make_request(1, Arc::new(EchoHandler), json!({}), Duration::from_secs(5));
        let (second, _p2) = make_request(2, Arc::new(EchoHandler), json!({}), Duration::from_secs(5));
        handle.submit(first).await.unwrap();
        assert_eq!(handle.submit(second).await, Err(SubmitError::Saturated));
    }

    #[tokio::test(start_paused = true)]
    async fn block_policy_times_out_at_deadline() {
        let shutdown = CancellationToken::new();
        let (_broker, handle) = Broker::new(
            &config(1, 1, OverflowPolicy::Block),
            make_context(),
            shutdown,
        );
        let (first, _p1) = make_request(1, Arc::new(EchoHandler), json!({}), Duration::from_secs(5));
        let (second, _p2) = make_request(2, Arc::new(EchoHandler), json!({}), Duration::from_millis(50));
        handle.submit(first).await.unwrap();
        assert_eq!(handle.submit(second).await, Err(SubmitError::TimedOut));
    }

    #[tokio::test]
    async fn submit_after_broker_gone() {
        let (broker, handle) = Broker::new(
            &config(1, 4, OverflowPolicy::Block),
            make_context(),
            CancellationToken::new(),
        );
        drop(broker);
        let (request, _p) = make_request(1, Arc::new(EchoHandler), json!({}), Duration::from_secs(1));
        assert_eq!(handle.submit(request).await, Err(SubmitError::Closed));
    }
}
