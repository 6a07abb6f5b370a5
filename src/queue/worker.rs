//! Worker - answer requests from the request queue
//!
//! Per message:
//! 1. parse the request (malformed → left to expire, poisoned after `max_dequeue_count`)
//! 2. run the handler (a panic counts as a handler error)
//! 3. enqueue a `status=ok` or `status=error` response
//! 4. delete the request, only now (at-least-once)
//!
//! A crash between 1 and 4 leaves the request leased; it reappears when the
//! lease expires and another worker answers it.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{panic_message, DeployError, Result};
use crate::resilience::{RetryConfig, RetryPolicy};

use super::message::{RequestEnvelope, ResponseEnvelope};
use super::service::{QueueMessage, QueueService};

/// Business logic behind the queue contract
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the response payload; an error becomes a `status=error` response
    async fn handle(&self, request: &RequestEnvelope) -> AnyResult<Value>;
}

/// Adapter turning an async closure into a [`RequestHandler`]
pub struct HandlerFn<F>(F);

/// Wrap `f` as a request handler
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = AnyResult<Value>> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(RequestEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = AnyResult<Value>> + Send,
{
    async fn handle(&self, request: &RequestEnvelope) -> AnyResult<Value> {
        (self.0)(request.clone()).await
    }
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    /// Lease taken on each request
    pub visibility: Duration,
    /// Sleep when the queue is empty
    pub poll_interval: Duration,
    /// Malformed messages dequeued this often are poisoned
    pub max_dequeue_count: u32,
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            visibility: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            max_dequeue_count: 5,
            retry: RetryConfig::default(),
        }
    }
}

/// Counters for processed messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Messages leased
    pub received: usize,
    /// Ok responses sent
    pub answered: usize,
    /// Error responses sent
    pub failed: usize,
    /// Malformed messages left to expire
    pub malformed: usize,
    /// Malformed messages moved to the poison queue or dropped
    pub poisoned: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.received += other.received;
        self.answered += other.answered;
        self.failed += other.failed;
        self.malformed += other.malformed;
        self.poisoned += other.poisoned;
    }
}

/// Response side of the correlation protocol
#[derive(Clone)]
pub struct Worker {
    id: String,
    requests: Arc<dyn QueueService>,
    responses: Arc<dyn QueueService>,
    poison: Option<Arc<dyn QueueService>>,
    handler: Arc<dyn RequestHandler>,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        requests: Arc<dyn QueueService>,
        responses: Arc<dyn QueueService>,
        handler: Arc<dyn RequestHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: "worker-0".to_string(),
            requests,
            responses,
            poison: None,
            handler,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_poison_queue(mut self, poison: Arc<dyn QueueService>) -> Self {
        self.poison = Some(poison);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease one batch and process every message in it
    ///
    /// Returns `Err` only when the queue stays unreachable after retries.
    #[instrument(skip(self), fields(worker = %self.id))]
    pub async fn run_once(&self) -> Result<WorkerStats> {
        let batch = self
            .retry
            .execute("dequeue requests", || {
                self.requests
                    .dequeue(self.config.batch_size, self.config.visibility)
            })
            .await?;

        let mut stats = WorkerStats {
            received: batch.len(),
            ..WorkerStats::default()
        };
        for message in batch {
            self.process(message, &mut stats).await?;
        }
        if stats.received > 0 {
            debug!(?stats, "batch processed");
        }
        Ok(stats)
    }

    /// Poll until `shutdown` is cancelled; a batch in progress always finishes
    pub async fn run(&self, shutdown: CancellationToken) -> WorkerStats {
        info!(worker = %self.id, queue = self.requests.name(), "worker started");
        let mut total = WorkerStats::default();

        while !shutdown.is_cancelled() {
            let idle = match self.run_once().await {
                Ok(stats) => {
                    total.merge(stats);
                    stats.received == 0
                }
                Err(e) => {
                    error!(worker = %self.id, error = %e, "request queue unreachable");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(worker = %self.id, ?total, "worker stopped");
        total
    }

    /// Run `n` workers concurrently until `shutdown` is cancelled
    pub async fn run_pool(&self, n: usize, shutdown: CancellationToken) -> WorkerStats {
        let mut join_set = JoinSet::new();
        for index in 0..n.max(1) {
            let worker = self.clone().with_id(format!("{}-{}", self.id, index));
            let shutdown = shutdown.clone();
            join_set.spawn(async move { worker.run(shutdown).await });
        }

        let mut total = WorkerStats::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(stats) => total.merge(stats),
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }
        total
    }

    async fn process(&self, message: QueueMessage, stats: &mut WorkerStats) -> Result<()> {
        let request = match RequestEnvelope::from_json(&message.body) {
            Ok(request) => request,
            Err(e) => return self.reject(message, e, stats).await,
        };

        let started = Instant::now();
        let handled = AssertUnwindSafe(self.handler.handle(&request))
            .catch_unwind()
            .await;
        let response = match handled {
            Ok(Ok(payload)) => {
                stats.answered += 1;
                ResponseEnvelope::ok(request.correlation_id.clone(), payload)
            }
            Ok(Err(e)) => {
                stats.failed += 1;
                warn!(correlation_id = %request.correlation_id, error = %e, "handler failed");
                ResponseEnvelope::error(request.correlation_id.clone(), format!("{:#}", e))
            }
            Err(panic) => {
                stats.failed += 1;
                let reason = panic_message(panic.as_ref());
                error!(correlation_id = %request.correlation_id, reason = %reason, "handler panicked");
                ResponseEnvelope::error(
                    request.correlation_id.clone(),
                    format!("handler panicked: {}", reason),
                )
            }
        }
        .with_processing_ms(started.elapsed().as_millis() as u64);

        // Response first: if this fails the request reappears and is retried
        let body = response.to_json()?;
        self.retry
            .execute("enqueue response", || self.responses.enqueue(body.clone()))
            .await?;

        if let Err(e) = self
            .retry
            .execute("delete request", || self.requests.delete(&message.receipt))
            .await
        {
            // Lease lost: another worker may answer again, the requester drops the duplicate
            warn!(correlation_id = %request.correlation_id, error = %e, "request not deleted");
        }
        debug!(correlation_id = %request.correlation_id, "request answered");
        Ok(())
    }

    /// Malformed request: leave it to expire, poison it once it keeps coming back
    async fn reject(
        &self,
        message: QueueMessage,
        error: DeployError,
        stats: &mut WorkerStats,
    ) -> Result<()> {
        if message.dequeue_count < self.config.max_dequeue_count {
            stats.malformed += 1;
            warn!(
                message_id = %message.message_id,
                dequeue_count = message.dequeue_count,
                error = %error,
                "malformed request"
            );
            return Ok(());
        }

        match &self.poison {
            Some(poison) => {
                let body = message.body.clone();
                self.retry
                    .execute("enqueue poison", || poison.enqueue(body.clone()))
                    .await?;
                warn!(message_id = %message.message_id, queue = poison.name(), "request poisoned");
            }
            None => {
                error!(message_id = %message.message_id, error = %error, "dropping malformed request");
            }
        }
        stats.poisoned += 1;

        if let Err(e) = self
            .retry
            .execute("delete request", || self.requests.delete(&message.receipt))
            .await
        {
            warn!(message_id = %message.message_id, error = %e, "poisoned request not deleted");
        }
        Ok(())
    }
}
