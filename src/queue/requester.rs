//! Requester - send a request, await its correlated response
//!
//! ```text
//! send(payload)
//!   ├─ register PendingRequest (before enqueue: a fast response is never missed)
//!   ├─ enqueue request                         (retried on transport errors)
//!   └─ loop until response or deadline
//!        ├─ poll response queue (batch, short visibility)
//!        │    ├─ pending id   → deregister, delete, hand to its waiter
//!        │    ├─ pending id past its deadline → delete, waiter times out
//!        │    ├─ settled id   → delete (duplicate or late)
//!        │    └─ unknown id   → release the lease for its owner; delete once older than orphan_grace
//!        └─ sleep min(poll_interval, time left)
//! ```
//!
//! All concurrent `send`s of one Requester share the pending registry, so
//! whichever call polls a response hands it to the right waiter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::error::{DeployError, Result};
use crate::resilience::{RetryConfig, RetryPolicy};

use super::message::{RequestEnvelope, ResponseEnvelope};
use super::service::{QueueMessage, QueueService};

/// Settled ids remembered for duplicate/late detection
const SETTLED_CAPACITY: usize = 10_000;

/// Requester tuning
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    /// Sender name written into each request
    pub name: String,
    pub poll_interval: Duration,
    /// Lease taken on polled responses
    pub response_visibility: Duration,
    pub batch_size: usize,
    /// Age after which unclaimed or unparseable responses are deleted
    pub orphan_grace: Duration,
    pub retry: RetryConfig,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            name: "foundry-deploy".to_string(),
            poll_interval: Duration::from_millis(500),
            response_visibility: Duration::from_secs(5),
            batch_size: 32,
            orphan_grace: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// An outstanding request
#[derive(Debug)]
struct PendingRequest {
    submitted_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<ResponseEnvelope>,
}

/// Outstanding and settled correlation ids
#[derive(Debug, Default)]
struct PendingRegistry {
    pending: Mutex<FxHashMap<String, PendingRequest>>,
    settled: Mutex<SettledIds>,
}

#[derive(Debug, Default)]
struct SettledIds {
    ids: FxHashSet<String>,
    order: VecDeque<String>,
}

impl SettledIds {
    fn insert(&mut self, id: String) {
        if self.ids.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > SETTLED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

impl PendingRegistry {
    fn register(&self, id: String, timeout: Duration, tx: oneshot::Sender<ResponseEnvelope>) {
        let now = Instant::now();
        self.pending.lock().insert(
            id,
            PendingRequest {
                submitted_at: now,
                deadline: now + timeout,
                tx,
            },
        );
    }

    /// Remove a pending request; it counts as settled from now on
    fn settle(&self, id: &str) -> Option<PendingRequest> {
        let entry = self.pending.lock().remove(id);
        self.settled.lock().insert(id.to_string());
        entry
    }

    /// Remove without marking settled (the request never left)
    fn forget(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    fn is_settled(&self, id: &str) -> bool {
        self.settled.lock().ids.contains(id)
    }

    fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// What a poll did with one response message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delivered,
    Duplicate,
    Expired,
    Orphaned,
    Left,
}

/// Request side of the correlation protocol
#[derive(Clone)]
pub struct Requester {
    requests: Arc<dyn QueueService>,
    responses: Arc<dyn QueueService>,
    registry: Arc<PendingRegistry>,
    retry: RetryPolicy,
    config: Arc<RequesterConfig>,
}

impl Requester {
    pub fn new(
        requests: Arc<dyn QueueService>,
        responses: Arc<dyn QueueService>,
        config: RequesterConfig,
    ) -> Self {
        Self {
            requests,
            responses,
            registry: Arc::new(PendingRegistry::default()),
            retry: RetryPolicy::new(config.retry.clone()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RequesterConfig {
        &self.config
    }

    /// Requests still awaiting a response
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Send `payload` and wait up to `timeout` for the correlated response
    ///
    /// Error responses are returned as `Ok`; use
    /// [`ResponseEnvelope::into_result`] to turn them into errors.
    #[instrument(skip(self, payload), fields(correlation_id, timeout_ms = timeout.as_millis() as u64))]
    pub async fn send(&self, payload: Value, timeout: Duration) -> Result<ResponseEnvelope> {
        let request = RequestEnvelope::new(payload).with_requester(self.config.name.clone());
        let id = request.correlation_id.clone();
        tracing::Span::current().record("correlation_id", id.as_str());
        let body = request.to_json()?;

        let (tx, mut rx) = oneshot::channel();
        self.registry.register(id.clone(), timeout, tx);

        if let Err(e) = self
            .retry
            .execute("enqueue request", || self.requests.enqueue(body.clone()))
            .await
        {
            self.registry.forget(&id);
            return Err(e);
        }
        debug!(queue = self.requests.name(), "request enqueued");

        let deadline = Instant::now() + timeout;
        loop {
            match rx.try_recv() {
                Ok(response) => return Ok(response),
                // Dropped by a poll that found the deadline passed
                Err(TryRecvError::Closed) => return Err(timed_out(&id, timeout)),
                Err(TryRecvError::Empty) => {}
            }

            if Instant::now() >= deadline {
                return self.expire(&id, timeout, rx).await;
            }

            if let Err(e) = self.poll_responses().await {
                self.registry.settle(&id);
                return Err(e);
            }

            let wait = self.config.poll_interval.min(deadline - Instant::now().min(deadline));
            let closed = tokio::select! {
                response = &mut rx => match response {
                    Ok(response) => return Ok(response),
                    Err(_) => true,
                },
                _ = tokio::time::sleep(wait) => false,
            };
            if closed {
                return Err(timed_out(&id, timeout));
            }
        }
    }

    /// Deadline passed: deregister, unless a poll claimed the response first
    async fn expire(
        &self,
        id: &str,
        timeout: Duration,
        rx: oneshot::Receiver<ResponseEnvelope>,
    ) -> Result<ResponseEnvelope> {
        match self.registry.settle(id) {
            Some(entry) => {
                warn!(
                    correlation_id = id,
                    waited_ms = entry.submitted_at.elapsed().as_millis() as u64,
                    "request timed out"
                );
                Err(timed_out(id, timeout))
            }
            // Routing is synchronous: the claimer sends (or drops) right away
            None => rx.await.map_err(|_| timed_out(id, timeout)),
        }
    }

    /// Lease one batch of responses and route every message
    async fn poll_responses(&self) -> Result<()> {
        let batch = self
            .retry
            .execute("dequeue responses", || {
                self.responses
                    .dequeue(self.config.batch_size, self.config.response_visibility)
            })
            .await?;

        for message in batch {
            let disposition = self.route(&message);
            debug!(
                message_id = %message.message_id,
                disposition = ?disposition,
                "response polled"
            );
            if disposition == Disposition::Left {
                // Hand the lease back so the owning requester sees it on its next poll
                if let Err(e) = self.responses.release(&message.receipt).await {
                    debug!(message_id = %message.message_id, error = %e, "lease not released");
                }
            }
        }
        Ok(())
    }

    fn route(&self, message: &QueueMessage) -> Disposition {
        let response = match ResponseEnvelope::from_json(&message.body) {
            Ok(response) => response,
            Err(e) => {
                if message.age() >= self.config.orphan_grace {
                    warn!(message_id = %message.message_id, error = %e, "deleting unparseable response");
                    self.delete_detached(message);
                    return Disposition::Orphaned;
                }
                return Disposition::Left;
            }
        };
        let id = response.correlation_id.clone();

        if let Some(pending) = self.registry.settle(&id) {
            self.delete_detached(message);
            if Instant::now() > pending.deadline {
                // Dropping the sender turns the wait into a timeout
                warn!(correlation_id = %id, "deleting response that arrived after the deadline");
                return Disposition::Expired;
            }
            // The waiter may have given up; the response is consumed either way
            let _ = pending.tx.send(response);
            return Disposition::Delivered;
        }

        if self.registry.is_settled(&id) {
            warn!(correlation_id = %id, "deleting response for settled request");
            self.delete_detached(message);
            return Disposition::Duplicate;
        }

        if message.age() >= self.config.orphan_grace {
            warn!(correlation_id = %id, "deleting orphaned response");
            self.delete_detached(message);
            return Disposition::Orphaned;
        }

        let mismatch = DeployError::CorrelationMismatch { correlation_id: id };
        debug!(error = %mismatch, "leaving response for its owner");
        Disposition::Left
    }

    /// Delete in the background so routing never blocks on the queue
    fn delete_detached(&self, message: &QueueMessage) {
        let responses = Arc::clone(&self.responses);
        let retry = self.retry.clone();
        let receipt = message.receipt.clone();
        tokio::spawn(async move {
            if let Err(e) = retry
                .execute("delete response", || responses.delete(&receipt))
                .await
            {
                warn!(message_id = %receipt.message_id, error = %e, "failed to delete response");
            }
        });
    }
}

fn timed_out(id: &str, timeout: Duration) -> DeployError {
    DeployError::Timeout {
        correlation_id: id.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}
