//! Queue service abstraction and the in-process `MemoryQueue`
//!
//! Semantics follow storage queues:
//! - `dequeue` hides messages for a visibility timeout (the lease)
//! - each dequeue issues a new pop receipt and bumps the dequeue count
//! - `delete` needs the latest pop receipt
//! - `release` ends a lease early, the message is visible right away
//! - a message whose lease expires becomes visible again

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{DeployError, Result};

/// Proof of a dequeue, needed to delete the message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt {
    pub message_id: String,
    pub pop_receipt: String,
}

/// A leased message
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    /// Times this message has been dequeued, this one included
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
    pub receipt: Receipt,
}

impl QueueMessage {
    /// Time since the message was enqueued
    pub fn age(&self) -> Duration {
        (Utc::now() - self.inserted_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// One-directional message queue
#[async_trait]
pub trait QueueService: Send + Sync {
    fn name(&self) -> &str;

    /// Append a message, returning its id
    async fn enqueue(&self, body: String) -> Result<String>;

    /// Lease up to `max` visible messages for `visibility`
    async fn dequeue(&self, max: usize, visibility: Duration) -> Result<Vec<QueueMessage>>;

    /// Delete a leased message
    async fn delete(&self, receipt: &Receipt) -> Result<()>;

    /// Give a leased message back; its receipt becomes stale
    async fn release(&self, receipt: &Receipt) -> Result<()>;

    /// Message count, leased ones included
    async fn approximate_len(&self) -> Result<usize>;
}

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOp {
    Enqueue,
    Dequeue,
    Delete,
    Release,
}

impl QueueOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Dequeue => "dequeue",
            Self::Delete => "delete",
            Self::Release => "release",
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    inserted_at: DateTime<Utc>,
    visible_at: Instant,
    dequeue_count: u32,
    pop_receipt: Option<String>,
}

/// In-process queue with leases, pop receipts and failure injection
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
    /// Remaining injected failures per operation
    failures: Mutex<FxHashMap<QueueOp, usize>>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
            failures: Mutex::new(FxHashMap::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Fail the next `times` calls of `op` with a transport error
    pub fn fail_next(&self, op: QueueOp, times: usize) {
        self.failures.lock().insert(op, times);
    }

    /// Fail every call until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages not currently leased
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.messages
            .lock()
            .iter()
            .filter(|m| m.visible_at <= now)
            .count()
    }

    /// Bodies of every message, in queue order
    pub fn bodies(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.body.clone()).collect()
    }

    fn check(&self, op: QueueOp) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DeployError::transport(
                op.as_str(),
                format!("queue '{}' unavailable", self.name),
            ));
        }
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&op).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(DeployError::transport(
                op.as_str(),
                format!("injected failure on queue '{}'", self.name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, body: String) -> Result<String> {
        self.check(QueueOp::Enqueue)?;
        let id = Uuid::new_v4().to_string();
        self.messages.lock().push_back(StoredMessage {
            id: id.clone(),
            body,
            inserted_at: Utc::now(),
            visible_at: Instant::now(),
            dequeue_count: 0,
            pop_receipt: None,
        });
        Ok(id)
    }

    async fn dequeue(&self, max: usize, visibility: Duration) -> Result<Vec<QueueMessage>> {
        self.check(QueueOp::Dequeue)?;
        let now = Instant::now();
        let mut messages = self.messages.lock();

        let leased: Vec<QueueMessage> = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max)
            .map(|m| {
                let pop_receipt = Uuid::new_v4().to_string();
                m.visible_at = now + visibility;
                m.dequeue_count += 1;
                m.pop_receipt = Some(pop_receipt.clone());
                QueueMessage {
                    message_id: m.id.clone(),
                    body: m.body.clone(),
                    dequeue_count: m.dequeue_count,
                    inserted_at: m.inserted_at,
                    receipt: Receipt {
                        message_id: m.id.clone(),
                        pop_receipt,
                    },
                }
            })
            .collect();
        Ok(leased)
    }

    async fn delete(&self, receipt: &Receipt) -> Result<()> {
        self.check(QueueOp::Delete)?;
        let mut messages = self.messages.lock();
        let position = messages.iter().position(|m| {
            m.id == receipt.message_id && m.pop_receipt.as_deref() == Some(&receipt.pop_receipt)
        });
        match position {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(DeployError::MessageNotFound {
                message_id: receipt.message_id.clone(),
            }),
        }
    }

    async fn release(&self, receipt: &Receipt) -> Result<()> {
        self.check(QueueOp::Release)?;
        let mut messages = self.messages.lock();
        let message = messages.iter_mut().find(|m| {
            m.id == receipt.message_id && m.pop_receipt.as_deref() == Some(&receipt.pop_receipt)
        });
        match message {
            Some(message) => {
                message.visible_at = Instant::now();
                message.pop_receipt = None;
                Ok(())
            }
            None => Err(DeployError::MessageNotFound {
                message_id: receipt.message_id.clone(),
            }),
        }
    }

    async fn approximate_len(&self) -> Result<usize> {
        self.check(QueueOp::Dequeue)?;
        Ok(self.len())
    }
}
