//! Queue Module - request/response correlation over two queues
//!
//! ```text
//! Requester ──enqueue──► request queue ──dequeue──► Worker
//!     ▲                                               │ handler
//!     └──────dequeue──── response queue ◄──enqueue────┘
//! ```
//!
//! - `message`: JSON envelopes carrying the `correlationId`
//! - `service`: `QueueService` trait and the in-process `MemoryQueue`
//! - `requester`: send + await with timeout, shared pending registry
//! - `worker`: handler loop, at-least-once delete, poison queue

mod message;
mod requester;
mod service;
mod worker;

pub use message::{RequestEnvelope, ResponseEnvelope, ResponseStatus};
pub use requester::{Requester, RequesterConfig};
pub use service::{MemoryQueue, QueueMessage, QueueOp, QueueService, Receipt};
pub use worker::{handler_fn, HandlerFn, RequestHandler, Worker, WorkerConfig, WorkerStats};
