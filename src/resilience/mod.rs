//! Resilience - bounded retries for transient failures
//!
//! Queue operations and provider calls both go through [`RetryPolicy`].

mod retry;

pub use retry::{classify_provider_error, RetryConfig, RetryPolicy};
