//! Worker runtime
//!
//! A worker drains one queue: it leases deliveries, hands each body to a
//! [`MessageHandler`], and settles the lease based on the outcome.

mod runner;

pub use runner::{QueueWorker, WorkerProgress, WorkerStats};

use crate::error::Result;

/// What a handler did with one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Directories visited or created
    pub directories: u64,
    /// Files whose ACLs were recorded
    pub files: u64,
    /// New work items enqueued
    pub children: u64,
}

/// Processes the body of one delivery.
///
/// Returning an error whose [`is_terminal`](crate::error::CrawlerError::is_terminal)
/// is true dead-letters the message; any other error releases it for
/// redelivery.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn handle(&self, body: &str) -> Result<HandleOutcome>;
}
