//! Queue module for distributed work coordination
//!
//! Work items travel through a durable, at-least-once queue. A consumer
//! receives a [`Delivery`] carrying a lock token (a lease). The lease is
//! settled with exactly one of:
//!
//! - `complete`: the item is done and removed
//! - `abandon`: the item failed and becomes redeliverable immediately
//! - `dead_letter`: the item is invalid and moved to a side channel
//!
//! A lease that is never settled expires and the item is redelivered to
//! another consumer. There is no deduplication; consumers must tolerate
//! seeing the same item more than once.

mod memory;
mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::{RedisQueue, RedisQueueConfig, CONSUMER_GROUP, DEFAULT_KEY_PREFIX};

use crate::error::QueueResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default queue carrying directory visit items
pub const DEFAULT_VISIT_QUEUE: &str = "visit";

/// Default queue carrying tree creation items
pub const DEFAULT_CREATE_QUEUE: &str = "create";

/// Opaque claim on a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(pub String);

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A received message and its lease
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue-assigned message id
    pub message_id: String,
    /// Lease used to settle the message
    pub lock_token: LockToken,
    /// Serialized work item
    pub body: String,
    /// How many times this message has been handed out, starting at 1
    pub delivery_count: u32,
}

/// A message that was moved aside instead of being processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub reason: String,
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Messages waiting to be received
    pub pending: u64,
    /// Messages received but not yet settled
    pub in_flight: u64,
    /// Messages in the dead-letter channel
    pub dead_lettered: u64,
    /// Total messages ever enqueued
    pub total_enqueued: u64,
    /// Total messages completed
    pub total_completed: u64,
    /// Total abandon calls
    pub total_abandoned: u64,
    /// Number of consumers with a live heartbeat
    pub active_workers: u64,
}

impl QueueStats {
    /// Nothing waiting and nothing being worked on
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}

/// Trait for queue implementations
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    /// Name of the queue
    fn name(&self) -> &str;

    /// Add a serialized work item
    async fn enqueue(&self, body: &str) -> QueueResult<()>;

    /// Receive one message, waiting up to `wait` for one to arrive
    async fn receive(&self, consumer: &str, wait: Duration) -> QueueResult<Option<Delivery>>;

    /// Settle a delivery as done
    async fn complete(&self, token: &LockToken) -> QueueResult<()>;

    /// Release a delivery for redelivery
    async fn abandon(&self, token: &LockToken) -> QueueResult<()>;

    /// Move a delivery to the dead-letter channel
    async fn dead_letter(&self, token: &LockToken, reason: &str) -> QueueResult<()>;

    /// Get queue statistics
    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Record that `worker_id` is alive
    async fn heartbeat(&self, worker_id: &str) -> QueueResult<()>;

    /// Up to `limit` dead-lettered messages, oldest first
    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>>;

    /// Move every dead-lettered message back onto the queue
    async fn redrive(&self) -> QueueResult<u64>;
}

// Re-export async_trait for consumers
pub use async_trait::async_trait;
