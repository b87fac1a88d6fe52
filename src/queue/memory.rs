//! In-process queue with lease semantics
//!
//! Mirrors the Redis queue's behavior inside one process: leased messages
//! that are not settled before the lease expires return to the front of
//! the queue on the next receive.

use crate::error::{QueueError, QueueResult};
use crate::queue::{DeadLetter, Delivery, LockToken, QueueStats, WorkQueue};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Message {
    id: String,
    body: String,
    deliveries: u32,
}

#[derive(Debug)]
struct Lease {
    message: Message,
    expires: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Message>,
    in_flight: HashMap<LockToken, Lease>,
    dead: Vec<DeadLetter>,
    workers: HashSet<String>,
    next_id: u64,
    total_enqueued: u64,
    total_completed: u64,
    total_abandoned: u64,
}

impl State {
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<LockToken> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.expires <= now)
            .map(|(token, _)| token.clone())
            .collect();
        for token in expired {
            if let Some(lease) = self.in_flight.remove(&token) {
                tracing::debug!("Lease {} expired, message {} is redeliverable", token, lease.message.id);
                self.ready.push_front(lease.message);
            }
        }
    }

    fn take_lease(&mut self, token: &LockToken) -> QueueResult<Lease> {
        self.in_flight
            .remove(token)
            .ok_or_else(|| QueueError::LockLost(token.to_string()))
    }
}

/// In-process work queue
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    lease: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    /// Create a queue whose leases last `lease`
    pub fn new(name: &str, lease: Duration) -> Self {
        Self {
            name: name.to_string(),
            lease,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Bodies of the messages waiting to be received, front first
    pub fn pending_bodies(&self) -> Vec<String> {
        self.state.lock().ready.iter().map(|m| m.body.clone()).collect()
    }

    /// Remove and return every waiting body without leasing it
    pub fn drain(&self) -> Vec<String> {
        self.state.lock().ready.drain(..).map(|m| m.body).collect()
    }

    fn try_receive(&self) -> Option<Delivery> {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.reclaim_expired(now);

        let mut message = state.ready.pop_front()?;
        message.deliveries += 1;

        let token = LockToken(uuid::Uuid::new_v4().to_string());
        let delivery = Delivery {
            message_id: message.id.clone(),
            lock_token: token.clone(),
            body: message.body.clone(),
            delivery_count: message.deliveries,
        };
        state.in_flight.insert(
            token,
            Lease {
                message,
                expires: now + self.lease,
            },
        );
        Some(delivery)
    }
}

#[async_trait::async_trait]
impl WorkQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, body: &str) -> QueueResult<()> {
        {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = format!("{}-{}", self.name, state.next_id);
            state.ready.push_back(Message {
                id,
                body: body.to_string(),
                deliveries: 0,
            });
            state.total_enqueued += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, _consumer: &str, wait: Duration) -> QueueResult<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_receive() {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Wake on enqueue/abandon, or re-check for expired leases
            let nap = (deadline - now).min(self.lease).min(Duration::from_millis(250));
            let _ = tokio::time::timeout(nap, self.notify.notified()).await;
        }
    }

    async fn complete(&self, token: &LockToken) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.take_lease(token)?;
        state.total_completed += 1;
        Ok(())
    }

    async fn abandon(&self, token: &LockToken) -> QueueResult<()> {
        {
            let mut state = self.state.lock();
            let lease = state.take_lease(token)?;
            state.ready.push_front(lease.message);
            state.total_abandoned += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, token: &LockToken, reason: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        let lease = state.take_lease(token)?;
        state.dead.push(DeadLetter {
            message_id: lease.message.id,
            body: lease.message.body,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut state = self.state.lock();
        state.reclaim_expired(Instant::now());
        Ok(QueueStats {
            pending: state.ready.len() as u64,
            in_flight: state.in_flight.len() as u64,
            dead_lettered: state.dead.len() as u64,
            total_enqueued: state.total_enqueued,
            total_completed: state.total_completed,
            total_abandoned: state.total_abandoned,
            active_workers: state.workers.len() as u64,
        })
    }

    async fn heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        self.state.lock().workers.insert(worker_id.to_string());
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        Ok(self.state.lock().dead.iter().take(limit).cloned().collect())
    }

    async fn redrive(&self) -> QueueResult<u64> {
        let count = {
            let mut state = self.state.lock();
            let dead: Vec<DeadLetter> = state.dead.drain(..).collect();
            let count = dead.len() as u64;
            for letter in dead {
                state.ready.push_back(Message {
                    id: letter.message_id,
                    body: letter.body,
                    deliveries: 0,
                });
            }
            count
        };
        if count > 0 {
            self.notify.notify_waiters();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_and_complete() {
        let queue = MemoryQueue::new("visit", Duration::from_secs(30));
        queue.enqueue("a").await.unwrap();
        queue.enqueue("b").await.unwrap();

        let first = queue.receive("w1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.body, "a");
        assert_eq!(first.delivery_count, 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_flight, 1);

        queue.complete(&first.lock_token).await.unwrap();
        assert!(matches!(
            queue.complete(&first.lock_token).await,
            Err(QueueError::LockLost(_))
        ));
        assert_eq!(queue.stats().await.unwrap().total_completed, 1);
    }

    #[tokio::test]
    async fn test_abandon_redelivers_first() {
        let queue = MemoryQueue::new("visit", Duration::from_secs(30));
        queue.enqueue("a").await.unwrap();
        queue.enqueue("b").await.unwrap();

        let first = queue.receive("w1", Duration::ZERO).await.unwrap().unwrap();
        queue.abandon(&first.lock_token).await.unwrap();

        let again = queue.receive("w1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.body, "a");
        assert_eq!(again.delivery_count, 2);
        assert_eq!(again.message_id, first.message_id);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = MemoryQueue::new("visit", Duration::from_millis(10));
        queue.enqueue("a").await.unwrap();

        let first = queue.receive("w1", Duration::ZERO).await.unwrap().unwrap();
        assert!(queue.receive("w2", Duration::ZERO).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = queue.receive("w2", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.body, "a");
        assert_eq!(second.delivery_count, 2);

        // The stale lease can no longer settle the message
        assert!(queue.complete(&first.lock_token).await.is_err());
    }

    #[tokio::test]
    async fn test_dead_letter_and_redrive() {
        let queue = MemoryQueue::new("visit", Duration::from_secs(30));
        queue.enqueue("bad").await.unwrap();

        let delivery = queue.receive("w1", Duration::ZERO).await.unwrap().unwrap();
        queue.dead_letter(&delivery.lock_token, "not a directory").await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert!(stats.is_idle());
        assert_eq!(stats.dead_lettered, 1);

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead[0].reason, "not a directory");

        assert_eq!(queue.redrive().await.unwrap(), 1);
        assert_eq!(queue.pending_bodies(), vec!["bad"]);
    }

    #[tokio::test]
    async fn test_receive_waits_for_enqueue() {
        let queue = std::sync::Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.enqueue("late").await.unwrap();
        });

        let delivery = queue.receive("w1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(delivery.unwrap().body, "late");
    }
}
