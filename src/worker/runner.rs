//! Queue worker
//!
//! Runs `concurrency` consumer tasks against one queue. Each task leases a
//! delivery, invokes the handler, and settles the lease:
//!
//! - success: `complete`
//! - terminal error (protocol violation): `dead_letter`
//! - any other error: `abandon`, so the message is redelivered
//! - more than `max_deliveries` deliveries: `dead_letter` without invoking
//!   the handler
//!
//! Outside continuous mode the worker exits once the queue has nothing
//! pending and nothing in flight.

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::queue::{Delivery, WorkQueue};
use crate::worker::MessageHandler;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress information during worker operation
#[derive(Debug, Clone, Default)]
pub struct WorkerProgress {
    /// Deliveries received
    pub received: u64,
    /// Deliveries completed
    pub completed: u64,
    /// Deliveries released for redelivery
    pub abandoned: u64,
    /// Deliveries moved to the dead-letter channel
    pub dead_lettered: u64,
    /// Directories visited or created
    pub directories: u64,
    /// Files whose ACLs were recorded
    pub files: u64,
    /// New work items enqueued
    pub children: u64,
    /// Consumer tasks currently inside the handler
    pub busy: u64,
    /// Elapsed time
    pub elapsed: Duration,
}

/// Final statistics from worker
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub received: u64,
    pub completed: u64,
    pub abandoned: u64,
    pub dead_lettered: u64,
    pub directories: u64,
    pub files: u64,
    pub children: u64,
    /// Queue or settle errors
    pub errors: u64,
    /// Total duration
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    dead_lettered: AtomicU64,
    directories: AtomicU64,
    files: AtomicU64,
    children: AtomicU64,
    busy: AtomicU64,
    errors: AtomicU64,
    /// Slots reserved against `max_items`
    reserved: AtomicU64,
}

impl Counters {
    fn progress(&self, elapsed: Duration) -> WorkerProgress {
        WorkerProgress {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            children: self.children.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            elapsed,
        }
    }

    fn stats(&self, duration: Duration) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            children: self.children.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duration,
        }
    }
}

/// Drains one queue through one handler
pub struct QueueWorker {
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an externally owned shutdown flag (e.g. the Ctrl+C handler's)
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Signal shutdown. Tasks finish their current delivery first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Run until shutdown, `max_items`, or (outside continuous mode) an idle queue
    pub async fn run<F>(&self, progress_callback: F) -> Result<WorkerStats>
    where
        F: Fn(WorkerProgress) + Send + Sync + 'static,
    {
        let start = Instant::now();
        let counters = Arc::new(Counters::default());
        // Stops the background tasks without touching the caller's flag
        let done = Arc::new(AtomicBool::new(false));

        tracing::info!(
            "Worker {} consuming '{}' with {} task(s) via {} handler",
            self.config.worker_id,
            self.queue.name(),
            self.config.concurrency,
            self.handler.name()
        );

        // Spawn progress reporter
        let progress_handle = if self.config.show_progress {
            let counters = counters.clone();
            let done = done.clone();
            let callback = progress_callback;

            Some(tokio::spawn(async move {
                while !done.load(Ordering::Relaxed) {
                    callback(counters.progress(start.elapsed()));
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }))
        } else {
            None
        };

        // Spawn heartbeat task
        let heartbeat_handle = {
            let queue = self.queue.clone();
            let worker_id = self.config.worker_id.clone();
            let done = done.clone();
            let interval = self.config.heartbeat_interval;

            tokio::spawn(async move {
                while !done.load(Ordering::Relaxed) {
                    if let Err(e) = queue.heartbeat(&worker_id).await {
                        tracing::warn!("Failed to send heartbeat: {}", e);
                    }
                    tokio::time::sleep(interval).await;
                }
            })
        };

        let mut consumers = Vec::with_capacity(self.config.concurrency);
        for task in 0..self.config.concurrency {
            let consumer = Consumer {
                name: format!("{}-{}", self.config.worker_id, task),
                queue: self.queue.clone(),
                handler: self.handler.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown.clone(),
                counters: counters.clone(),
            };
            consumers.push(tokio::spawn(consumer.run()));
        }

        for handle in consumers {
            if let Err(e) = handle.await {
                tracing::error!("Consumer task failed: {}", e);
                counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        done.store(true, Ordering::SeqCst);
        heartbeat_handle.abort();
        if let Some(handle) = progress_handle {
            handle.abort();
        }

        let stats = counters.stats(start.elapsed());
        tracing::info!(
            "Worker {} finished: {} completed, {} abandoned, {} dead-lettered in {:.1}s",
            self.config.worker_id,
            stats.completed,
            stats.abandoned,
            stats.dead_lettered,
            stats.duration.as_secs_f64()
        );
        Ok(stats)
    }
}

/// One consumer task
struct Consumer {
    name: String,
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Consumer {
    async fn run(self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Reserve a slot before receiving so tasks never overshoot max_items
            if let Some(max) = self.config.max_items {
                if self.counters.reserved.fetch_add(1, Ordering::SeqCst) >= max {
                    break;
                }
            }

            match self.queue.receive(&self.name, self.config.receive_wait).await {
                Ok(Some(delivery)) => {
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    self.counters.busy.fetch_add(1, Ordering::Relaxed);
                    self.settle(delivery).await;
                    self.counters.busy.fetch_sub(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    if self.config.max_items.is_some() {
                        self.counters.reserved.fetch_sub(1, Ordering::SeqCst);
                    }
                    if !self.config.continuous && self.queue_is_idle().await {
                        tracing::debug!("{}: queue is idle, exiting", self.name);
                        break;
                    }
                }
                Err(e) => {
                    if self.config.max_items.is_some() {
                        self.counters.reserved.fetch_sub(1, Ordering::SeqCst);
                    }
                    tracing::error!("{}: failed to receive: {}", self.name, e);
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Idle means nothing waiting and nothing leased anywhere, including
    /// deliveries held by this worker's other tasks
    async fn queue_is_idle(&self) -> bool {
        if self.counters.busy.load(Ordering::Relaxed) > 0 {
            return false;
        }
        match self.queue.stats().await {
            Ok(stats) => stats.is_idle(),
            Err(e) => {
                tracing::warn!("Failed to check queue status: {}", e);
                false
            }
        }
    }

    async fn settle(&self, delivery: Delivery) {
        let token = &delivery.lock_token;

        if delivery.delivery_count > self.config.max_deliveries {
            let reason = format!(
                "exceeded {} deliveries (delivery {})",
                self.config.max_deliveries, delivery.delivery_count
            );
            tracing::warn!("Dead-lettering {}: {}", delivery.message_id, reason);
            match self.queue.dead_letter(token, &reason).await {
                Ok(()) => {
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => self.settle_failed("dead-letter", &delivery, e),
            }
            return;
        }

        match self.handler.handle(&delivery.body).await {
            Ok(outcome) => {
                self.counters.directories.fetch_add(outcome.directories, Ordering::Relaxed);
                self.counters.files.fetch_add(outcome.files, Ordering::Relaxed);
                self.counters.children.fetch_add(outcome.children, Ordering::Relaxed);
                match self.queue.complete(token).await {
                    Ok(()) => {
                        self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => self.settle_failed("complete", &delivery, e),
                }
            }
            Err(e) if e.is_terminal() => {
                tracing::warn!("Dead-lettering {}: {}", delivery.message_id, e);
                match self.queue.dead_letter(token, &e.to_string()).await {
                    Ok(()) => {
                        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => self.settle_failed("dead-letter", &delivery, e),
                }
            }
            Err(e) => {
                tracing::error!(
                    "Failed to handle {} (delivery {}): {}",
                    delivery.message_id,
                    delivery.delivery_count,
                    e
                );
                match self.queue.abandon(token).await {
                    Ok(()) => {
                        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => self.settle_failed("abandon", &delivery, e),
                }
            }
        }
    }

    /// A settle call failed; the lease will expire and the message return
    fn settle_failed(&self, op: &str, delivery: &Delivery, err: crate::error::QueueError) {
        tracing::error!("Failed to {} {}: {}", op, delivery.message_id, err);
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CrawlerError, ProtocolError, StoreError};
    use crate::queue::MemoryQueue;
    use crate::worker::HandleOutcome;

    /// Rejects `bad` as a protocol violation and fails `flaky*` bodies for
    /// their first `heal_after` deliveries
    struct ScriptedHandler {
        heal_after: u64,
        seen: parking_lot::Mutex<std::collections::HashMap<String, u64>>,
    }

    #[async_trait::async_trait]
    impl MessageHandler for ScriptedHandler {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle(&self, body: &str) -> Result<HandleOutcome> {
            if body == "bad" {
                return Err(ProtocolError::NotADirectory { path: body.into() }.into());
            }
            let seen = {
                let mut seen = self.seen.lock();
                let count = seen.entry(body.to_string()).or_default();
                *count += 1;
                *count
            };
            if body.starts_with("flaky") && seen <= self.heal_after {
                return Err(CrawlerError::Store(StoreError::Transient {
                    path: body.into(),
                    reason: "injected".into(),
                }));
            }
            Ok(HandleOutcome {
                directories: 1,
                ..Default::default()
            })
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            worker_id: "test".into(),
            concurrency: 2,
            receive_wait: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn handler(heal_after: u64) -> Arc<ScriptedHandler> {
        Arc::new(ScriptedHandler {
            heal_after,
            seen: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_settles_by_outcome() {
        let queue = Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        for body in ["ok-1", "bad", "flaky-1", "ok-2"] {
            queue.enqueue(body).await.unwrap();
        }

        let worker = QueueWorker::new(queue.clone(), handler(2), config());
        let stats = worker.run(|_| {}).await.unwrap();

        assert_eq!(stats.completed, 3);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.directories, 3);

        let queue_stats = queue.stats().await.unwrap();
        assert!(queue_stats.is_idle());
        assert_eq!(queue.dead_letters(10).await.unwrap()[0].body, "bad");
    }

    #[tokio::test]
    async fn test_max_deliveries_dead_letters() {
        let queue = Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        queue.enqueue("flaky-forever").await.unwrap();

        let mut config = config();
        config.max_deliveries = 3;
        let worker = QueueWorker::new(queue.clone(), handler(u64::MAX), config);
        let stats = worker.run(|_| {}).await.unwrap();

        assert_eq!(stats.abandoned, 3);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.completed, 0);
        let dead = queue.dead_letters(10).await.unwrap();
        assert!(dead[0].reason.contains("exceeded 3 deliveries"));
    }

    #[tokio::test]
    async fn test_max_items_limits_work() {
        let queue = Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        for i in 0..5 {
            queue.enqueue(&format!("ok-{}", i)).await.unwrap();
        }

        let mut config = config();
        config.max_items = Some(2);
        let stats = QueueWorker::new(queue.clone(), handler(0), config)
            .run(|_| {})
            .await
            .unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(queue.pending_bodies().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_flag_stops_continuous_worker() {
        let queue = Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut config = config();
        config.continuous = true;
        let worker = QueueWorker::new(queue, handler(0), config).with_shutdown(shutdown.clone());

        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let stats = tokio::time::timeout(Duration::from_secs(5), worker.run(|_| {}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.received, 0);
    }
}
