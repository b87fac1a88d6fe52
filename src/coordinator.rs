//! Coordinator for system-wide monitoring and dead-letter control

use crate::error::{ConfigError, Result};
use crate::queue::{DeadLetter, QueueStats, WorkQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Statistics for one named queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: String,
    pub stats: QueueStats,
}

/// System-wide status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub queues: Vec<QueueStatus>,
    /// System health (idle, healthy, degraded, critical)
    pub health: String,
    /// Timestamp of this status
    pub timestamp: DateTime<Utc>,
    /// Messages/warnings
    pub messages: Vec<String>,
}

/// Watches and controls a set of queues
pub struct Coordinator {
    queues: Vec<Arc<dyn WorkQueue>>,
}

impl Coordinator {
    pub fn new(queues: Vec<Arc<dyn WorkQueue>>) -> Self {
        Self { queues }
    }

    /// Get system status
    pub async fn status(&self) -> Result<SystemStatus> {
        let mut queues = Vec::with_capacity(self.queues.len());
        let mut messages = Vec::new();

        for queue in &self.queues {
            let stats = queue.stats().await?;

            if stats.dead_lettered > 0 {
                messages.push(format!(
                    "{} message(s) dead-lettered on '{}' - inspect with 'acl-crawler redrive --list --queue {}'",
                    stats.dead_lettered,
                    queue.name(),
                    queue.name()
                ));
            }
            if stats.active_workers == 0 && stats.pending > 0 {
                messages.push(format!(
                    "No active workers but '{}' has pending messages - start workers to process them",
                    queue.name()
                ));
            }

            queues.push(QueueStatus {
                name: queue.name().to_string(),
                stats,
            });
        }

        Ok(SystemStatus {
            health: determine_health(&queues),
            queues,
            timestamp: Utc::now(),
            messages,
        })
    }

    fn find(&self, name: &str) -> Result<&Arc<dyn WorkQueue>> {
        self.queues
            .iter()
            .find(|q| q.name() == name)
            .ok_or_else(|| ConfigError::InvalidQueueName(name.to_string()).into())
    }

    /// Dead-lettered messages on one queue
    pub async fn dead_letters(&self, queue: &str, limit: usize) -> Result<Vec<DeadLetter>> {
        Ok(self.find(queue)?.dead_letters(limit).await?)
    }

    /// Requeue every dead-lettered message on one queue
    pub async fn redrive(&self, queue: &str) -> Result<u64> {
        Ok(self.find(queue)?.redrive().await?)
    }
}

fn determine_health(queues: &[QueueStatus]) -> String {
    let mut health = "idle";

    for QueueStatus { stats, .. } in queues {
        if stats.is_idle() && stats.dead_lettered == 0 {
            continue;
        }
        if stats.active_workers == 0 && stats.pending > 0 {
            return "critical".to_string();
        }
        if stats.dead_lettered > stats.total_completed / 10 {
            health = "degraded";
        } else if health == "idle" {
            health = "healthy";
        }
    }

    health.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use std::time::Duration;

    fn queue(name: &str) -> Arc<MemoryQueue> {
        Arc::new(MemoryQueue::new(name, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn test_status_health() {
        let visit = queue("visit");
        let coordinator = Coordinator::new(vec![visit.clone(), queue("create")]);

        let status = coordinator.status().await.unwrap();
        assert_eq!(status.health, "idle");
        assert_eq!(status.queues.len(), 2);

        visit.enqueue("{}").await.unwrap();
        let status = coordinator.status().await.unwrap();
        assert_eq!(status.health, "critical");
        assert_eq!(status.messages.len(), 1);

        visit.heartbeat("w1").await.unwrap();
        assert_eq!(coordinator.status().await.unwrap().health, "healthy");
    }

    #[tokio::test]
    async fn test_redrive_by_name() {
        let visit = queue("visit");
        visit.enqueue("x").await.unwrap();
        let delivery = visit.receive("w1", Duration::ZERO).await.unwrap().unwrap();
        visit.dead_letter(&delivery.lock_token, "bad").await.unwrap();

        let coordinator = Coordinator::new(vec![visit.clone()]);
        assert_eq!(coordinator.status().await.unwrap().health, "degraded");
        assert_eq!(coordinator.dead_letters("visit", 5).await.unwrap().len(), 1);
        assert_eq!(coordinator.redrive("visit").await.unwrap(), 1);
        assert_eq!(visit.pending_bodies(), vec!["x"]);
        assert!(coordinator.redrive("nope").await.is_err());
    }
}
