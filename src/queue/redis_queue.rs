//! Redis-backed distributed queue implementation
//!
//! Uses Redis Streams for reliable message delivery with:
//! - At-least-once delivery semantics
//! - Consumer groups for parallel workers
//! - Automatic redelivery of messages whose lease expired (XAUTOCLAIM)
//! - A dead-letter stream for invalid messages
//!
//! Keys, for a queue named `visit` under the default prefix:
//!
//! ```text
//! acl-crawler:visit:stream      work items (field "body")
//! acl-crawler:visit:dead        dead letters (message_id, body, reason)
//! acl-crawler:visit:deliveries  hash of message id -> delivery count
//! acl-crawler:visit:stats       hash of counters
//! acl-crawler:visit:workers:<id> heartbeat, expires after heartbeat_timeout
//! ```

use crate::error::{QueueError, QueueResult};
use crate::queue::{DeadLetter, Delivery, LockToken, QueueStats, WorkQueue};

use redis::{
    aio::MultiplexedConnection,
    streams::{StreamId, StreamPendingReply, StreamRangeReply, StreamReadOptions, StreamReadReply},
    AsyncCommands, Client, RedisResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Default key prefix for namespacing
pub const DEFAULT_KEY_PREFIX: &str = "acl-crawler";

/// Consumer group name
pub const CONSUMER_GROUP: &str = "acl-crawler-workers";

/// Consumer that owns abandoned messages until someone reclaims them
const ABANDONED_CONSUMER: &str = "acl-crawler-abandoned";

/// Configuration for Redis queue
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
    /// Queue name (one stream per queue)
    pub queue: String,
    /// How long a received message stays claimed before it is redelivered
    pub lease: Duration,
    /// Worker heartbeat timeout (consider worker dead after this)
    pub heartbeat_timeout: Duration,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            queue: crate::queue::DEFAULT_VISIT_QUEUE.to_string(),
            lease: Duration::from_secs(300),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

impl RedisQueueConfig {
    /// Create config with custom Redis URL
    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Same connection settings, different queue
    pub fn for_queue(&self, queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            ..self.clone()
        }
    }

    pub fn stream_key(&self) -> String {
        format!("{}:{}:stream", self.key_prefix, self.queue)
    }

    pub fn dead_letter_key(&self) -> String {
        format!("{}:{}:dead", self.key_prefix, self.queue)
    }

    pub fn deliveries_key(&self) -> String {
        format!("{}:{}:deliveries", self.key_prefix, self.queue)
    }

    pub fn stats_key(&self) -> String {
        format!("{}:{}:stats", self.key_prefix, self.queue)
    }

    pub fn heartbeat_key(&self, worker_id: &str) -> String {
        format!("{}:{}:workers:{}", self.key_prefix, self.queue, worker_id)
    }
}

/// Connections kept per consumer name, opened on first use
pub(crate) struct ConnectionCache<C> {
    conns: Mutex<HashMap<String, C>>,
}

impl<C: Clone> ConnectionCache<C> {
    pub(crate) fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Cached connection for `consumer`, or a new one from `connect`
    pub(crate) async fn get_or_connect<F, Fut, E>(&self, consumer: &str, connect: F) -> Result<C, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<C, E>>,
    {
        let cached = self.conns.lock().get(consumer).cloned();
        if let Some(conn) = cached {
            return Ok(conn);
        }
        let conn = connect().await?;
        self.conns
            .lock()
            .entry(consumer.to_string())
            .or_insert_with(|| conn.clone());
        Ok(conn)
    }

    /// Forget a connection that failed, so the next call reconnects
    pub(crate) fn evict(&self, consumer: &str) {
        self.conns.lock().remove(consumer);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.conns.lock().len()
    }
}

/// Redis-backed distributed queue
pub struct RedisQueue {
    client: Client,
    connection: MultiplexedConnection,
    /// One blocking-read connection per consumer
    blocking: ConnectionCache<MultiplexedConnection>,
    config: RedisQueueConfig,
}

impl RedisQueue {
    /// Connect and make sure the stream and consumer group exist
    pub async fn new(config: RedisQueueConfig) -> QueueResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| {
            QueueError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            }
        })?;

        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            QueueError::ConnectionFailed {
                url: config.url.clone(),
                reason: e.to_string(),
            }
        })?;

        let queue = Self {
            client,
            connection,
            blocking: ConnectionCache::new(),
            config,
        };

        // Initialize consumer group (ignore if already exists)
        queue.init_consumer_group().await?;

        tracing::debug!("Connected to Redis queue {}", queue.config.stream_key());
        Ok(queue)
    }

    /// Queue configuration
    pub fn config(&self) -> &RedisQueueConfig {
        &self.config
    }

    async fn init_consumer_group(&self) -> QueueResult<()> {
        let mut conn = self.connection.clone();

        // MKSTREAM creates the stream if it doesn't exist
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.config.stream_key())
            .arg(CONSUMER_GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        // Ignore "BUSYGROUP" error (group already exists)
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::OperationFailed(e.to_string())),
        }
    }

    /// Dedicated connection for blocking reads, so a blocked XREADGROUP
    /// does not stall commands pipelined on the shared connection.
    /// Each consumer reuses its own across receives.
    async fn blocking_conn(&self, consumer: &str) -> QueueResult<MultiplexedConnection> {
        self.blocking
            .get_or_connect(consumer, move || async move {
                self.client.get_multiplexed_async_connection().await.map_err(|e| {
                    QueueError::ConnectionFailed {
                        url: self.config.url.clone(),
                        reason: e.to_string(),
                    }
                })
            })
            .await
    }

    fn lease_ms(&self) -> u64 {
        self.config.lease.as_millis() as u64
    }

    /// Turn a stream entry into a delivery, bumping its delivery count
    async fn to_delivery(&self, entry: StreamId) -> QueueResult<Delivery> {
        let mut conn = self.connection.clone();
        // Entries without a body are delivered as-is and fail decoding
        let body: String = entry.get("body").unwrap_or_default();
        let count: i64 = conn
            .hincr(self.config.deliveries_key(), &entry.id, 1)
            .await?;

        Ok(Delivery {
            message_id: entry.id.clone(),
            lock_token: LockToken(entry.id),
            body,
            delivery_count: count.max(1) as u32,
        })
    }

    /// Claim one message whose lease expired
    async fn claim_expired(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.connection.clone();

        let result: RedisResult<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(self.config.stream_key())
            .arg(CONSUMER_GROUP)
            .arg(consumer)
            .arg(self.lease_ms())
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await;

        let claimed = match result {
            Ok(value) => parse_autoclaim(value)?,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(None),
            Err(e) => return Err(QueueError::OperationFailed(e.to_string())),
        };

        match claimed.into_iter().next() {
            Some(entry) => {
                tracing::debug!("Reclaimed expired message {} for {}", entry.id, consumer);
                self.to_delivery(entry).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Read the stored entry for a lock token
    async fn load_entry(&self, token: &LockToken) -> QueueResult<StreamId> {
        let mut conn = self.connection.clone();
        let reply: StreamRangeReply = conn
            .xrange_count(self.config.stream_key(), &token.0, &token.0, 1)
            .await?;
        reply
            .ids
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::LockLost(token.to_string()))
    }

    /// Acknowledge and delete a settled entry
    async fn settle(&self, token: &LockToken) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let acked: i64 = conn
            .xack(self.config.stream_key(), CONSUMER_GROUP, &[&token.0])
            .await?;
        if acked == 0 {
            return Err(QueueError::LockLost(token.to_string()));
        }

        redis::pipe()
            .cmd("XDEL")
            .arg(self.config.stream_key())
            .arg(&token.0)
            .ignore()
            .cmd("HDEL")
            .arg(self.config.deliveries_key())
            .arg(&token.0)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn bump_stat(&self, field: &str, delta: i64) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        conn.hincr::<_, _, _, i64>(self.config.stats_key(), field, delta)
            .await?;
        Ok(())
    }
}

/// XAUTOCLAIM replies with `[next-id, entries]` (Redis 6.2) or
/// `[next-id, entries, deleted-ids]` (Redis 7+)
fn parse_autoclaim(value: redis::Value) -> QueueResult<Vec<StreamId>> {
    match value {
        redis::Value::Array(mut parts) if parts.len() >= 2 => {
            let claimed = parts.swap_remove(1);
            let reply: StreamRangeReply = redis::from_redis_value(&claimed)?;
            Ok(reply.ids)
        }
        redis::Value::Nil => Ok(Vec::new()),
        other => Err(QueueError::OperationFailed(format!(
            "unexpected XAUTOCLAIM reply: {:?}",
            other
        ))),
    }
}

#[async_trait::async_trait]
impl WorkQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.config.queue
    }

    async fn enqueue(&self, body: &str) -> QueueResult<()> {
        let mut conn = self.connection.clone();

        redis::cmd("XADD")
            .arg(self.config.stream_key())
            .arg("*")
            .arg("body")
            .arg(body)
            .query_async::<String>(&mut conn)
            .await?;

        self.bump_stat("total_enqueued", 1).await
    }

    async fn receive(&self, consumer: &str, wait: Duration) -> QueueResult<Option<Delivery>> {
        // Expired leases first, so abandoned work is not starved by new work
        if let Some(delivery) = self.claim_expired(consumer).await? {
            return Ok(Some(delivery));
        }

        let mut opts = StreamReadOptions::default()
            .group(CONSUMER_GROUP, consumer)
            .count(1);
        // BLOCK 0 would wait forever
        if !wait.is_zero() {
            opts = opts.block(wait.as_millis().max(1) as usize);
        }

        let mut conn = self.blocking_conn(consumer).await?;
        let result: StreamReadReply = match conn
            .xread_options(&[self.config.stream_key()], &[">"], &opts)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                self.blocking.evict(consumer);
                return Err(e.into());
            }
        };

        let entry = result
            .keys
            .into_iter()
            .flat_map(|stream| stream.ids)
            .next();

        match entry {
            Some(entry) => self.to_delivery(entry).await.map(Some),
            None => Ok(None),
        }
    }

    async fn complete(&self, token: &LockToken) -> QueueResult<()> {
        self.settle(token).await?;
        self.bump_stat("total_completed", 1).await
    }

    async fn abandon(&self, token: &LockToken) -> QueueResult<()> {
        let mut conn = self.connection.clone();

        // Backdate the idle time so the next XAUTOCLAIM picks it up
        let claimed: Vec<String> = redis::cmd("XCLAIM")
            .arg(self.config.stream_key())
            .arg(CONSUMER_GROUP)
            .arg(ABANDONED_CONSUMER)
            .arg(0)
            .arg(&token.0)
            .arg("IDLE")
            .arg(self.lease_ms())
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;

        if claimed.is_empty() {
            return Err(QueueError::LockLost(token.to_string()));
        }
        self.bump_stat("total_abandoned", 1).await
    }

    async fn dead_letter(&self, token: &LockToken, reason: &str) -> QueueResult<()> {
        let entry = self.load_entry(token).await?;
        let body: String = entry.get("body").unwrap_or_default();

        let mut conn = self.connection.clone();
        redis::cmd("XADD")
            .arg(self.config.dead_letter_key())
            .arg("*")
            .arg("message_id")
            .arg(&token.0)
            .arg("body")
            .arg(&body)
            .arg("reason")
            .arg(reason)
            .query_async::<String>(&mut conn)
            .await?;

        self.settle(token).await
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.connection.clone();

        let stream_len: u64 = conn.xlen(self.config.stream_key()).await?;
        let dead_len: u64 = conn.xlen(self.config.dead_letter_key()).await?;
        let pending: StreamPendingReply = conn
            .xpending(self.config.stream_key(), CONSUMER_GROUP)
            .await?;
        let in_flight = pending.count() as u64;

        let values: Vec<Option<i64>> = redis::cmd("HMGET")
            .arg(self.config.stats_key())
            .arg("total_enqueued")
            .arg("total_completed")
            .arg("total_abandoned")
            .query_async(&mut conn)
            .await?;

        // Count active workers by scanning heartbeat keys
        let pattern = self.config.heartbeat_key("*");
        let keys: Vec<String> = conn.keys(&pattern).await?;

        let counter = |idx: usize| values.get(idx).copied().flatten().unwrap_or(0).max(0) as u64;

        Ok(QueueStats {
            // Settled entries are deleted, so the stream holds waiting + in-flight
            pending: stream_len.saturating_sub(in_flight),
            in_flight,
            dead_lettered: dead_len,
            total_enqueued: counter(0),
            total_completed: counter(1),
            total_abandoned: counter(2),
            active_workers: keys.len() as u64,
        })
    }

    async fn heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let key = self.config.heartbeat_key(worker_id);
        let timeout_secs = self.config.heartbeat_timeout.as_secs();

        conn.set_ex::<_, _, ()>(&key, chrono::Utc::now().timestamp(), timeout_secs)
            .await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        let mut conn = self.connection.clone();
        let reply: StreamRangeReply = conn
            .xrange_count(self.config.dead_letter_key(), "-", "+", limit)
            .await?;

        Ok(reply
            .ids
            .into_iter()
            .map(|entry| DeadLetter {
                message_id: entry.get("message_id").unwrap_or_else(|| entry.id.clone()),
                body: entry.get("body").unwrap_or_default(),
                reason: entry.get("reason").unwrap_or_default(),
            })
            .collect())
    }

    async fn redrive(&self) -> QueueResult<u64> {
        let mut conn = self.connection.clone();
        let reply: StreamRangeReply = conn.xrange_all(self.config.dead_letter_key()).await?;

        let mut moved = 0u64;
        for entry in reply.ids {
            let body: String = entry.get("body").unwrap_or_default();
            self.enqueue(&body).await?;
            conn.xdel::<_, _, i64>(self.config.dead_letter_key(), &[&entry.id])
                .await?;
            moved += 1;
        }

        if moved > 0 {
            tracing::info!("Redrove {} dead-lettered message(s) on {}", moved, self.config.queue);
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration tests would require a running Redis instance
    // These are unit tests for the configuration

    #[test]
    fn test_config_defaults() {
        let config = RedisQueueConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.queue, "visit");
        assert_eq!(config.lease, Duration::from_secs(300));
    }

    #[test]
    fn test_config_keys() {
        let config = RedisQueueConfig::with_url("redis://custom:6380").for_queue("create");
        assert_eq!(config.url, "redis://custom:6380");
        assert_eq!(config.stream_key(), "acl-crawler:create:stream");
        assert_eq!(config.dead_letter_key(), "acl-crawler:create:dead");
        assert_eq!(config.heartbeat_key("w1"), "acl-crawler:create:workers:w1");
        assert_eq!(
            config.for_queue("visit").heartbeat_key("*"),
            "acl-crawler:visit:workers:*"
        );
    }

    #[test]
    fn test_parse_autoclaim_shapes() {
        let entry = redis::Value::Array(vec![
            redis::Value::BulkString(b"1-0".to_vec()),
            redis::Value::Array(vec![
                redis::Value::BulkString(b"body".to_vec()),
                redis::Value::BulkString(b"{}".to_vec()),
            ]),
        ]);

        // Redis 7 shape with deleted ids
        let reply = redis::Value::Array(vec![
            redis::Value::BulkString(b"0-0".to_vec()),
            redis::Value::Array(vec![entry.clone()]),
            redis::Value::Array(vec![]),
        ]);
        let claimed = parse_autoclaim(reply).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "1-0");
        assert_eq!(claimed[0].get::<String>("body").as_deref(), Some("{}"));

        // Redis 6.2 shape, nothing claimed
        let reply = redis::Value::Array(vec![
            redis::Value::BulkString(b"0-0".to_vec()),
            redis::Value::Array(vec![]),
        ]);
        assert!(parse_autoclaim(reply).unwrap().is_empty());

        assert!(parse_autoclaim(redis::Value::Nil).unwrap().is_empty());
        assert!(parse_autoclaim(redis::Value::Int(1)).is_err());
    }

    #[tokio::test]
    async fn test_connection_cache_reuses_per_consumer() {
        let cache: ConnectionCache<u32> = ConnectionCache::new();
        let counter = std::sync::atomic::AtomicU32::new(0);
        let opened = &counter;
        let connect = move || async move {
            Ok::<_, QueueError>(opened.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        };

        assert_eq!(cache.get_or_connect("w-0", connect).await.unwrap(), 0);
        assert_eq!(cache.get_or_connect("w-0", connect).await.unwrap(), 0);
        assert_eq!(cache.get_or_connect("w-1", connect).await.unwrap(), 1);
        assert_eq!(cache.len(), 2);

        cache.evict("w-0");
        assert_eq!(cache.get_or_connect("w-0", connect).await.unwrap(), 2);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
