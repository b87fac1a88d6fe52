//! Configuration types for acl-crawler
//!
//! Defines CLI arguments and the validated runtime configuration built
//! from them.

use crate::error::ConfigError;
use crate::queue::{RedisQueueConfig, DEFAULT_CREATE_QUEUE, DEFAULT_KEY_PREFIX, DEFAULT_VISIT_QUEUE};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum reasonable consumer task count
const MAX_CONCURRENCY: usize = 512;

/// Shortest lease that leaves room for one store round trip
const MIN_LEASE_SECS: u64 = 1;

/// Deliveries after which a message is dead-lettered without processing
pub const DEFAULT_MAX_DELIVERIES: u32 = 10;

/// Queue-driven recursive ACL crawler
#[derive(Parser, Debug, Clone)]
#[command(
    name = "acl-crawler",
    version,
    about = "Queue-driven recursive crawler that records directory and file ACLs",
    long_about = "Crawls a hierarchical namespace one directory level per queue message.\n\n\
                  Each visit records the directory's ACLs and the ACLs of the files\n\
                  directly inside it, then enqueues one message per child directory.\n\
                  Add workers to crawl faster; depth only grows the queue.",
    after_help = "EXAMPLES:\n    \
        # Seed a crawl of /data and run a worker until the queue drains\n    \
        acl-crawler --store-root /mnt/lake seed /data\n    \
        acl-crawler --store-root /mnt/lake work -o acls.db\n\n    \
        # Crawl in one process without Redis\n    \
        acl-crawler --store-root /mnt/lake crawl / -o acls.jsonl\n\n    \
        # Build a synthetic tree 3 levels deep with 4 children per level\n    \
        acl-crawler create /synthetic --max-depth 3 --dir-count 4\n    \
        acl-crawler build"
)]
pub struct CliArgs {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// Redis URL for queue coordination
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379", global = true)]
    pub redis: String,

    /// Host directory that logical paths are resolved against
    #[arg(long, env = "CRAWLER_STORE_ROOT", default_value = ".", global = true, value_name = "DIR")]
    pub store_root: PathBuf,

    /// Prefix for every Redis key
    #[arg(long, env = "CRAWLER_QUEUE_PREFIX", default_value = DEFAULT_KEY_PREFIX, global = true)]
    pub key_prefix: String,

    /// Queue carrying directory visit items
    #[arg(long, env = "VISIT_QUEUE", default_value = DEFAULT_VISIT_QUEUE, global = true)]
    pub visit_queue: String,

    /// Queue carrying tree creation items
    #[arg(long, env = "CREATE_QUEUE", default_value = DEFAULT_CREATE_QUEUE, global = true)]
    pub create_queue: String,

    /// Seconds a received message stays leased before redelivery
    #[arg(long, default_value = "300", global = true, value_name = "SECS")]
    pub lease: u64,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Enqueue the child directories of ROOT onto the visit queue
    Seed {
        /// Logical path to crawl from
        #[arg(value_name = "ROOT")]
        root: String,
    },

    /// Consume visit items from Redis and record results
    Work {
        /// Output file: .db/.sqlite for SQLite, anything else for JSON lines, - for stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Seed and crawl ROOT inside this process, without Redis
    Crawl {
        /// Logical path to crawl from
        #[arg(value_name = "ROOT")]
        root: String,

        /// Output file: .db/.sqlite for SQLite, anything else for JSON lines, - for stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Number of concurrent consumer tasks
        #[arg(short = 'c', long, default_value_t = default_concurrency(), value_name = "NUM")]
        concurrency: usize,

        /// Dead-letter a message after this many deliveries
        #[arg(long, default_value_t = DEFAULT_MAX_DELIVERIES, value_name = "NUM")]
        max_deliveries: u32,
    },

    /// Enqueue a root create item for a synthetic tree
    Create {
        /// Directory to build the tree under
        #[arg(value_name = "PATH")]
        path: String,

        /// Number of levels to create
        #[arg(long, value_name = "NUM")]
        max_depth: u32,

        /// Child directories per level
        #[arg(long, value_name = "NUM")]
        dir_count: u32,

        /// Child name pattern; {} or {index:N} is replaced by the child index
        #[arg(long, default_value = "dir{}", value_name = "PATTERN")]
        dir_pattern: String,

        /// Carried on every item; file creation is not performed
        #[arg(long, default_value = "0", value_name = "NUM")]
        file_count: u32,

        /// Carried on every item; ACL assignment is not performed
        #[arg(long, default_value = "0", value_name = "NUM")]
        acl_count: u32,

        #[arg(long)]
        create_files: bool,

        #[arg(long)]
        create_acls: bool,

        #[arg(long, default_value = "file{}", value_name = "PATTERN")]
        file_pattern: String,
    },

    /// Consume create items from Redis and build the synthetic tree
    Build {
        #[command(flatten)]
        worker: WorkerArgs,

        /// Consume create items without creating anything
        #[arg(long, env = "TREE_BUILDER_HALT")]
        halt: bool,
    },

    /// Serve the HTTP seeding endpoint
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1:8080", value_name = "ADDR")]
        bind: String,
    },

    /// Show queue status and statistics
    Status {
        /// Watch mode - continuously update status
        #[arg(short, long)]
        watch: bool,

        /// Update interval for watch mode (seconds)
        #[arg(long, default_value = "2", value_name = "SECS")]
        interval: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text", value_name = "FORMAT")]
        format: String,
    },

    /// Inspect or requeue dead-lettered messages
    Redrive {
        /// Queue to act on (defaults to the visit queue)
        #[arg(long, value_name = "NAME")]
        queue: Option<String>,

        /// Only list dead letters, do not requeue them
        #[arg(long)]
        list: bool,

        /// Maximum dead letters to list
        #[arg(long, default_value = "20", value_name = "NUM")]
        limit: usize,
    },
}

/// Options shared by the consuming subcommands
#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Number of concurrent consumer tasks
    #[arg(short = 'c', long, default_value_t = default_concurrency(), value_name = "NUM")]
    pub concurrency: usize,

    /// Worker ID (auto-generated if not specified)
    #[arg(long, value_name = "ID")]
    pub worker_id: Option<String>,

    /// Run continuously (don't exit when queue is empty)
    #[arg(long)]
    pub continuous: bool,

    /// Exit after handling N messages (for testing)
    #[arg(long, value_name = "NUM")]
    pub max_items: Option<u64>,

    /// Dead-letter a message after this many deliveries
    #[arg(long, default_value_t = DEFAULT_MAX_DELIVERIES, value_name = "NUM")]
    pub max_deliveries: u32,
}

fn default_concurrency() -> usize {
    num_cpus::get() * 2
}

/// Generate `<hostname>-<uuid8>`
pub fn generate_worker_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", hostname, &uuid[..8])
}

fn validate_queue_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

/// Where the queues live and how long leases last
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub redis_url: String,
    pub key_prefix: String,
    pub visit_queue: String,
    pub create_queue: String,
    pub lease: Duration,
}

impl QueueSettings {
    /// Validate the global CLI options
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if !args.redis.starts_with("redis://")
            && !args.redis.starts_with("rediss://")
            && !args.redis.starts_with("unix://")
        {
            return Err(ConfigError::InvalidRedisUrl(args.redis.clone()));
        }
        validate_queue_name(&args.key_prefix)?;
        validate_queue_name(&args.visit_queue)?;
        validate_queue_name(&args.create_queue)?;
        if args.lease < MIN_LEASE_SECS {
            return Err(ConfigError::InvalidLease {
                secs: args.lease,
                min: MIN_LEASE_SECS,
            });
        }

        Ok(Self {
            redis_url: args.redis.clone(),
            key_prefix: args.key_prefix.clone(),
            visit_queue: args.visit_queue.clone(),
            create_queue: args.create_queue.clone(),
            lease: Duration::from_secs(args.lease),
        })
    }

    /// Redis configuration for one named queue
    pub fn redis_config(&self, queue: &str) -> RedisQueueConfig {
        RedisQueueConfig {
            url: self.redis_url.clone(),
            key_prefix: self.key_prefix.clone(),
            queue: queue.to_string(),
            lease: self.lease,
            ..Default::default()
        }
    }
}

/// Configuration for a queue worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID, also the consumer name
    pub worker_id: String,
    /// Concurrent consumer tasks
    pub concurrency: usize,
    /// Dead-letter after this many deliveries
    pub max_deliveries: u32,
    /// How long one receive call waits for a message
    pub receive_wait: Duration,
    /// Heartbeat interval
    pub heartbeat_interval: Duration,
    /// Run continuously
    pub continuous: bool,
    /// Max messages to handle
    pub max_items: Option<u64>,
    /// Show progress
    pub show_progress: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            concurrency: 1,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            receive_wait: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            continuous: false,
            max_items: None,
            show_progress: false,
        }
    }
}

impl WorkerConfig {
    /// Create from CLI args
    pub fn from_worker_args(args: &WorkerArgs, quiet: bool) -> Result<Self, ConfigError> {
        let mut config = Self::with_concurrency(args.concurrency)?;
        if let Some(id) = &args.worker_id {
            config.worker_id = id.clone();
        }
        config.continuous = args.continuous;
        config.max_items = args.max_items;
        config.max_deliveries = args.max_deliveries.max(1);
        config.show_progress = !quiet;
        if config.continuous {
            config.receive_wait = Duration::from_secs(5);
        }
        Ok(config)
    }

    /// Defaults with a validated concurrency
    pub fn with_concurrency(concurrency: usize) -> Result<Self, ConfigError> {
        if concurrency == 0 || concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        Ok(Self {
            concurrency,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_worker_id_shape() {
        let id = generate_worker_id();
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert_ne!(generate_worker_id(), id);
    }

    #[test]
    fn test_concurrency_bounds() {
        assert!(WorkerConfig::with_concurrency(0).is_err());
        assert!(WorkerConfig::with_concurrency(MAX_CONCURRENCY + 1).is_err());
        assert_eq!(WorkerConfig::with_concurrency(4).unwrap().concurrency, 4);
    }

    #[test]
    fn test_queue_settings_from_args() {
        let args = parse(&["acl-crawler", "--lease", "30", "--key-prefix", "t1", "seed", "/a"]);
        let settings = QueueSettings::from_args(&args).unwrap();
        assert_eq!(settings.lease, Duration::from_secs(30));

        let redis = settings.redis_config(&settings.create_queue);
        assert_eq!(redis.stream_key(), "t1:create:stream");
    }

    #[test]
    fn test_queue_settings_rejects_bad_values() {
        let args = parse(&["acl-crawler", "--lease", "0", "seed", "/a"]);
        assert!(matches!(
            QueueSettings::from_args(&args),
            Err(ConfigError::InvalidLease { .. })
        ));

        let args = parse(&["acl-crawler", "--redis", "localhost:6379", "seed", "/a"]);
        assert!(matches!(
            QueueSettings::from_args(&args),
            Err(ConfigError::InvalidRedisUrl(_))
        ));

        let args = parse(&["acl-crawler", "--visit-queue", "a b", "seed", "/a"]);
        assert!(matches!(
            QueueSettings::from_args(&args),
            Err(ConfigError::InvalidQueueName(_))
        ));
    }

    #[test]
    fn test_worker_args() {
        let args = parse(&["acl-crawler", "work", "-c", "3", "--worker-id", "w1", "--continuous"]);
        let Command::Work { worker, output } = args.command else {
            panic!("expected work subcommand");
        };
        assert!(output.is_none());

        let config = WorkerConfig::from_worker_args(&worker, true).unwrap();
        assert_eq!(config.worker_id, "w1");
        assert_eq!(config.concurrency, 3);
        assert!(config.continuous);
        assert!(!config.show_progress);
        assert_eq!(config.max_deliveries, DEFAULT_MAX_DELIVERIES);
    }
}
