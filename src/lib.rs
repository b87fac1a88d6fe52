//! acl-crawler - Queue-driven recursive ACL crawler
//!
//! Records the access control entries of every directory in a hierarchical
//! storage namespace, together with the ACLs of the files directly inside
//! each directory.
//!
//! # Features
//!
//! - **No recursion**: each queue message visits exactly one directory
//!   level and enqueues one message per child directory. Tree depth turns
//!   into queue depth, never stack depth.
//!
//! - **Horizontal scale**: any number of stateless workers drain the same
//!   Redis Streams queue; leases that expire are redelivered.
//!
//! - **At-least-once**: a failed visit is redelivered and re-runs in full.
//!   Sinks tolerate duplicates (SQLite overwrites by path).
//!
//! - **Synthetic trees**: the tree builder creates test hierarchies with
//!   the same fan-out shape through the same queue machinery.
//!
//! # Architecture
//!
//! ```text
//!   seed /data ──► ┌───────────────────────────┐
//!                  │   visit queue (streams)   │ ◄──────────┐
//!                  └─────────────┬─────────────┘            │
//!                                │ lease                    │ child dirs
//!                                ▼                          │
//!                  ┌───────────────────────────┐            │
//!                  │  DirectoryVisitHandler    │────────────┘
//!                  │  resolve, ACL, list       │
//!                  └─────────────┬─────────────┘
//!                                │ DirectoryResult
//!                                ▼
//!                  ┌───────────────────────────┐
//!                  │  sink (SQLite / JSONL)    │
//!                  └───────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Seed and drain with Redis
//! acl-crawler --store-root /mnt/lake seed /data
//! acl-crawler --store-root /mnt/lake work -c 16 -o acls.db
//!
//! # Query results
//! sqlite3 acls.db "SELECT path, acls FROM directories"
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod item;
pub mod progress;
pub mod queue;
pub mod server;
pub mod sink;
pub mod store;
pub mod worker;

pub use config::{CliArgs, QueueSettings, WorkerConfig};
pub use crawler::{DirectoryVisitHandler, SeedDispatcher, TreeBuilder};
pub use error::{CrawlerError, Result};
pub use item::{AclEntry, CreateWorkItem, DirectoryResult, FileResult, VisitWorkItem};
