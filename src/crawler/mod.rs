//! Crawl engine
//!
//! The crawl is a trampoline over a queue: every handler invocation takes
//! one item and returns one result plus the next items, which go back on
//! the queue instead of onto the call stack.
//!
//! - [`SeedDispatcher`]: enqueues the root's child directories
//! - [`DirectoryVisitHandler`]: visits one directory level per message
//! - [`TreeBuilder`]: builds synthetic trees with the same fan-out shape

mod builder;
mod seed;
mod visit;

pub use builder::TreeBuilder;
pub use seed::{trigger_message, SeedDispatcher};
pub use visit::{visit_directory, DirectoryVisitHandler, Visit};

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::queue::{MemoryQueue, WorkQueue, DEFAULT_VISIT_QUEUE};
use crate::sink::ResultSink;
use crate::store::HierarchicalStore;
use crate::worker::{QueueWorker, WorkerProgress, WorkerStats};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Crawl `root` inside this process using an in-memory queue.
///
/// Seeds the queue, then runs a non-continuous worker until the queue is
/// idle. Returns the worker's statistics.
pub async fn crawl_in_process<F>(
    store: Arc<dyn HierarchicalStore>,
    sink: Arc<dyn ResultSink>,
    root: &str,
    mut config: WorkerConfig,
    lease: Duration,
    shutdown: Arc<AtomicBool>,
    progress_callback: F,
) -> Result<WorkerStats>
where
    F: Fn(WorkerProgress) + Send + Sync + 'static,
{
    let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new(DEFAULT_VISIT_QUEUE, lease));

    let seeded = SeedDispatcher::new(store.clone(), queue.clone())
        .dispatch_counted(root)
        .await?;
    if seeded == 0 {
        tracing::info!("No directories under {}, nothing to crawl", root);
    }

    // A local queue only drains while this worker runs
    config.continuous = false;
    config.max_items = None;

    let handler = Arc::new(DirectoryVisitHandler::new(store, queue.clone(), sink));
    QueueWorker::new(queue, handler, config)
        .with_shutdown(shutdown)
        .run(progress_callback)
        .await
}
