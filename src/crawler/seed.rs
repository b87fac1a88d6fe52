//! Seed dispatcher
//!
//! Starts a crawl by enqueuing one visit item per directory directly under
//! the root. Files at the root level are not crawled. Returns as soon as
//! the items are enqueued; it never waits for results.

use crate::error::Result;
use crate::item::VisitWorkItem;
use crate::queue::WorkQueue;
use crate::store::HierarchicalStore;

use std::sync::Arc;

/// Acknowledgment returned for a triggered crawl
pub fn trigger_message(root: &str) -> String {
    format!("Processing triggered for {}", root)
}

pub struct SeedDispatcher {
    store: Arc<dyn HierarchicalStore>,
    queue: Arc<dyn WorkQueue>,
}

impl SeedDispatcher {
    pub fn new(store: Arc<dyn HierarchicalStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Enqueue the root's child directories
    pub async fn dispatch(&self, root: &str) -> Result<String> {
        self.dispatch_counted(root).await?;
        Ok(trigger_message(root))
    }

    /// Same as [`dispatch`](Self::dispatch), returning how many items were enqueued
    pub async fn dispatch_counted(&self, root: &str) -> Result<u64> {
        let dir = self.store.resolve_directory(root).await.map_err(|e| {
            tracing::error!("Cannot seed {}: {}", root, e);
            e
        })?;
        let children = self.store.list_children(&dir).await?;

        let mut seeded = 0u64;
        let mut skipped = 0u64;
        for child in children {
            if !child.is_directory {
                skipped += 1;
                continue;
            }
            let body = VisitWorkItem::directory(child.path).to_json()?;
            self.queue.enqueue(&body).await?;
            seeded += 1;
        }

        tracing::info!(
            "Seeded {} directories under {} onto '{}' ({} root files skipped)",
            seeded,
            root,
            self.queue.name(),
            skipped
        );
        Ok(seeded)
    }
}
