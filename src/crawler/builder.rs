//! Synthetic tree builder
//!
//! Creates test trees with the same fan-out shape as the crawl: each
//! create item makes `dirCount` children under its path and enqueues one
//! create item per child, one level deeper, until `maxDepth` is reached.

use crate::error::Result;
use crate::item::CreateWorkItem;
use crate::queue::WorkQueue;
use crate::store::HierarchicalStore;
use crate::worker::{HandleOutcome, MessageHandler};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct TreeBuilder {
    store: Arc<dyn HierarchicalStore>,
    queue: Arc<dyn WorkQueue>,
    halt: Arc<AtomicBool>,
}

impl TreeBuilder {
    pub fn new(store: Arc<dyn HierarchicalStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            store,
            queue,
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an existing kill switch
    pub fn with_halt(mut self, halt: Arc<AtomicBool>) -> Self {
        self.halt = halt;
        self
    }

    /// Kill switch: while set, every create item is consumed without effect
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    /// Create one level. Returns the number of child items enqueued.
    ///
    /// A creation or enqueue failure stops the remaining siblings; items
    /// already enqueued stay enqueued.
    pub async fn build(&self, item: &CreateWorkItem) -> Result<u64> {
        if item.is_exhausted() {
            tracing::debug!(
                "Depth {} reached max {} at {}, nothing to create",
                item.current_depth,
                item.max_depth,
                item.path
            );
            return Ok(0);
        }

        if self.halt.load(Ordering::Relaxed) {
            tracing::debug!("Tree builder halted, dropping create item for {}", item.path);
            return Ok(0);
        }

        item.validate_pattern()?;

        if item.create_files || item.create_acls {
            tracing::debug!(
                "File and ACL creation is not supported, ignoring fileCount={} aclCount={} filePattern='{}' for {}",
                item.file_count,
                item.acl_count,
                item.file_pattern,
                item.path
            );
        }

        let mut enqueued = 0u64;
        for index in 0..item.dir_count {
            let name = item.child_name(index);
            self.store
                .create_subdirectory(&item.path, &name)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create {} under {}: {}", name, item.path, e);
                    e
                })?;

            let child = item.child(&name);
            self.queue.enqueue(&child.to_json()?).await?;
            enqueued += 1;
        }

        tracing::info!(
            "Created {} directories under {} (depth {}/{})",
            enqueued,
            item.path,
            item.current_depth + 1,
            item.max_depth
        );
        Ok(enqueued)
    }
}

#[async_trait::async_trait]
impl MessageHandler for TreeBuilder {
    fn name(&self) -> &str {
        "create"
    }

    async fn handle(&self, body: &str) -> Result<HandleOutcome> {
        let item = CreateWorkItem::from_json(body)?;
        let created = self.build(&item).await?;
        Ok(HandleOutcome {
            directories: created,
            files: 0,
            children: created,
        })
    }
}
