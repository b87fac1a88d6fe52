//! Directory visit handler
//!
//! One visit item in, one [`DirectoryResult`] out, plus one new visit item
//! per child directory. The handler never recurses: deeper levels are
//! reached by later deliveries of the items it enqueues.

use crate::error::{ProtocolError, Result};
use crate::item::{DirectoryResult, FileResult, VisitWorkItem};
use crate::queue::WorkQueue;
use crate::sink::ResultSink;
use crate::store::HierarchicalStore;
use crate::worker::{HandleOutcome, MessageHandler};

use std::sync::Arc;
use std::time::Instant;

/// Outcome of visiting one directory level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub result: DirectoryResult,
    /// Child directories still to be visited, in listing order
    pub children: Vec<VisitWorkItem>,
}

/// Visit one directory level using only the store.
///
/// Directory children become new visit items without an ACL lookup;
/// file children have their ACLs fetched and appended to the result.
pub async fn visit_directory(store: &dyn HierarchicalStore, item: &VisitWorkItem) -> Result<Visit> {
    if !item.is_directory {
        return Err(ProtocolError::NotADirectory {
            path: item.path.clone(),
        }
        .into());
    }

    let path = item.path.as_str();

    let start = Instant::now();
    let dir = store.resolve_directory(path).await.map_err(|e| {
        tracing::warn!("Failed to resolve directory {}: {}", path, e);
        e
    })?;
    tracing::debug!("Resolved {} in {} ms", path, start.elapsed().as_millis());

    let start = Instant::now();
    let acls = store.get_acl(path).await.map_err(|e| {
        tracing::warn!("Failed to get ACL for {}: {}", path, e);
        e
    })?;
    tracing::debug!("Fetched ACL for {} in {} ms", path, start.elapsed().as_millis());

    let start = Instant::now();
    let entries = store.list_children(&dir).await.map_err(|e| {
        tracing::warn!("Failed to list {}: {}", path, e);
        e
    })?;
    tracing::debug!(
        "Listed {} ({} entries) in {} ms",
        path,
        entries.len(),
        start.elapsed().as_millis()
    );

    let mut result = DirectoryResult::new(path);
    result.acls = acls;
    let mut children = Vec::new();

    for entry in entries {
        if entry.is_directory {
            children.push(VisitWorkItem::directory(entry.path));
            continue;
        }

        let file = store.resolve_file(&entry.path).await?;
        let acls = store.get_acl(&file.path).await.map_err(|e| {
            tracing::warn!("Failed to get ACL for file {}: {}", entry.path, e);
            e
        })?;
        result.files.push(FileResult {
            name: entry.path,
            acls,
        });
    }

    Ok(Visit { result, children })
}

/// Processes visit deliveries: visits, fans out, then emits the result
pub struct DirectoryVisitHandler {
    store: Arc<dyn HierarchicalStore>,
    queue: Arc<dyn WorkQueue>,
    sink: Arc<dyn ResultSink>,
}

impl DirectoryVisitHandler {
    pub fn new(
        store: Arc<dyn HierarchicalStore>,
        queue: Arc<dyn WorkQueue>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self { store, queue, sink }
    }

    /// Visit one item. Children are enqueued before the result is emitted,
    /// and any failure leaves the delivery unsettled so it is retried.
    pub async fn process(&self, item: &VisitWorkItem) -> Result<HandleOutcome> {
        let start = Instant::now();
        let visit = visit_directory(self.store.as_ref(), item).await?;

        for child in &visit.children {
            let body = child.to_json()?;
            self.queue.enqueue(&body).await.map_err(|e| {
                tracing::error!("Failed to enqueue {} from {}: {}", child.path, item.path, e);
                e
            })?;
        }

        self.sink.emit(&visit.result).await.map_err(|e| {
            tracing::error!("Failed to emit result for {}: {}", item.path, e);
            e
        })?;

        tracing::info!(
            "Visited {} ({} files, {} subdirectories) in {} ms",
            item.path,
            visit.result.files.len(),
            visit.children.len(),
            start.elapsed().as_millis()
        );

        Ok(HandleOutcome {
            directories: 1,
            files: visit.result.files.len() as u64,
            children: visit.children.len() as u64,
        })
    }
}

#[async_trait::async_trait]
impl MessageHandler for DirectoryVisitHandler {
    fn name(&self) -> &str {
        "visit"
    }

    async fn handle(&self, body: &str) -> Result<HandleOutcome> {
        let item = VisitWorkItem::from_json(body)?;
        self.process(&item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CrawlerError;
    use crate::item::AclEntry;
    use crate::queue::MemoryQueue;
    use crate::sink::MemorySink;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn fixture() -> (Arc<MemoryStore>, Arc<MemoryQueue>, Arc<MemorySink>, DirectoryVisitHandler) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new("visit", Duration::from_secs(30)));
        let sink = Arc::new(MemorySink::new());
        let handler = DirectoryVisitHandler::new(store.clone(), queue.clone(), sink.clone());
        (store, queue, sink, handler)
    }

    #[tokio::test]
    async fn test_visit_directory_splits_files_and_dirs() {
        let store = MemoryStore::new();
        store
            .add_dir("/a/b", vec![AclEntry::user("u2", "rw")])
            .add_file("/a/b/x", vec![AclEntry::user("u3", "r")])
            .add_dir("/a/b/c", vec![]);

        let visit = visit_directory(&store, &VisitWorkItem::directory("/a/b"))
            .await
            .unwrap();

        assert_eq!(visit.result.acls, vec![AclEntry::user("u2", "rw")]);
        assert_eq!(visit.result.files.len(), 1);
        assert_eq!(visit.result.files[0].name, "/a/b/x");
        assert_eq!(visit.children, vec![VisitWorkItem::directory("/a/b/c")]);
    }

    #[tokio::test]
    async fn test_file_item_is_terminal() {
        let (store, queue, sink, handler) = fixture();
        store.add_file("/a/f", vec![]);

        let err = handler
            .handle(r#"{"path":"/a/f","isDirectory":false}"#)
            .await
            .unwrap_err();
        assert!(err.is_terminal());
        assert!(sink.is_empty());
        assert!(queue.pending_bodies().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_terminal() {
        let (_store, _queue, _sink, handler) = fixture();
        let err = handler.handle("not json").await.unwrap_err();
        assert!(matches!(err, CrawlerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_store_failure_emits_nothing() {
        let (store, queue, sink, handler) = fixture();
        store.add_dir("/a", vec![]).add_dir("/a/b", vec![]);
        store.fail_path("/a");

        let err = handler.process(&VisitWorkItem::directory("/a")).await.unwrap_err();
        assert!(!err.is_terminal());
        assert!(sink.is_empty());
        assert!(queue.pending_bodies().is_empty());
    }

    #[tokio::test]
    async fn test_failing_file_acl_fails_the_visit() {
        let (store, queue, sink, handler) = fixture();
        store.add_dir("/a/sub", vec![]).add_file("/a/z", vec![]);
        store.fail_path("/a/z");

        assert!(handler.process(&VisitWorkItem::directory("/a")).await.is_err());
        assert!(sink.is_empty());
        // Fan-out happens after the whole level was read
        assert!(queue.pending_bodies().is_empty());
    }
}
