//! Shared client handles
//!
//! Store, queue and sink clients are created once per process, on first
//! use, and then shared by every handler invocation. Handlers receive the
//! handles explicitly; nothing here is global.

use crate::config::QueueSettings;
use crate::crawler::{DirectoryVisitHandler, SeedDispatcher, TreeBuilder};
use crate::error::Result;
use crate::queue::{RedisQueue, WorkQueue};
use crate::sink::{open_sink, ResultSink};
use crate::store::{HierarchicalStore, LocalStore};

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct SharedClients {
    settings: QueueSettings,
    store_root: PathBuf,
    output: Option<PathBuf>,
    store: OnceCell<Arc<dyn HierarchicalStore>>,
    visit_queue: OnceCell<Arc<dyn WorkQueue>>,
    create_queue: OnceCell<Arc<dyn WorkQueue>>,
    sink: OnceCell<Arc<dyn ResultSink>>,
}

impl SharedClients {
    /// Lazily connect to a local store and Redis queues
    pub fn new(settings: QueueSettings, store_root: PathBuf, output: Option<PathBuf>) -> Self {
        Self {
            settings,
            store_root,
            output,
            store: OnceCell::new(),
            visit_queue: OnceCell::new(),
            create_queue: OnceCell::new(),
            sink: OnceCell::new(),
        }
    }

    /// Use already constructed clients
    pub fn from_parts(
        settings: QueueSettings,
        store: Arc<dyn HierarchicalStore>,
        visit_queue: Arc<dyn WorkQueue>,
        create_queue: Arc<dyn WorkQueue>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            settings,
            store_root: PathBuf::new(),
            output: None,
            store: OnceCell::from(store),
            visit_queue: OnceCell::from(visit_queue),
            create_queue: OnceCell::from(create_queue),
            sink: OnceCell::from(sink),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub async fn store(&self) -> Result<Arc<dyn HierarchicalStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let store = LocalStore::open(&self.store_root)?;
                tracing::debug!("Opened store {}", store.root().display());
                Ok::<_, crate::error::CrawlerError>(Arc::new(store) as Arc<dyn HierarchicalStore>)
            })
            .await?;
        Ok(store.clone())
    }

    pub async fn visit_queue(&self) -> Result<Arc<dyn WorkQueue>> {
        let name = self.settings.visit_queue.clone();
        self.queue(&self.visit_queue, &name).await
    }

    pub async fn create_queue(&self) -> Result<Arc<dyn WorkQueue>> {
        let name = self.settings.create_queue.clone();
        self.queue(&self.create_queue, &name).await
    }

    async fn queue(
        &self,
        cell: &OnceCell<Arc<dyn WorkQueue>>,
        name: &str,
    ) -> Result<Arc<dyn WorkQueue>> {
        let queue = cell
            .get_or_try_init(|| async {
                let queue = RedisQueue::new(self.settings.redis_config(name)).await?;
                Ok::<_, crate::error::CrawlerError>(Arc::new(queue) as Arc<dyn WorkQueue>)
            })
            .await?;
        Ok(queue.clone())
    }

    pub async fn sink(&self) -> Result<Arc<dyn ResultSink>> {
        let sink = self
            .sink
            .get_or_try_init(|| open_sink(self.output.as_deref()))
            .await?;
        Ok(sink.clone())
    }

    pub async fn seed_dispatcher(&self) -> Result<SeedDispatcher> {
        Ok(SeedDispatcher::new(self.store().await?, self.visit_queue().await?))
    }

    pub async fn visit_handler(&self) -> Result<DirectoryVisitHandler> {
        Ok(DirectoryVisitHandler::new(
            self.store().await?,
            self.visit_queue().await?,
            self.sink().await?,
        ))
    }

    pub async fn tree_builder(&self) -> Result<TreeBuilder> {
        Ok(TreeBuilder::new(self.store().await?, self.create_queue().await?))
    }
}
