//! In-memory sink, used by tests and embedders that inspect results directly

use crate::error::SinkResult;
use crate::item::DirectoryResult;
use crate::sink::ResultSink;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Collects results in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<DirectoryResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every result emitted so far, in emission order
    pub fn results(&self) -> Vec<DirectoryResult> {
        self.results.lock().clone()
    }

    /// Most recent result for `path`
    pub fn find(&self, path: &str) -> Option<DirectoryResult> {
        self.results
            .lock()
            .iter()
            .rev()
            .find(|r| r.path == path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn emit(&self, result: &DirectoryResult) -> SinkResult<()> {
        self.results.lock().push(result.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
