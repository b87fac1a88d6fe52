//! JSON lines sink: one `DirectoryResult` object per line

use crate::error::SinkResult;
use crate::item::DirectoryResult;
use crate::sink::ResultSink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Appends results to a file or stdout
pub struct JsonLinesSink {
    writer: Mutex<Writer>,
    target: Option<PathBuf>,
    lines: AtomicU64,
}

impl JsonLinesSink {
    /// Append to `path`, creating it if needed
    pub async fn create(path: &Path) -> SinkResult<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            writer: Mutex::new(Box::new(file)),
            target: Some(path.to_path_buf()),
            lines: AtomicU64::new(0),
        })
    }

    /// Write to standard output
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(tokio::io::stdout())),
            target: None,
            lines: AtomicU64::new(0),
        }
    }

    /// Lines written so far
    pub fn lines_written(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn emit(&self, result: &DirectoryResult) -> SinkResult<()> {
        let mut line = result.to_json()?;
        line.push('\n');

        // One lock per line keeps concurrent emitters from interleaving
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        self.lines.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.target {
            Some(path) => format!("jsonl:{}", path.display()),
            None => "jsonl:stdout".to_string(),
        }
    }
}
