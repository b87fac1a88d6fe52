//! Result sinks
//!
//! Every visited directory produces one [`DirectoryResult`]. A sink is
//! where it goes once the visit succeeded. Results may arrive more than
//! once for the same path (queue redelivery), so sinks either append
//! (JSON lines) or overwrite by path (SQLite).

mod jsonl;
mod memory;
mod sqlite;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use sqlite::SqliteSink;

use crate::error::{ConfigError, SinkResult};
use crate::item::DirectoryResult;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Destination for finished directory results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Record one result. Returns only once the result is durable enough
    /// for the delivery to be acknowledged.
    async fn emit(&self, result: &DirectoryResult) -> SinkResult<()>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Open a sink for an output path.
///
/// `-` or no path writes JSON lines to stdout, `.db`/`.sqlite`/`.sqlite3`
/// opens a SQLite database, anything else appends JSON lines to a file.
pub async fn open_sink(output: Option<&Path>) -> crate::error::Result<Arc<dyn ResultSink>> {
    let path = match output {
        None => return Ok(Arc::new(JsonLinesSink::stdout())),
        Some(p) if p.as_os_str() == "-" => return Ok(Arc::new(JsonLinesSink::stdout())),
        Some(p) => p,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(ConfigError::InvalidOutputPath {
                path: path.to_path_buf(),
                reason: format!("Parent directory does not exist: {}", parent.display()),
            }
            .into());
        }
    }

    let is_sqlite = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db" | "sqlite" | "sqlite3")
    );

    if is_sqlite {
        Ok(Arc::new(SqliteSink::open(path)?))
    } else {
        Ok(Arc::new(JsonLinesSink::create(path).await?))
    }
}
