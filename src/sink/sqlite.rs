//! SQLite result sink
//!
//! Results are keyed by path and written with `INSERT OR REPLACE`, so a
//! redelivered directory overwrites its earlier rows instead of
//! duplicating them. ACL lists are stored as JSON arrays of structured
//! entries, so ids containing `:` survive a round trip.
//!
//! rusqlite is synchronous; each emit runs on the blocking pool while
//! holding the connection lock.

use crate::error::{SinkError, SinkResult};
use crate::item::{AclEntry, DirectoryResult};
use crate::sink::ResultSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current schema version
pub const SCHEMA_VERSION: u32 = 1;

const CREATE_DIRECTORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS directories (
    path TEXT PRIMARY KEY,
    acls TEXT NOT NULL,           -- JSON array of AclEntry objects
    file_count INTEGER NOT NULL,
    crawled_at INTEGER NOT NULL   -- Unix timestamp
)
"#;

const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    directory TEXT NOT NULL,
    acls TEXT NOT NULL
)
"#;

const CREATE_CRAWL_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS crawl_info (
    key TEXT PRIMARY KEY,
    value TEXT
)
"#;

const CREATE_INDEXES: &[&str] = &["CREATE INDEX IF NOT EXISTS idx_files_directory ON files(directory)"];

/// WAL lets readers query while workers write
const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA busy_timeout = 5000;
"#;

/// Writes results into a SQLite database
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

fn render_acls(acls: &[AclEntry]) -> SinkResult<String> {
    Ok(serde_json::to_string(acls)?)
}

fn parse_acls(text: &str) -> SinkResult<Vec<AclEntry>> {
    Ok(serde_json::from_str(text)?)
}

impl SqliteSink {
    /// Open (or create) a database and its schema
    pub fn open(path: &Path) -> SinkResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS)?;
        conn.execute(CREATE_DIRECTORIES_TABLE, [])?;
        conn.execute(CREATE_FILES_TABLE, [])?;
        conn.execute(CREATE_CRAWL_INFO_TABLE, [])?;
        for sql in CREATE_INDEXES {
            conn.execute(sql, [])?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO crawl_info (key, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION.to_string()],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO crawl_info (key, value) VALUES ('crawler_version', ?1)",
            [env!("CARGO_PKG_VERSION")],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        })
    }

    /// Number of directories recorded
    pub fn directory_count(&self) -> SinkResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM directories", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of files recorded
    pub fn file_count(&self) -> SinkResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// ACLs recorded for a directory or file path
    pub fn acls_for(&self, path: &str) -> SinkResult<Option<Vec<AclEntry>>> {
        let conn = self.conn.lock();
        let text: Option<String> = conn
            .query_row(
                "SELECT acls FROM directories WHERE path = ?1
                 UNION ALL
                 SELECT acls FROM files WHERE path = ?1
                 LIMIT 1",
                [path],
                |row| row.get(0),
            )
            .optional()?;
        text.as_deref().map(parse_acls).transpose()
    }
}

fn write_result(
    conn: &mut Connection,
    result: &DirectoryResult,
    dir_acls: &str,
    file_acls: &[String],
) -> SinkResult<()> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT OR REPLACE INTO directories (path, acls, file_count, crawled_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            result.path,
            dir_acls,
            result.files.len() as i64,
            chrono::Utc::now().timestamp()
        ],
    )?;

    // A redelivered visit may see a different listing
    tx.execute("DELETE FROM files WHERE directory = ?1", [&result.path])?;

    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO files (path, directory, acls) VALUES (?1, ?2, ?3)",
        )?;
        for (file, acls) in result.files.iter().zip(file_acls) {
            stmt.execute(params![file.name, result.path, acls])?;
        }
    }

    tx.commit()?;
    Ok(())
}

#[async_trait]
impl ResultSink for SqliteSink {
    async fn emit(&self, result: &DirectoryResult) -> SinkResult<()> {
        let dir_acls = render_acls(&result.acls)?;
        let file_acls = result
            .files
            .iter()
            .map(|f| render_acls(&f.acls))
            .collect::<SinkResult<Vec<_>>>()?;

        let conn = Arc::clone(&self.conn);
        let result = result.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            write_result(&mut conn, &result, &dir_acls, &file_acls)
        })
        .await
        .map_err(|e| SinkError::Writer(e.to_string()))?
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::FileResult;
    use tempfile::tempdir;

    fn sample(path: &str, files: &[&str]) -> DirectoryResult {
        let mut result = DirectoryResult::new(path);
        result.acls = vec![AclEntry::user("u1", "rwx"), AclEntry::group("g1", "r-x").as_default()];
        result.files = files
            .iter()
            .map(|name| FileResult {
                name: name.to_string(),
                acls: vec![AclEntry::user("u2", "r--")],
            })
            .collect();
        result
    }

    #[tokio::test]
    async fn test_emit_and_query() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("acls.db")).unwrap();

        sink.emit(&sample("/a", &["/a/x", "/a/y"])).await.unwrap();
        assert_eq!(sink.directory_count().unwrap(), 1);
        assert_eq!(sink.file_count().unwrap(), 2);

        let acls = sink.acls_for("/a").unwrap().unwrap();
        assert_eq!(acls.len(), 2);
        assert!(acls[1].default_scope);

        let acls = sink.acls_for("/a/y").unwrap().unwrap();
        assert_eq!(acls, vec![AclEntry::user("u2", "r--")]);

        assert!(sink.acls_for("/missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redelivery_overwrites() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("acls.db")).unwrap();

        sink.emit(&sample("/a", &["/a/x", "/a/y"])).await.unwrap();
        sink.emit(&sample("/a", &["/a/x"])).await.unwrap();

        assert_eq!(sink.directory_count().unwrap(), 1);
        assert_eq!(sink.file_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acl_ids_with_colons_survive() {
        let dir = tempdir().unwrap();
        let sink = SqliteSink::open(&dir.path().join("acls.db")).unwrap();

        let acls = vec![
            AclEntry::user("DOMAIN:alice", "rwx"),
            AclEntry::group("a:b:c", "r-x").as_default(),
        ];
        let mut result = DirectoryResult::new("/a");
        result.acls = acls.clone();
        sink.emit(&result).await.unwrap();

        assert_eq!(sink.acls_for("/a").unwrap(), Some(acls));
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acls.db");
        drop(SqliteSink::open(&path).unwrap());
        let sink = SqliteSink::open(&path).unwrap();
        assert_eq!(sink.directory_count().unwrap(), 0);
    }
}
