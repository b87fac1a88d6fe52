//! Local filesystem store
//!
//! Maps logical `/`-separated paths onto a root directory on the host.
//! Symlinks are reported as files and never followed, so a crawl cannot
//! loop through a link cycle.

use crate::error::{ConfigError, StoreError, StoreResult};
use crate::item::{join_path, AclEntry, AclKind};
use crate::store::{
    validate_child_name, ChildEntry, DirectoryHandle, FileHandle, HierarchicalStore,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Store backed by a directory tree on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `root`, which must be an existing directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(Self { root }),
            Ok(_) => Err(ConfigError::InvalidStoreRoot {
                path: root,
                reason: "not a directory".into(),
            }),
            Err(e) => Err(ConfigError::InvalidStoreRoot {
                path: root,
                reason: e.to_string(),
            }),
        }
    }

    /// Host directory the store is rooted at
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Translate a logical path to a host path under the root
    fn host_path(&self, path: &str) -> StoreResult<PathBuf> {
        let mut host = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(StoreError::InvalidPath {
                        path: path.to_string(),
                        reason: "parent segments are not allowed".into(),
                    })
                }
                s => host.push(s),
            }
        }
        Ok(host)
    }

    async fn symlink_metadata(&self, path: &str) -> StoreResult<std::fs::Metadata> {
        let host = self.host_path(path)?;
        tokio::fs::symlink_metadata(&host)
            .await
            .map_err(|e| StoreError::from_io(path, e))
    }
}

#[async_trait]
impl HierarchicalStore for LocalStore {
    async fn resolve_directory(&self, path: &str) -> StoreResult<DirectoryHandle> {
        let meta = self.symlink_metadata(path).await?;
        if !meta.is_dir() {
            return Err(StoreError::NotADirectory {
                path: path.to_string(),
            });
        }
        Ok(DirectoryHandle {
            path: path.to_string(),
        })
    }

    async fn list_children(&self, dir: &DirectoryHandle) -> StoreResult<Vec<ChildEntry>> {
        let host = self.host_path(&dir.path)?;
        let list_err = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                StoreError::from_io(&dir.path, e)
            }
            _ => StoreError::ListFailed {
                path: dir.path.clone(),
                reason: e.to_string(),
            },
        };

        let mut read_dir = tokio::fs::read_dir(&host).await.map_err(list_err)?;
        let mut children = Vec::new();

        while let Some(entry) = read_dir.next_entry().await.map_err(list_err)? {
            // Logical paths are UTF-8; a lossy name would never resolve
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!(
                        "Skipping non-UTF-8 entry {:?} in {}",
                        raw,
                        dir.path
                    );
                    continue;
                }
            };
            let file_type = entry.file_type().await.map_err(list_err)?;
            children.push(ChildEntry {
                path: join_path(&dir.path, &name),
                name,
                is_directory: file_type.is_dir(),
            });
        }

        // read_dir order is filesystem-dependent
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn get_acl(&self, path: &str) -> StoreResult<Vec<AclEntry>> {
        let meta = self.symlink_metadata(path).await?;
        Ok(acl_from_metadata(&meta))
    }

    async fn resolve_file(&self, path: &str) -> StoreResult<FileHandle> {
        let meta = self.symlink_metadata(path).await?;
        if meta.is_dir() {
            return Err(StoreError::NotAFile {
                path: path.to_string(),
            });
        }
        Ok(FileHandle {
            path: path.to_string(),
        })
    }

    async fn create_subdirectory(&self, parent: &str, name: &str) -> StoreResult<()> {
        validate_child_name(parent, name)?;
        self.resolve_directory(parent).await?;

        let host = self.host_path(&join_path(parent, name))?;
        match tokio::fs::create_dir(&host).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let meta = tokio::fs::symlink_metadata(&host)
                    .await
                    .map_err(|e| StoreError::from_io(parent, e))?;
                if meta.is_dir() {
                    Ok(())
                } else {
                    Err(StoreError::CreateFailed {
                        parent: parent.to_string(),
                        name: name.to_string(),
                        reason: "a file with that name exists".into(),
                    })
                }
            }
            Err(e) => Err(StoreError::CreateFailed {
                parent: parent.to_string(),
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

#[cfg(unix)]
fn acl_from_metadata(meta: &std::fs::Metadata) -> Vec<AclEntry> {
    use crate::store::mode_triplet;
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode();
    vec![
        AclEntry::new(AclKind::User, "", &mode_triplet(mode >> 6)),
        AclEntry::new(AclKind::Group, "", &mode_triplet(mode >> 3)),
        AclEntry::new(AclKind::Other, "", &mode_triplet(mode)),
    ]
}

#[cfg(not(unix))]
fn acl_from_metadata(meta: &std::fs::Metadata) -> Vec<AclEntry> {
    let perm = if meta.permissions().readonly() { "r--" } else { "rw-" };
    vec![AclEntry::new(AclKind::User, "", perm)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_rejects_missing_root() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            LocalStore::open(&missing),
            Err(ConfigError::InvalidStoreRoot { .. })
        ));
    }

    #[test]
    fn test_host_path_rejects_parent_segments() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        assert!(store.host_path("/a/../../etc").is_err());
        assert_eq!(store.host_path("/a/./b").unwrap(), dir.path().join("a").join("b"));
    }

    #[tokio::test]
    async fn test_list_children_sorted() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("zeta")).unwrap();
        std::fs::write(dir.path().join("alpha.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("mid")).unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        let root = store.resolve_directory("/").await.unwrap();
        let children = store.list_children(&root).await.unwrap();

        let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.txt", "mid", "zeta"]);
        assert_eq!(children[0].path, "/alpha.txt");
        assert!(!children[0].is_directory);
        assert!(children[1].is_directory);
    }

    #[tokio::test]
    async fn test_resolve_kinds() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.resolve_directory("/f").await,
            Err(StoreError::NotADirectory { .. })
        ));
        assert!(matches!(
            store.resolve_directory("/missing").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.resolve_file("/f").await.is_ok());
        assert!(matches!(
            store.resolve_file("/").await,
            Err(StoreError::NotAFile { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_acl_from_mode_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o640)).unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        let acls = store.get_acl("/f").await.unwrap();
        let rendered: Vec<_> = acls.iter().map(|a| a.to_string()).collect();
        assert_eq!(rendered, vec!["user::rw-", "group::r--", "other::---"]);
    }

    #[tokio::test]
    async fn test_create_subdirectory_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        store.create_subdirectory("/", "d0").await.unwrap();
        store.create_subdirectory("/", "d0").await.unwrap();
        assert!(dir.path().join("d0").is_dir());

        std::fs::write(dir.path().join("file"), b"x").unwrap();
        assert!(matches!(
            store.create_subdirectory("/", "file").await,
            Err(StoreError::CreateFailed { .. })
        ));
        assert!(store.create_subdirectory("/missing", "x").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_children_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        let bad = dir.path().join("d").join(OsStr::from_bytes(b"bad\xff.txt"));
        // Some filesystems refuse non-UTF-8 names outright
        if std::fs::write(&bad, b"x").is_err() {
            return;
        }
        std::fs::write(dir.path().join("d/ok.txt"), b"x").unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        let handle = store.resolve_directory("/d").await.unwrap();
        let children = store.list_children(&handle).await.unwrap();

        let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ok.txt"]);
        for child in &children {
            assert!(store.get_acl(&child.path).await.is_ok());
        }
    }
}
