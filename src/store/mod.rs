//! Hierarchical store access
//!
//! The crawler only needs a handful of operations from the storage
//! namespace: resolve a directory or file, list one level of children,
//! fetch access control entries, and (for the tree builder) create a
//! subdirectory. Every call is a suspension point and may fail; failures
//! are reported as [`StoreError`] and retried through queue redelivery.
//!
//! # Implementations
//!
//! - [`LocalStore`]: a directory on the local (or mounted) filesystem.
//!   ACLs are derived from Unix mode bits.
//! - [`MemoryStore`]: an in-process tree with explicit ACLs and failure
//!   injection, used for tests and dry runs.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::error::{StoreError, StoreResult};
use crate::item::AclEntry;
use async_trait::async_trait;

/// A resolved directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryHandle {
    /// Logical path of the directory
    pub path: String,
}

/// A resolved file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Logical path of the file
    pub path: String,
}

/// One immediate child returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    /// Full logical path of the child
    pub path: String,
    /// Last path segment
    pub name: String,
    pub is_directory: bool,
}

/// Operations the crawler needs from a storage namespace
#[async_trait]
pub trait HierarchicalStore: Send + Sync {
    /// Resolve a directory handle for `path`
    async fn resolve_directory(&self, path: &str) -> StoreResult<DirectoryHandle>;

    /// List the immediate children of a directory (non-recursive)
    async fn list_children(&self, dir: &DirectoryHandle) -> StoreResult<Vec<ChildEntry>>;

    /// Access control entries attached to `path`
    async fn get_acl(&self, path: &str) -> StoreResult<Vec<AclEntry>>;

    /// Resolve a file handle for `path`
    async fn resolve_file(&self, path: &str) -> StoreResult<FileHandle>;

    /// Create `name` under `parent`. Succeeds if the directory already exists.
    async fn create_subdirectory(&self, parent: &str, name: &str) -> StoreResult<()>;

    /// Human-readable description for logs and status output
    fn describe(&self) -> String;
}

/// Reject child names that would escape their parent
pub(crate) fn validate_child_name(parent: &str, name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StoreError::CreateFailed {
            parent: parent.to_string(),
            name: name.to_string(),
            reason: "name must be a single non-empty path segment".into(),
        });
    }
    Ok(())
}

/// Render the low nine mode bits' permission triplet for one class
#[cfg_attr(not(unix), allow(dead_code))]
pub(crate) fn mode_triplet(bits: u32) -> String {
    let mut perm = String::with_capacity(3);
    perm.push(if bits & 0o4 != 0 { 'r' } else { '-' });
    perm.push(if bits & 0o2 != 0 { 'w' } else { '-' });
    perm.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    perm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_triplet() {
        assert_eq!(mode_triplet(0o7), "rwx");
        assert_eq!(mode_triplet(0o5), "r-x");
        assert_eq!(mode_triplet(0o4), "r--");
        assert_eq!(mode_triplet(0), "---");
    }

    #[test]
    fn test_validate_child_name() {
        assert!(validate_child_name("/a", "b").is_ok());
        assert!(validate_child_name("/a", "").is_err());
        assert!(validate_child_name("/a", "..").is_err());
        assert!(validate_child_name("/a", "b/c").is_err());
    }
}
