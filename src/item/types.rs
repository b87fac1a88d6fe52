//! Work item and result types
//!
//! `VisitWorkItem` drives the crawl, `CreateWorkItem` drives the synthetic
//! tree builder, and `DirectoryResult` is what a visit produces.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::ProtocolError;
use crate::item::AclEntry;

/// Placeholder accepted in directory name patterns: `{}`, `{index}`,
/// `{:N}` or `{index:N}` (zero-padded to width N)
static INDEX_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:index)?(?::(\d{1,2}))?\}").expect("Invalid placeholder regex")
});

/// Join a parent path and a child name with a single `/`
pub fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if parent.is_empty() {
        name.to_string()
    } else if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Last segment of a `/`-separated path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// One pending crawl step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitWorkItem {
    /// Path of the directory to visit
    pub path: String,
    /// Must be true; file items are rejected by the visit handler
    pub is_directory: bool,
}

impl VisitWorkItem {
    /// Visit item for a directory
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Malformed {
            kind: "visit",
            reason: e.to_string(),
        })
    }
}

/// One pending synthetic-subtree creation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkItem {
    /// Directory to create children under
    pub path: String,
    /// Depth at which the fan-out stops
    pub max_depth: u32,
    /// Depth of `path` relative to the root item
    #[serde(default)]
    pub current_depth: u32,
    /// Child directories to create per level
    pub dir_count: u32,
    /// Reserved: files to create per directory
    #[serde(default)]
    pub file_count: u32,
    /// Reserved: ACL entries to assign per entity
    #[serde(default)]
    pub acl_count: u32,
    /// Reserved: create files
    #[serde(default)]
    pub create_files: bool,
    /// Reserved: assign ACLs
    #[serde(default)]
    pub create_acls: bool,
    /// Child directory name pattern
    #[serde(default)]
    pub dir_pattern: String,
    /// Reserved: file name pattern
    #[serde(default)]
    pub file_pattern: String,
}

impl CreateWorkItem {
    /// Root item for a tree of `max_depth` levels with `dir_count` children each
    pub fn root(path: impl Into<String>, max_depth: u32, dir_count: u32, dir_pattern: &str) -> Self {
        Self {
            path: path.into(),
            max_depth,
            current_depth: 0,
            dir_count,
            file_count: 0,
            acl_count: 0,
            create_files: false,
            create_acls: false,
            dir_pattern: dir_pattern.to_string(),
            file_pattern: String::new(),
        }
    }

    /// No further levels are created from this item
    pub fn is_exhausted(&self) -> bool {
        self.current_depth >= self.max_depth
    }

    /// Name of the child with the given index.
    ///
    /// A pattern without a placeholder is used as-is, so every sibling
    /// gets the same name.
    pub fn child_name(&self, index: u32) -> String {
        INDEX_PLACEHOLDER
            .replace_all(&self.dir_pattern, |caps: &Captures| match caps.get(1) {
                Some(width) => {
                    let width: usize = width.as_str().parse().unwrap_or(0);
                    format!("{:0width$}", index, width = width)
                }
                None => index.to_string(),
            })
            .into_owned()
    }

    /// Check that `dirPattern` yields a single non-empty path segment.
    ///
    /// Placeholders only expand to digits, so checking index 0 covers
    /// every sibling.
    pub fn validate_pattern(&self) -> Result<(), ProtocolError> {
        let name = self.child_name(0);
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(ProtocolError::Malformed {
                kind: "create",
                reason: format!(
                    "dirPattern '{}' must produce a single non-empty path segment",
                    self.dir_pattern
                ),
            });
        }
        Ok(())
    }

    /// Item for a created child directory, one level deeper
    pub fn child(&self, name: &str) -> Self {
        Self {
            path: join_path(&self.path, name),
            current_depth: self.current_depth + 1,
            ..self.clone()
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Malformed {
            kind: "create",
            reason: e.to_string(),
        })
    }
}

/// ACLs of one file directly inside a visited directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    /// Full path of the file as returned by the listing
    pub name: String,
    pub acls: Vec<AclEntry>,
}

/// Result of visiting one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryResult {
    pub path: String,
    pub is_directory: bool,
    /// The directory's own ACL entries
    pub acls: Vec<AclEntry>,
    /// Files directly inside the directory, in listing order
    pub files: Vec<FileResult>,
}

impl DirectoryResult {
    /// Empty result for a directory
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            acls: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pattern() {
        assert!(CreateWorkItem::root("/r", 1, 2, "d{}").validate_pattern().is_ok());
        assert!(CreateWorkItem::root("/r", 1, 2, "d").validate_pattern().is_ok());

        for bad in ["", "a/{}", "..", "."] {
            let err = CreateWorkItem::root("/r", 1, 2, bad)
                .validate_pattern()
                .unwrap_err();
            assert!(matches!(err, ProtocolError::Malformed { kind: "create", .. }), "{bad}");
        }

        // A missing dirPattern decodes as empty and is rejected
        let item = CreateWorkItem::from_json(r#"{"path":"/root","maxDepth":1,"dirCount":2}"#).unwrap();
        assert!(item.validate_pattern().is_err());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/a", "b"), "/a/b");
        assert_eq!(join_path("/a/", "b"), "/a/b");
        assert_eq!(join_path("/", "b"), "/b");
        assert_eq!(join_path("", "b"), "b");
        assert_eq!(join_path("a", "/b"), "a/b");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name("/a/b/"), "b");
        assert_eq!(file_name("top"), "top");
    }

    #[test]
    fn test_visit_item_wire_names() {
        let json = VisitWorkItem::directory("/a/b").to_json().unwrap();
        assert_eq!(json, r#"{"path":"/a/b","isDirectory":true}"#);

        let item = VisitWorkItem::from_json(r#"{"path":"/x","isDirectory":false}"#).unwrap();
        assert!(!item.is_directory);

        let err = VisitWorkItem::from_json(r#"{"Name":"/x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { kind: "visit", .. }));
    }

    #[test]
    fn test_create_item_wire_names() {
        let item = CreateWorkItem::root("/root", 2, 3, "d");
        let json: serde_json::Value = serde_json::from_str(&item.to_json().unwrap()).unwrap();
        for key in [
            "path",
            "maxDepth",
            "currentDepth",
            "dirCount",
            "fileCount",
            "aclCount",
            "createFiles",
            "createAcls",
            "dirPattern",
            "filePattern",
        ] {
            assert!(json.get(key).is_some(), "missing wire field {}", key);
        }
    }

    #[test]
    fn test_create_item_defaults() {
        let item =
            CreateWorkItem::from_json(r#"{"path":"/r","maxDepth":1,"dirCount":2}"#).unwrap();
        assert_eq!(item.current_depth, 0);
        assert!(!item.create_files);
        assert_eq!(item.dir_pattern, "");

        assert!(CreateWorkItem::from_json(r#"{"path":"/r"}"#).is_err());
    }

    #[test]
    fn test_child_name_placeholders() {
        let mut item = CreateWorkItem::root("/r", 1, 3, "dir-{}");
        assert_eq!(item.child_name(7), "dir-7");

        item.dir_pattern = "d{index:3}".into();
        assert_eq!(item.child_name(7), "d007");

        item.dir_pattern = "{index}_{index}".into();
        assert_eq!(item.child_name(2), "2_2");
    }

    #[test]
    fn test_child_name_without_placeholder_collides() {
        let item = CreateWorkItem::root("/r", 1, 3, "d");
        let names: Vec<_> = (0..3).map(|i| item.child_name(i)).collect();
        assert_eq!(names, vec!["d", "d", "d"]);
    }

    #[test]
    fn test_child_item() {
        let mut item = CreateWorkItem::root("/root", 2, 3, "d{}");
        item.create_files = true;
        let child = item.child("d1");
        assert_eq!(child.path, "/root/d1");
        assert_eq!(child.current_depth, 1);
        assert_eq!(child.max_depth, 2);
        assert!(child.create_files);
        assert!(!child.is_exhausted());
        assert!(child.child("d0").is_exhausted());
    }

    #[test]
    fn test_directory_result_shape() {
        let mut result = DirectoryResult::new("/a/b");
        result.acls.push(AclEntry::user("u2", "rw"));
        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["path"], "/a/b");
        assert_eq!(json["isDirectory"], true);
        assert_eq!(json["files"], serde_json::json!([]));
        assert_eq!(json["acls"][0]["id"], "u2");
    }
}
