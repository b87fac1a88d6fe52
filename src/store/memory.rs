//! In-memory store
//!
//! A small namespace kept in a map, with per-path ACLs and injectable
//! failures. Children are listed in insertion order.

use crate::error::{StoreError, StoreResult};
use crate::item::{join_path, AclEntry};
use crate::store::{
    validate_child_name, ChildEntry, DirectoryHandle, FileHandle, HierarchicalStore,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
enum NodeKind {
    Directory { children: Vec<String> },
    File,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    acls: Vec<AclEntry>,
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: HashMap<String, Node>,
    failing: HashSet<String>,
}

/// In-process hierarchical store
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    create_calls: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

impl MemoryStore {
    /// Create a store containing only the root directory `/`
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
                acls: Vec::new(),
            },
        );
        Self {
            state: RwLock::new(MemoryState {
                nodes,
                failing: HashSet::new(),
            }),
            create_calls: AtomicU64::new(0),
        }
    }

    /// Add a directory, creating missing parents with empty ACLs.
    /// Replaces the ACLs if the directory already exists.
    pub fn add_dir(&self, path: &str, acls: Vec<AclEntry>) -> &Self {
        let mut state = self.state.write();
        Self::ensure_dir(&mut state, path);
        if let Some(node) = state.nodes.get_mut(path) {
            node.acls = acls;
        }
        self
    }

    /// Add a file, creating missing parents with empty ACLs
    pub fn add_file(&self, path: &str, acls: Vec<AclEntry>) -> &Self {
        let mut state = self.state.write();
        let parent = parent_of(path).to_string();
        Self::ensure_dir(&mut state, &parent);
        Self::link(&mut state, &parent, path);
        state.nodes.insert(
            path.to_string(),
            Node {
                kind: NodeKind::File,
                acls,
            },
        );
        self
    }

    /// Make every operation that touches `path` fail with a transient error
    pub fn fail_path(&self, path: &str) {
        self.state.write().failing.insert(path.to_string());
    }

    /// Undo [`fail_path`](Self::fail_path)
    pub fn heal_path(&self, path: &str) {
        self.state.write().failing.remove(path);
    }

    /// Names of the immediate children of `path`, in insertion order
    pub fn child_names(&self, path: &str) -> Vec<String> {
        let state = self.state.read();
        match state.nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::Directory { children }) => children
                .iter()
                .map(|c| crate::item::file_name(c).to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `path` exists and is a directory
    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.state.read().nodes.get(path).map(|n| &n.kind),
            Some(NodeKind::Directory { .. })
        )
    }

    /// Number of directories in the store, including the root
    pub fn dir_count(&self) -> usize {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Directory { .. }))
            .count()
    }

    /// Number of `create_subdirectory` calls that succeeded
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    fn ensure_dir(state: &mut MemoryState, path: &str) {
        if state.nodes.contains_key(path) {
            return;
        }
        if !path.is_empty() && path != "/" {
            let parent = parent_of(path).to_string();
            Self::ensure_dir(state, &parent);
            Self::link(state, &parent, path);
        }
        state.nodes.insert(
            path.to_string(),
            Node {
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
                acls: Vec::new(),
            },
        );
    }

    fn link(state: &mut MemoryState, parent: &str, child: &str) {
        if let Some(Node {
            kind: NodeKind::Directory { children },
            ..
        }) = state.nodes.get_mut(parent)
        {
            if !children.iter().any(|c| c == child) {
                children.push(child.to_string());
            }
        }
    }

    fn check(&self, path: &str) -> StoreResult<()> {
        if self.state.read().failing.contains(path) {
            return Err(StoreError::Transient {
                path: path.to_string(),
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HierarchicalStore for MemoryStore {
    async fn resolve_directory(&self, path: &str) -> StoreResult<DirectoryHandle> {
        self.check(path)?;
        match self.state.read().nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::Directory { .. }) => Ok(DirectoryHandle {
                path: path.to_string(),
            }),
            Some(NodeKind::File) => Err(StoreError::NotADirectory {
                path: path.to_string(),
            }),
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    async fn list_children(&self, dir: &DirectoryHandle) -> StoreResult<Vec<ChildEntry>> {
        self.check(&dir.path)?;
        let state = self.state.read();
        let children = match state.nodes.get(&dir.path).map(|n| &n.kind) {
            Some(NodeKind::Directory { children }) => children,
            _ => {
                return Err(StoreError::NotFound {
                    path: dir.path.clone(),
                })
            }
        };

        Ok(children
            .iter()
            .map(|child| ChildEntry {
                path: child.clone(),
                name: crate::item::file_name(child).to_string(),
                is_directory: matches!(
                    state.nodes.get(child).map(|n| &n.kind),
                    Some(NodeKind::Directory { .. })
                ),
            })
            .collect())
    }

    async fn get_acl(&self, path: &str) -> StoreResult<Vec<AclEntry>> {
        self.check(path)?;
        self.state
            .read()
            .nodes
            .get(path)
            .map(|n| n.acls.clone())
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })
    }

    async fn resolve_file(&self, path: &str) -> StoreResult<FileHandle> {
        self.check(path)?;
        match self.state.read().nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::File) => Ok(FileHandle {
                path: path.to_string(),
            }),
            Some(NodeKind::Directory { .. }) => Err(StoreError::NotAFile {
                path: path.to_string(),
            }),
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    async fn create_subdirectory(&self, parent: &str, name: &str) -> StoreResult<()> {
        self.check(parent)?;
        validate_child_name(parent, name)?;

        let child = join_path(parent, name);
        self.check(&child)?;
        let mut state = self.state.write();
        match state.nodes.get(parent).map(|n| &n.kind) {
            Some(NodeKind::Directory { .. }) => {}
            Some(NodeKind::File) => {
                return Err(StoreError::NotADirectory {
                    path: parent.to_string(),
                })
            }
            None => {
                return Err(StoreError::NotFound {
                    path: parent.to_string(),
                })
            }
        }
        if let Some(Node {
            kind: NodeKind::File,
            ..
        }) = state.nodes.get(&child)
        {
            return Err(StoreError::CreateFailed {
                parent: parent.to_string(),
                name: name.to_string(),
                reason: "a file with that name exists".into(),
            });
        }

        Self::ensure_dir(&mut state, &child);
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory:{} nodes", self.state.read().nodes.len())
    }
}
